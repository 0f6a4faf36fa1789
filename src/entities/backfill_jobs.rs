//! SeaORM Entity for the durable backfill job queue

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "backfill_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Logical queue name; one deployment may share a table across queues
    pub queue: String,
    pub token: String,
    pub network: String,
    pub start_date: Option<Date>,
    pub end_date: Option<Date>,
    /// Correlation id carried through worker logs
    pub request_id: String,
    /// queued | active | completed | failed
    pub status: String,
    pub attempts: i32,
    /// 0..100, updated at worker checkpoints
    pub progress: i32,
    /// Earliest claim time; pushed forward by retry backoff
    pub run_after: DateTime,
    pub result: Option<Json>,
    pub last_error: Option<String>,
    pub created_at: Option<DateTime>,
    pub updated_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
