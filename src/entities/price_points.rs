//! SeaORM Entity for the durable price store

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "prices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Uppercased symbol or lowercased 0x-address
    pub token: String,
    /// Lowercase network tag (ethereum, polygon, arbitrum, optimism, base)
    pub network: String,
    /// Unix seconds, UTC
    pub unix_ts: i64,
    /// ISO-8601 rendering of unix_ts, kept for human inspection
    pub iso_date: String,
    #[sea_orm(column_type = "Decimal(Some((30, 10)))")]
    pub price: Decimal,
    /// "upstream" or "interpolated"
    pub source: String,
    #[sea_orm(column_type = "Double")]
    pub confidence: f64,
    pub created_at: Option<DateTime>,
    pub updated_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
