// src/lib.rs

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use jobs::queue::JobQueue;
use services::resolver::PriceResolver;
use services::schedules::ScheduleRegistry;

/// Everything the composition root wires together. Collaborators are
/// constructed explicitly and shared by handle; no process-global state.
#[derive(Clone)]
pub struct OracleState {
    pub db: DatabaseConnection,
    pub resolver: Arc<PriceResolver>,
    pub schedules: Arc<ScheduleRegistry>,
    pub queue: Option<Arc<JobQueue>>,
}

pub mod config;
pub mod error;

pub mod entities {
    pub mod prelude;

    pub mod backfill_jobs;
    pub mod price_points;
}

pub mod services {
    pub mod cache;
    pub mod interpolation;
    pub mod price_store;
    pub mod resolver;
    pub mod schedules;
    pub mod upstream;
}

pub mod jobs;
pub mod models;
