pub mod backfill;
pub mod queue;
