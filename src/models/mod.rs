pub mod backfill;
pub mod price;
pub mod schedule;
