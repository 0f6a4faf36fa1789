pub use super::backfill_jobs::Entity as BackfillJobs;
pub use super::price_points::Entity as Prices;
