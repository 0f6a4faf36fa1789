use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::price::Network;

/// A backfill definition owned by the in-memory registry.
///
/// `interval` is opaque metadata: the core fires jobs on creation, enable and
/// manual runs only; periodic firing belongs to an external scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub id: String,
    pub token: String,
    pub network: Network,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

/// Request body for creating a schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub token: String,
    pub network: String,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Response for a schedule creation or manual run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub message: String,
    /// Rough wall-clock estimate for the dispatched backfill, milliseconds
    pub estimated_time: u64,
    pub scheduled_at: String,
}

impl ScheduleResponse {
    /// One full-history backfill fetches up to a year of dailies; the
    /// estimate assumes the worker's inter-batch pacing dominates.
    pub fn accepted(record: &ScheduleRecord, job_id: Option<i64>) -> Self {
        let message = match job_id {
            Some(_) => format!(
                "Backfill scheduled for {} on {}",
                record.token, record.network
            ),
            None => format!(
                "Schedule recorded for {} on {}; queue unavailable, no job dispatched",
                record.token, record.network
            ),
        };
        Self {
            success: true,
            job_id: job_id.map(|id| id.to_string()),
            message,
            estimated_time: 45_000,
            scheduled_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

/// Listing of all schedules plus counts.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleListing {
    pub jobs: Vec<ScheduleRecord>,
    pub total: usize,
    pub active: usize,
}
