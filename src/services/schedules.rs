//! In-memory registry of backfill schedules.
//!
//! One record per (token, network), compared case-insensitively. Records live
//! only in process memory; queued jobs carry self-contained payloads, so a
//! restart loses the schedule table but not in-flight work.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::OracleError;
use crate::jobs::queue::JobQueue;
use crate::models::backfill::BackfillJobSpec;
use crate::models::price::Network;
use crate::models::schedule::{ScheduleListing, ScheduleRecord};
use crate::services::resolver::validate_request;

/// Outcome of an operation that may dispatch a backfill. `job_id` is absent
/// when the queue is down; the schedule itself is still recorded.
#[derive(Debug, Clone)]
pub struct ScheduledBackfill {
    pub record: ScheduleRecord,
    pub job_id: Option<i64>,
}

pub struct ScheduleRegistry {
    records: Mutex<HashMap<String, ScheduleRecord>>,
    queue: Option<Arc<JobQueue>>,
}

impl ScheduleRegistry {
    pub fn new(queue: Option<Arc<JobQueue>>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            queue,
        }
    }

    fn record_key(token: &str, network: Network) -> String {
        format!("{}:{}", token.to_lowercase(), network)
    }

    /// Create a schedule. Enabled schedules dispatch their first backfill
    /// immediately; a down queue degrades that to record-only.
    pub async fn create(
        &self,
        token: &str,
        network: &str,
        interval: Option<String>,
        enabled: bool,
    ) -> Result<ScheduledBackfill, OracleError> {
        let query = validate_request(token, network, None)?;
        let key = Self::record_key(&query.token, query.network);

        let record = {
            let mut records = self.records.lock().unwrap();
            if let Some(existing) = records.get(&key) {
                return Err(OracleError::AlreadyExists {
                    existing_id: existing.id.clone(),
                });
            }
            let record = ScheduleRecord {
                id: Uuid::new_v4().to_string(),
                token: query.token.clone(),
                network: query.network,
                interval,
                enabled,
                created_at: Utc::now(),
                last_run: None,
                next_run: None,
            };
            records.insert(key, record.clone());
            record
        };

        let job_id = if enabled {
            self.dispatch(&record).await
        } else {
            None
        };

        tracing::info!(
            id = %record.id,
            token = %record.token,
            network = %record.network,
            enabled,
            dispatched = job_id.is_some(),
            "Schedule created"
        );

        Ok(ScheduledBackfill { record, job_id })
    }

    pub fn list(&self) -> ScheduleListing {
        let records = self.records.lock().unwrap();
        let mut jobs: Vec<ScheduleRecord> = records.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let active = jobs.iter().filter(|r| r.enabled).count();
        ScheduleListing {
            total: jobs.len(),
            active,
            jobs,
        }
    }

    pub fn get(&self, id: &str) -> Result<ScheduleRecord, OracleError> {
        let records = self.records.lock().unwrap();
        records
            .values()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(OracleError::NotFound)
    }

    /// Toggle a schedule. Flipping to enabled re-enqueues a backfill.
    pub async fn update(&self, id: &str, enabled: bool) -> Result<ScheduledBackfill, OracleError> {
        let (record, was_enabled) = {
            let mut records = self.records.lock().unwrap();
            let record = records
                .values_mut()
                .find(|r| r.id == id)
                .ok_or(OracleError::NotFound)?;
            let was_enabled = record.enabled;
            record.enabled = enabled;
            (record.clone(), was_enabled)
        };

        let job_id = if enabled && !was_enabled {
            self.dispatch(&record).await
        } else {
            None
        };

        Ok(ScheduledBackfill { record, job_id })
    }

    pub fn delete(&self, id: &str) -> Result<(), OracleError> {
        let mut records = self.records.lock().unwrap();
        let key = records
            .iter()
            .find(|(_, r)| r.id == id)
            .map(|(k, _)| k.clone())
            .ok_or(OracleError::NotFound)?;
        records.remove(&key);
        tracing::info!(id, "Schedule deleted");
        Ok(())
    }

    /// Manual run. Refused for disabled schedules; a down queue is a soft
    /// failure surfaced as `QueueUnavailable`.
    pub async fn run_now(&self, id: &str) -> Result<ScheduledBackfill, OracleError> {
        let record = self.get(id)?;
        if !record.enabled {
            return Err(OracleError::Disabled);
        }

        match self.dispatch(&record).await {
            Some(job_id) => {
                let now = Utc::now();
                let mut record = record;
                record.last_run = Some(now);
                let mut records = self.records.lock().unwrap();
                if let Some(stored) = records.values_mut().find(|r| r.id == id) {
                    stored.last_run = Some(now);
                }
                Ok(ScheduledBackfill {
                    record,
                    job_id: Some(job_id),
                })
            }
            None => Err(OracleError::QueueUnavailable),
        }
    }

    async fn dispatch(&self, record: &ScheduleRecord) -> Option<i64> {
        let queue = self.queue.as_ref()?;
        let spec = BackfillJobSpec {
            token: record.token.clone(),
            network: record.network,
            start_date: None,
            end_date: None,
            request_id: Uuid::new_v4().to_string(),
        };
        match queue.enqueue(&spec).await {
            Ok(job_id) => Some(job_id),
            Err(e) => {
                tracing::warn!(
                    id = %record.id,
                    token = %record.token,
                    "Could not dispatch backfill: {}",
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ScheduleRegistry {
        ScheduleRegistry::new(None)
    }

    #[tokio::test]
    async fn create_normalizes_and_lists() {
        let registry = registry();
        let created = registry
            .create("eth", "Ethereum", Some("0 0 * * *".to_string()), true)
            .await
            .unwrap();
        assert_eq!(created.record.token, "ETH");
        assert_eq!(created.record.network, Network::Ethereum);
        // No queue: schedule recorded, nothing dispatched
        assert!(created.job_id.is_none());

        let listing = registry.list();
        assert_eq!(listing.total, 1);
        assert_eq!(listing.active, 1);
    }

    #[tokio::test]
    async fn duplicate_create_is_case_insensitive() {
        let registry = registry();
        let first = registry.create("USDC", "ethereum", None, true).await.unwrap();
        let second = registry.create("usdc", "Ethereum", None, false).await;
        match second {
            Err(OracleError::AlreadyExists { existing_id }) => {
                assert_eq!(existing_id, first.record.id);
            }
            other => panic!("expected AlreadyExists, got {:?}", other.map(|s| s.record.id)),
        }
    }

    #[tokio::test]
    async fn same_token_on_other_network_is_a_new_schedule() {
        let registry = registry();
        registry.create("USDC", "ethereum", None, true).await.unwrap();
        assert!(registry.create("USDC", "base", None, true).await.is_ok());
        assert_eq!(registry.list().total, 2);
    }

    #[tokio::test]
    async fn get_update_delete_round_trip() {
        let registry = registry();
        let created = registry.create("ETH", "ethereum", None, true).await.unwrap();
        let id = created.record.id.clone();

        assert_eq!(registry.get(&id).unwrap().token, "ETH");

        let updated = registry.update(&id, false).await.unwrap();
        assert!(!updated.record.enabled);
        assert_eq!(registry.list().active, 0);

        registry.delete(&id).unwrap();
        assert!(matches!(registry.get(&id), Err(OracleError::NotFound)));
        assert!(matches!(registry.delete(&id), Err(OracleError::NotFound)));
    }

    #[tokio::test]
    async fn run_now_refuses_disabled_schedules() {
        let registry = registry();
        let created = registry.create("ETH", "ethereum", None, false).await.unwrap();
        let result = registry.run_now(&created.record.id).await;
        assert!(matches!(result, Err(OracleError::Disabled)));
    }

    #[tokio::test]
    async fn run_now_without_queue_is_unavailable() {
        let registry = registry();
        let created = registry.create("ETH", "ethereum", None, true).await.unwrap();
        let result = registry.run_now(&created.record.id).await;
        assert!(matches!(result, Err(OracleError::QueueUnavailable)));
        // The schedule itself survives the soft failure
        assert_eq!(registry.list().total, 1);
    }

    #[tokio::test]
    async fn invalid_token_is_rejected_before_any_dispatch() {
        let registry = registry();
        let result = registry.create("not a token!", "ethereum", None, true).await;
        assert!(matches!(result, Err(OracleError::InvalidInput(_))));
    }
}
