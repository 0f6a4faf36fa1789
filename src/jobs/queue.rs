//! Durable backfill queue over the `backfill_jobs` table.
//!
//! Delivery is at-least-once: a worker claims a row with an optimistic
//! status transition, and a crashed attempt is retried with exponential
//! backoff until the attempt limit. Completed and failed rows are retained
//! for inspection, oldest evicted first.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Database, DatabaseConnection, EntityTrait, Order, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::entities::{backfill_jobs, prelude::*};
use crate::error::OracleError;
use crate::jobs::backfill::{run_backfill, ProgressSink, WorkerContext};
use crate::models::backfill::{
    BackfillJobSpec, BackfillResult, JobEvent, JobState, JobStatus, QueueStats,
};
use crate::models::price::Network;

/// Attempts before a job is marked failed.
const MAX_ATTEMPTS: i32 = 3;

/// First retry delay; doubles per attempt.
const RETRY_BASE_DELAY_SECS: i64 = 5;

/// Retention caps per terminal state.
const COMPLETED_RETENTION: u64 = 100;
const FAILED_RETENTION: u64 = 50;

/// Idle poll interval for workers.
const POLL_INTERVAL_MS: u64 = 1000;

/// Delay before attempt `n` (1-based) is retried.
pub fn retry_backoff_secs(attempt: i32) -> i64 {
    RETRY_BASE_DELAY_SECS << (attempt - 1).max(0)
}

pub struct JobQueue {
    db: DatabaseConnection,
    queue_name: String,
    events: broadcast::Sender<JobEvent>,
}

impl JobQueue {
    /// Connect to the queue backend. An unreachable backend yields
    /// `QueueUnavailable`; the caller keeps running without a queue.
    pub async fn connect(uri: &str, queue_name: &str) -> Result<Self, OracleError> {
        let db = Database::connect(uri).await.map_err(|e| {
            tracing::warn!("Queue backend unreachable: {}", e);
            OracleError::QueueUnavailable
        })?;
        let (events, _) = broadcast::channel(1000);
        Ok(Self {
            db,
            queue_name: queue_name.to_string(),
            events,
        })
    }

    /// Share an existing database connection (queue and store co-located).
    pub fn with_connection(db: DatabaseConnection, queue_name: &str) -> Self {
        let (events, _) = broadcast::channel(1000);
        Self {
            db,
            queue_name: queue_name.to_string(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Enqueue one backfill. Returns the job id, or `QueueUnavailable` when
    /// the backend cannot accept work.
    pub async fn enqueue(&self, spec: &BackfillJobSpec) -> Result<i64, OracleError> {
        let now = Utc::now().naive_utc();
        let job = backfill_jobs::ActiveModel {
            queue: Set(self.queue_name.clone()),
            token: Set(spec.token.clone()),
            network: Set(spec.network.to_string()),
            start_date: Set(spec.start_date),
            end_date: Set(spec.end_date),
            request_id: Set(spec.request_id.clone()),
            status: Set(JobState::Queued.as_str().to_string()),
            attempts: Set(0),
            progress: Set(0),
            run_after: Set(now),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        };

        let result = BackfillJobs::insert(job).exec(&self.db).await.map_err(|e| {
            tracing::warn!("Failed to enqueue backfill: {}", e);
            OracleError::QueueUnavailable
        })?;

        let job_id = result.last_insert_id;
        tracing::info!(
            job_id,
            token = %spec.token,
            network = %spec.network,
            request_id = %spec.request_id,
            "Backfill job enqueued"
        );
        self.broadcast(job_id, &spec.token, spec.network, JobState::Queued, 0);
        Ok(job_id)
    }

    pub async fn status(&self, job_id: i64) -> Option<JobStatus> {
        let row = BackfillJobs::find_by_id(job_id).one(&self.db).await.ok()??;
        let state = match row.status.as_str() {
            "queued" => JobState::Queued,
            "active" => JobState::Active,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            other => {
                tracing::warn!(job_id, status = other, "Unknown job status");
                return None;
            }
        };
        let result = row
            .result
            .and_then(|json| serde_json::from_value::<BackfillResult>(json).ok());
        Some(JobStatus {
            state,
            progress: row.progress,
            result,
            error: row.last_error,
        })
    }

    pub async fn stats(&self) -> QueueStats {
        let now = Utc::now().naive_utc();
        let count = |state: &'static str| {
            BackfillJobs::find()
                .filter(backfill_jobs::Column::Queue.eq(self.queue_name.clone()))
                .filter(backfill_jobs::Column::Status.eq(state))
                .count(&self.db)
        };

        let waiting = BackfillJobs::find()
            .filter(backfill_jobs::Column::Queue.eq(self.queue_name.clone()))
            .filter(backfill_jobs::Column::Status.eq("queued"))
            .filter(backfill_jobs::Column::RunAfter.lte(now))
            .count(&self.db)
            .await
            .unwrap_or(0);
        let delayed = BackfillJobs::find()
            .filter(backfill_jobs::Column::Queue.eq(self.queue_name.clone()))
            .filter(backfill_jobs::Column::Status.eq("queued"))
            .filter(backfill_jobs::Column::RunAfter.gt(now))
            .count(&self.db)
            .await
            .unwrap_or(0);

        QueueStats {
            waiting,
            active: count("active").await.unwrap_or(0),
            completed: count("completed").await.unwrap_or(0),
            failed: count("failed").await.unwrap_or(0),
            delayed,
        }
    }

    /// Spawn the worker pool. Workers drain until `shutdown` flips, finishing
    /// their current job at a batch boundary.
    pub fn start_workers(
        self: &Arc<Self>,
        ctx: WorkerContext,
        concurrency: usize,
        shutdown: watch::Receiver<bool>,
    ) {
        for worker_id in 0..concurrency {
            let queue = Arc::clone(self);
            let ctx = ctx.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                tracing::debug!(worker_id, "Backfill worker started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    match queue.claim_next().await {
                        Some(row) => queue.process(row, &ctx, shutdown.clone()).await,
                        None => {
                            tokio::select! {
                                _ = tokio::time::sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS)) => {}
                                _ = shutdown.changed() => {}
                            }
                        }
                    }
                }
                tracing::debug!(worker_id, "Backfill worker stopped");
            });
        }
    }

    /// Claim the oldest runnable job with an optimistic status transition;
    /// losing the race just means another worker got it.
    async fn claim_next(&self) -> Option<backfill_jobs::Model> {
        let now = Utc::now().naive_utc();
        let candidate = BackfillJobs::find()
            .filter(backfill_jobs::Column::Queue.eq(self.queue_name.clone()))
            .filter(backfill_jobs::Column::Status.eq("queued"))
            .filter(backfill_jobs::Column::RunAfter.lte(now))
            .order_by(backfill_jobs::Column::Id, Order::Asc)
            .one(&self.db)
            .await
            .ok()??;

        let claimed = BackfillJobs::update_many()
            .col_expr(backfill_jobs::Column::Status, Expr::value("active"))
            .col_expr(
                backfill_jobs::Column::Attempts,
                Expr::col(backfill_jobs::Column::Attempts).add(1),
            )
            .col_expr(backfill_jobs::Column::UpdatedAt, Expr::value(now))
            .filter(backfill_jobs::Column::Id.eq(candidate.id))
            .filter(backfill_jobs::Column::Status.eq("queued"))
            .exec(&self.db)
            .await
            .ok()?;

        if claimed.rows_affected == 1 {
            BackfillJobs::find_by_id(candidate.id).one(&self.db).await.ok()?
        } else {
            None
        }
    }

    async fn process(
        &self,
        row: backfill_jobs::Model,
        ctx: &WorkerContext,
        shutdown: watch::Receiver<bool>,
    ) {
        let job_id = row.id;
        let attempts = row.attempts;

        // Payload validation on dequeue: a row that cannot be interpreted is
        // failed outright rather than retried.
        let spec = match Self::validate_payload(&row) {
            Ok(spec) => spec,
            Err(reason) => {
                tracing::error!(job_id, "Invalid job payload: {}", reason);
                self.mark_failed(&row, &reason).await;
                return;
            }
        };

        tracing::info!(
            job_id,
            token = %spec.token,
            network = %spec.network,
            request_id = %spec.request_id,
            attempt = attempts,
            "Backfill job started"
        );
        self.broadcast(job_id, &spec.token, spec.network, JobState::Active, 0);

        let sink = QueueProgress {
            queue: self,
            job_id,
            token: spec.token.clone(),
            network: spec.network,
        };

        match run_backfill(ctx, &spec, &sink, Some(shutdown)).await {
            Ok(result) => {
                self.mark_completed(job_id, &spec, &result).await;
            }
            Err(e) => {
                tracing::warn!(job_id, attempt = attempts, "Backfill attempt failed: {}", e);
                if attempts >= MAX_ATTEMPTS {
                    self.mark_failed(&row, &e.to_string()).await;
                } else {
                    self.requeue_with_backoff(&row, attempts, &e.to_string()).await;
                }
            }
        }
    }

    fn validate_payload(row: &backfill_jobs::Model) -> Result<BackfillJobSpec, String> {
        if row.token.trim().is_empty() {
            return Err("payload is missing a token".to_string());
        }
        let network = row
            .network
            .parse::<Network>()
            .map_err(|_| format!("payload names an unknown network: {}", row.network))?;
        Ok(BackfillJobSpec {
            token: row.token.clone(),
            network,
            start_date: row.start_date,
            end_date: row.end_date,
            request_id: row.request_id.clone(),
        })
    }

    async fn mark_completed(&self, job_id: i64, spec: &BackfillJobSpec, result: &BackfillResult) {
        let now = Utc::now().naive_utc();
        let update = BackfillJobs::update_many()
            .col_expr(backfill_jobs::Column::Status, Expr::value("completed"))
            .col_expr(backfill_jobs::Column::Progress, Expr::value(100))
            .col_expr(
                backfill_jobs::Column::Result,
                Expr::value(serde_json::to_value(result).ok()),
            )
            .col_expr(backfill_jobs::Column::UpdatedAt, Expr::value(now))
            .filter(backfill_jobs::Column::Id.eq(job_id))
            .exec(&self.db)
            .await;
        if let Err(e) = update {
            tracing::warn!(job_id, "Failed to persist completion: {}", e);
        }

        tracing::info!(
            job_id,
            prices_processed = result.prices_processed,
            "Backfill job completed"
        );
        self.broadcast(job_id, &spec.token, spec.network, JobState::Completed, 100);
        self.evict_terminal("completed", COMPLETED_RETENTION).await;
    }

    async fn mark_failed(&self, row: &backfill_jobs::Model, reason: &str) {
        let now = Utc::now().naive_utc();
        let update = BackfillJobs::update_many()
            .col_expr(backfill_jobs::Column::Status, Expr::value("failed"))
            .col_expr(backfill_jobs::Column::LastError, Expr::value(reason))
            .col_expr(backfill_jobs::Column::UpdatedAt, Expr::value(now))
            .filter(backfill_jobs::Column::Id.eq(row.id))
            .exec(&self.db)
            .await;
        if let Err(e) = update {
            tracing::warn!(job_id = row.id, "Failed to persist failure: {}", e);
        }

        if let Ok(network) = row.network.parse::<Network>() {
            self.broadcast(row.id, &row.token, network, JobState::Failed, row.progress);
        }
        self.evict_terminal("failed", FAILED_RETENTION).await;
    }

    async fn requeue_with_backoff(&self, row: &backfill_jobs::Model, attempt: i32, reason: &str) {
        let now = Utc::now().naive_utc();
        let run_after = now + chrono::Duration::seconds(retry_backoff_secs(attempt));
        let update = BackfillJobs::update_many()
            .col_expr(backfill_jobs::Column::Status, Expr::value("queued"))
            .col_expr(backfill_jobs::Column::LastError, Expr::value(reason))
            .col_expr(backfill_jobs::Column::RunAfter, Expr::value(run_after))
            .col_expr(backfill_jobs::Column::UpdatedAt, Expr::value(now))
            .filter(backfill_jobs::Column::Id.eq(row.id))
            .exec(&self.db)
            .await;
        if let Err(e) = update {
            tracing::warn!(job_id = row.id, "Failed to requeue: {}", e);
        } else {
            tracing::info!(
                job_id = row.id,
                attempt,
                retry_in_secs = retry_backoff_secs(attempt),
                "Backfill attempt requeued with backoff"
            );
        }
    }

    /// Keep only the newest `keep` rows in a terminal state.
    async fn evict_terminal(&self, state: &str, keep: u64) {
        let stale = BackfillJobs::find()
            .filter(backfill_jobs::Column::Queue.eq(self.queue_name.clone()))
            .filter(backfill_jobs::Column::Status.eq(state))
            .order_by(backfill_jobs::Column::UpdatedAt, Order::Desc)
            .offset(keep)
            .limit(1000)
            .all(&self.db)
            .await;

        let stale = match stale {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Retention scan failed: {}", e);
                return;
            }
        };
        if stale.is_empty() {
            return;
        }

        let ids: Vec<i64> = stale.iter().map(|r| r.id).collect();
        let evicted = BackfillJobs::delete_many()
            .filter(backfill_jobs::Column::Id.is_in(ids))
            .exec(&self.db)
            .await;
        match evicted {
            Ok(res) => tracing::debug!(state, evicted = res.rows_affected, "Retention eviction"),
            Err(e) => tracing::warn!("Retention eviction failed: {}", e),
        }
    }

    fn broadcast(&self, job_id: i64, token: &str, network: Network, state: JobState, progress: i32) {
        // Ignore errors if no subscribers
        let _ = self.events.send(JobEvent {
            job_id,
            token: token.to_string(),
            network,
            state,
            progress,
        });
    }
}

/// Persists checkpoints to the job row and mirrors them to subscribers.
struct QueueProgress<'a> {
    queue: &'a JobQueue,
    job_id: i64,
    token: String,
    network: Network,
}

#[async_trait::async_trait]
impl ProgressSink for QueueProgress<'_> {
    async fn report(&self, progress: i32) {
        let update = BackfillJobs::update_many()
            .col_expr(backfill_jobs::Column::Progress, Expr::value(progress))
            .col_expr(
                backfill_jobs::Column::UpdatedAt,
                Expr::value(Utc::now().naive_utc()),
            )
            .filter(backfill_jobs::Column::Id.eq(self.job_id))
            .exec(&self.queue.db)
            .await;
        if let Err(e) = update {
            tracing::debug!(job_id = self.job_id, "Progress update dropped: {}", e);
        }
        self.queue
            .broadcast(self.job_id, &self.token, self.network, JobState::Active, progress);
    }
}
