//! Backfill worker: populate the daily price history of one (token, network)
//! from its creation date to now.
//!
//! Every write is idempotent on the store's uniqueness key, so a retried or
//! cancelled job resumes cleanly; re-running a fully covered range inserts
//! nothing.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::error::OracleError;
use crate::models::backfill::{BackfillJobSpec, BackfillResult, TimeRange};
use crate::models::price::{iso_from_unix, PricePoint, PriceSource};
use crate::services::interpolation::{interpolate_between, straddle_in};
use crate::services::price_store::PriceStore;
use crate::services::upstream::{LaunchDateSource, SpotPriceSource, UpstreamOutcome};

/// Pause between upstream fetch batches, rate-limit courtesy.
const INTER_BATCH_DELAY_MS: u64 = 100;

/// Fallback history depth when the creation date cannot be detected.
const FALLBACK_HISTORY_DAYS: i64 = 365;

/// How many error strings a result carries.
const MAX_REPORTED_ERRORS: usize = 10;

/// Collaborators a worker needs; the composition root assembles one and
/// shares it across the pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn PriceStore>,
    pub upstream: Arc<dyn SpotPriceSource>,
    pub launch: Arc<dyn LaunchDateSource>,
}

/// Receives progress checkpoints (0..100). The queue persists and broadcasts
/// them; tests record them.
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: i32);
}

/// Sink for callers that do not track progress.
pub struct NoopProgress;

#[async_trait::async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _progress: i32) {}
}

/// Batch size for upstream fetches: a tenth of the workload, clamped to
/// [10, 100].
pub fn fetch_batch_size(total: usize) -> usize {
    total.div_ceil(10).clamp(10, 100)
}

/// UTC-midnight unix timestamps from `start` to `end` inclusive, ascending.
pub fn daily_grid(start: NaiveDate, end: NaiveDate) -> Vec<i64> {
    let mut grid = Vec::new();
    let mut date = start;
    while date <= end {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            grid.push(midnight.and_utc().timestamp());
        }
        date = date + ChronoDuration::days(1);
    }
    grid
}

fn day_key(unix_ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Execute one backfill job.
///
/// Progress checkpoints are part of the contract: 10 creation date, 20 grid,
/// 30 existing rows, 40 missing set, linear to 80 through the fetch batches,
/// 90 interpolation, 100 persisted. When `shutdown` flips the worker stops at
/// the next batch boundary, persists what it has and returns cleanly.
pub async fn run_backfill(
    ctx: &WorkerContext,
    spec: &BackfillJobSpec,
    progress: &dyn ProgressSink,
    shutdown: Option<watch::Receiver<bool>>,
) -> Result<BackfillResult, OracleError> {
    let started = Instant::now();
    let token = spec.token.clone();
    let network = spec.network;

    // 1. Creation-date detection
    let start_date = match spec.start_date {
        Some(date) => date,
        None => match ctx.launch.first_transfer(&token, network).await {
            Some(first) => first.date_naive(),
            None => {
                let fallback = (Utc::now() - ChronoDuration::days(FALLBACK_HISTORY_DAYS)).date_naive();
                tracing::warn!(
                    token = %token,
                    network = %network,
                    request_id = %spec.request_id,
                    "Creation date unavailable, falling back to {}",
                    fallback
                );
                fallback
            }
        },
    };
    progress.report(10).await;

    let end_date = spec.end_date.unwrap_or_else(|| Utc::now().date_naive());
    if start_date > end_date {
        return Err(OracleError::WorkerFailure(format!(
            "start date {} is after end date {}",
            start_date, end_date
        )));
    }

    // 2. Grid generation
    let grid = daily_grid(start_date, end_date);
    progress.report(20).await;

    let range_start = *grid.first().unwrap_or(&0);
    let range_end = *grid.last().unwrap_or(&0);
    let time_range = TimeRange {
        start: iso_from_unix(range_start),
        end: iso_from_unix(range_end),
    };

    // 3. Diff against store
    let existing = ctx
        .store
        .get_range(&token, network, range_start, range_end)
        .await;
    progress.report(30).await;

    let covered: HashSet<String> = existing.iter().map(|p| day_key(p.unix_ts)).collect();
    let missing: Vec<i64> = grid
        .iter()
        .copied()
        .filter(|ts| !covered.contains(&day_key(*ts)))
        .collect();
    progress.report(40).await;

    tracing::info!(
        token = %token,
        network = %network,
        request_id = %spec.request_id,
        grid = grid.len(),
        existing = existing.len(),
        missing = missing.len(),
        "Backfill workload computed"
    );

    // 4. Batched upstream fetch
    let mut fetched: Vec<PricePoint> = Vec::new();
    let mut errors: Vec<String> = Vec::new();
    let mut cancelled = false;

    let batch_size = fetch_batch_size(missing.len());
    let batches: Vec<&[i64]> = missing.chunks(batch_size).collect();
    let total_batches = batches.len();

    for (index, batch) in batches.iter().enumerate() {
        if let Some(rx) = &shutdown {
            if *rx.borrow() {
                tracing::info!(
                    token = %token,
                    request_id = %spec.request_id,
                    "Shutdown requested, stopping at batch boundary"
                );
                cancelled = true;
                break;
            }
        }

        for &ts in batch.iter() {
            let Some(at) = DateTime::<Utc>::from_timestamp(ts, 0) else {
                continue;
            };
            match ctx.upstream.fetch_spot_price(&token, network, at).await {
                UpstreamOutcome::Found(price) => fetched.push(PricePoint {
                    token: token.clone(),
                    network,
                    unix_ts: ts,
                    price,
                    source: PriceSource::Upstream,
                    confidence: 1.0,
                }),
                UpstreamOutcome::NoData => {}
                UpstreamOutcome::Transient(reason) => {
                    errors.push(format!("{}: {}", day_key(ts), reason));
                }
            }
        }

        let done = index + 1;
        progress
            .report(40 + ((done as f64 / total_batches as f64) * 40.0) as i32)
            .await;

        if done < total_batches {
            tokio::time::sleep(std::time::Duration::from_millis(INTER_BATCH_DELAY_MS)).await;
        }
    }

    // 5. Interpolate residual gaps over the union of known points
    let mut interpolated: Vec<PricePoint> = Vec::new();
    if !cancelled {
        let mut union: Vec<PricePoint> = existing.iter().cloned().chain(fetched.iter().cloned()).collect();
        union.sort_by_key(|p| p.unix_ts);

        let fetched_days: HashSet<String> = fetched.iter().map(|p| day_key(p.unix_ts)).collect();
        for &ts in missing.iter() {
            if fetched_days.contains(&day_key(ts)) {
                continue;
            }
            let (before, after) = straddle_in(&union, ts);
            if let (Some(b), Some(a)) = (before, after) {
                if let Some(result) = interpolate_between(b, a, ts) {
                    interpolated.push(PricePoint {
                        token: token.clone(),
                        network,
                        unix_ts: ts,
                        price: result.price,
                        source: PriceSource::Interpolated,
                        confidence: result.confidence,
                    });
                }
            }
        }
    }
    progress.report(90).await;

    // 6. Persist
    let mut to_persist = fetched;
    to_persist.append(&mut interpolated);
    to_persist.sort_by_key(|p| p.unix_ts);
    let prices_processed = ctx.store.insert_many(&to_persist).await;
    progress.report(100).await;

    errors.truncate(MAX_REPORTED_ERRORS);

    tracing::info!(
        token = %token,
        network = %network,
        request_id = %spec.request_id,
        prices_processed,
        errors = errors.len(),
        cancelled,
        "Backfill finished in {}ms",
        started.elapsed().as_millis()
    );

    Ok(BackfillResult {
        prices_processed,
        time_range,
        duration_ms: started.elapsed().as_millis() as u64,
        errors,
    })
}
