//! Error taxonomy for the oracle core.
//!
//! Every component translates lower-layer failures into one of these kinds
//! before they cross its boundary; no sqlx/reqwest error reaches a caller
//! verbatim.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    /// Malformed token, unknown network, unparseable or future timestamp.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The resolution pipeline exhausted every source.
    #[error("price not found")]
    NotFound,

    /// Upstream 5xx, connect failure or timeout. Swallowed by the resolver,
    /// surfaced by operational tooling.
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    /// The durable store is unreachable. Read paths degrade to empty instead
    /// of raising this; it exists for callers that must distinguish.
    #[error("price store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The queue backend was unreachable at startup; scheduling degrades to
    /// record-only.
    #[error("job queue unavailable")]
    QueueUnavailable,

    /// A schedule for the same (token, network) already exists.
    #[error("schedule already exists with id {existing_id}")]
    AlreadyExists { existing_id: String },

    /// Manual run refused because the schedule is disabled.
    #[error("schedule is disabled")]
    Disabled,

    /// A backfill attempt died; the queue retries with backoff.
    #[error("worker failure: {0}")]
    WorkerFailure(String),

    #[error("configuration error: {0}")]
    Config(String),
}
