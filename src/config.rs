//! Environment-driven configuration.
//!
//! The composition root loads this once and hands pieces to each service;
//! nothing else reads the environment.

use std::env;

use crate::error::OracleError;
use crate::models::price::Network;

/// Default TTL for resolver cache entries, seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Window within which the upstream adapter asks for the current price
/// instead of a historical one. Provider-specific heuristic, overridable.
pub const DEFAULT_RECENT_WINDOW_SECS: i64 = 24 * 3600;

/// Worker pool size for the backfill queue.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub store_uri: String,
    /// Absent means the cache layer is not deployed; the resolver runs
    /// without it.
    pub cache_uri: Option<String>,
    pub cache_ttl_seconds: u64,
    pub queue_uri: String,
    pub queue_name: String,
    pub upstream_api_key: String,
    pub upstream_base_url: String,
    pub upstream_default_network: Network,
    pub upstream_recent_window_secs: i64,
    pub worker_concurrency: usize,
}

impl OracleConfig {
    pub fn from_env() -> Result<Self, OracleError> {
        let store_uri = env::var("STORE_URI")
            .map_err(|_| OracleError::Config("STORE_URI must be set".to_string()))?;

        let cache_uri = env::var("CACHE_URI").ok().filter(|v| !v.is_empty());

        let cache_ttl_seconds = match env::var("CACHE_TTL_SECONDS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                OracleError::Config(format!("CACHE_TTL_SECONDS is not a number: {}", raw))
            })?,
            Err(_) => DEFAULT_CACHE_TTL_SECS,
        };

        // The queue shares the store database unless pointed elsewhere
        let queue_uri = env::var("QUEUE_URI")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| store_uri.clone());

        let queue_name =
            env::var("QUEUE_NAME").unwrap_or_else(|_| "price-backfill".to_string());

        let upstream_api_key = env::var("UPSTREAM_API_KEY")
            .map_err(|_| OracleError::Config("UPSTREAM_API_KEY must be set".to_string()))?;

        let upstream_base_url = env::var("UPSTREAM_BASE_URL")
            .unwrap_or_else(|_| "https://pro-api.coingecko.com/api/v3".to_string());

        let upstream_default_network = match env::var("UPSTREAM_DEFAULT_NETWORK") {
            Ok(raw) => raw
                .parse::<Network>()
                .map_err(|_| OracleError::Config(format!("unknown network: {}", raw)))?,
            Err(_) => Network::Ethereum,
        };

        let worker_concurrency = match env::var("WORKER_CONCURRENCY") {
            Ok(raw) => raw.parse::<usize>().map_err(|_| {
                OracleError::Config(format!("WORKER_CONCURRENCY is not a number: {}", raw))
            })?,
            Err(_) => DEFAULT_WORKER_CONCURRENCY,
        };

        Ok(Self {
            store_uri,
            cache_uri,
            cache_ttl_seconds,
            queue_uri,
            queue_name,
            upstream_api_key,
            upstream_base_url,
            upstream_default_network,
            upstream_recent_window_secs: DEFAULT_RECENT_WINDOW_SECS,
            worker_concurrency,
        })
    }
}
