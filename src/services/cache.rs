//! Ephemeral price cache.
//!
//! Callers treat the cache as a pure optimization: a miss, an absent layer
//! and a timed-out backend all look the same. The fingerprint generator is
//! shared so every consumer lands on identical keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::time::Duration;

use crate::models::price::{CachedPrice, Network};

/// Canonical cache key for a point query:
/// `price:{token_lower}:{network_lower}:{iso_timestamp}`.
pub fn price_fingerprint(token: &str, network: Network, at: &DateTime<Utc>) -> String {
    format!(
        "price:{}:{}:{}",
        token.to_lowercase(),
        network,
        at.format("%Y-%m-%dT%H:%M:%SZ")
    )
}

#[async_trait]
pub trait PriceCache: Send + Sync {
    /// Miss and backend failure are both `None`.
    async fn get(&self, key: &str) -> Option<CachedPrice>;

    /// Best-effort; never surfaces an error.
    async fn put(&self, key: &str, value: CachedPrice);
}

/// In-process TTL cache.
pub struct MemoryPriceCache {
    cache: Cache<String, CachedPrice>,
}

impl MemoryPriceCache {
    pub fn new(ttl_seconds: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(ttl_seconds))
            .build();
        Self { cache }
    }
}

#[async_trait]
impl PriceCache for MemoryPriceCache {
    async fn get(&self, key: &str) -> Option<CachedPrice> {
        self.cache.get(key).await
    }

    async fn put(&self, key: &str, value: CachedPrice) {
        self.cache.insert(key.to_string(), value).await;
    }
}
