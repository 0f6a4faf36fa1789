//! Price resolver: cache, store, upstream, interpolation, in that order,
//! short-circuiting at the first source that answers.
//!
//! The pipeline is deterministic for fixed inputs and store contents; the
//! only nondeterminism is the upstream call itself. Write-through failures
//! never surface to the caller.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::OracleError;
use crate::models::price::{CachedPrice, Network, PricePoint, PriceSource, ResolvedPrice};
use crate::services::cache::{price_fingerprint, PriceCache};
use crate::services::interpolation;
use crate::services::price_store::PriceStore;
use crate::services::upstream::{SpotPriceSource, UpstreamOutcome};

/// Cache operations slower than this count as misses.
const CACHE_OP_TIMEOUT_MS: u64 = 500;

lazy_static! {
    static ref ADDRESS_REGEX: Regex = Regex::new(r"^0x[0-9a-fA-F]{1,40}$").unwrap();
    static ref SYMBOL_REGEX: Regex = Regex::new(r"^[A-Za-z0-9]{2,10}$").unwrap();
}

/// A validated, normalized resolve request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveQuery {
    /// Uppercased symbol or lowercased 0x-address
    pub token: String,
    pub network: Network,
    pub at: DateTime<Utc>,
}

/// Validate and normalize raw request fields. No I/O happens here; a bad
/// request never reaches the upstream provider.
pub fn validate_request(
    token: &str,
    network: &str,
    at: Option<&str>,
) -> Result<ResolveQuery, OracleError> {
    let token = token.trim();
    let token = if ADDRESS_REGEX.is_match(token) {
        token.to_lowercase()
    } else if SYMBOL_REGEX.is_match(token) {
        token.to_uppercase()
    } else {
        return Err(OracleError::InvalidInput(format!(
            "token must be a 2-10 character symbol or 0x-prefixed address, got '{}'",
            token
        )));
    };

    let network = network.trim().parse::<Network>().map_err(|_| {
        OracleError::InvalidInput(format!(
            "network must be one of ethereum, polygon, arbitrum, optimism, base; got '{}'",
            network
        ))
    })?;

    let at = match at {
        Some(raw) => {
            let parsed = DateTime::parse_from_rfc3339(raw).map_err(|_| {
                OracleError::InvalidInput(format!("timestamp is not a valid ISO-8601 instant: '{}'", raw))
            })?;
            let parsed = parsed.with_timezone(&Utc);
            if parsed > Utc::now() {
                return Err(OracleError::InvalidInput(format!(
                    "timestamp is in the future: '{}'",
                    raw
                )));
            }
            parsed
        }
        None => Utc::now(),
    };

    Ok(ResolveQuery { token, network, at })
}

pub struct PriceResolver {
    store: Arc<dyn PriceStore>,
    cache: Option<Arc<dyn PriceCache>>,
    upstream: Arc<dyn SpotPriceSource>,
}

impl PriceResolver {
    pub fn new(
        store: Arc<dyn PriceStore>,
        cache: Option<Arc<dyn PriceCache>>,
        upstream: Arc<dyn SpotPriceSource>,
    ) -> Self {
        Self {
            store,
            cache,
            upstream,
        }
    }

    /// Resolve the USD price of `(token, network)` at `at` (now if absent).
    pub async fn resolve(
        &self,
        token: &str,
        network: &str,
        at: Option<&str>,
    ) -> Result<ResolvedPrice, OracleError> {
        let query = validate_request(token, network, at)?;
        let fingerprint = price_fingerprint(&query.token, query.network, &query.at);
        let unix_ts = query.at.timestamp();
        let iso = query.at.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        // 1. Cache probe. A hit is always reported as source=cache, whatever
        //    the embedded source was.
        if let Some(hit) = self.cache_get(&fingerprint).await {
            tracing::debug!(key = %fingerprint, "Cache hit");
            return Ok(ResolvedPrice {
                price: hit.price,
                source: PriceSource::Cache,
                timestamp: hit.timestamp,
                token: query.token,
                network: query.network,
            });
        }

        // 2. Exact store lookup keeps the stored source.
        if let Some(point) = self
            .store
            .get_by_exact(&query.token, query.network, unix_ts)
            .await
        {
            self.cache_put(&fingerprint, &point, &iso).await;
            return Ok(ResolvedPrice {
                price: point.price,
                source: point.source,
                timestamp: iso,
                token: query.token,
                network: query.network,
            });
        }

        // 3. Upstream. Transient failures degrade to "no data" and the
        //    pipeline keeps going.
        match self
            .upstream
            .fetch_spot_price(&query.token, query.network, query.at)
            .await
        {
            UpstreamOutcome::Found(price) => {
                let point = PricePoint {
                    token: query.token.clone(),
                    network: query.network,
                    unix_ts,
                    price,
                    source: PriceSource::Upstream,
                    confidence: 1.0,
                };
                self.write_through(&fingerprint, &point, &iso).await;
                return Ok(ResolvedPrice {
                    price,
                    source: PriceSource::Upstream,
                    timestamp: iso,
                    token: query.token,
                    network: query.network,
                });
            }
            UpstreamOutcome::NoData => {}
            UpstreamOutcome::Transient(reason) => {
                tracing::warn!(
                    token = %query.token,
                    network = %query.network,
                    "Transient upstream error, falling back to interpolation: {}",
                    reason
                );
            }
        }

        // 4. Interpolation between the straddling stored points.
        if let Some(result) =
            interpolation::interpolate_at(self.store.as_ref(), &query.token, query.network, unix_ts)
                .await
        {
            let point = PricePoint {
                token: query.token.clone(),
                network: query.network,
                unix_ts,
                price: result.price,
                source: PriceSource::Interpolated,
                confidence: result.confidence,
            };
            self.write_through(&fingerprint, &point, &iso).await;
            return Ok(ResolvedPrice {
                price: result.price,
                source: PriceSource::Interpolated,
                timestamp: iso,
                token: query.token,
                network: query.network,
            });
        }

        // 5. Exhausted.
        Err(OracleError::NotFound)
    }

    async fn cache_get(&self, key: &str) -> Option<CachedPrice> {
        let cache = self.cache.as_ref()?;
        match timeout(Duration::from_millis(CACHE_OP_TIMEOUT_MS), cache.get(key)).await {
            Ok(hit) => hit,
            Err(_) => {
                tracing::warn!(key, "Cache get timed out, treating as miss");
                None
            }
        }
    }

    /// Persist then cache a freshly resolved point. Failures on either side
    /// are logged and dropped.
    async fn write_through(&self, key: &str, point: &PricePoint, iso: &str) {
        let outcome = self.store.insert(point).await;
        tracing::debug!(
            token = %point.token,
            network = %point.network,
            unix_ts = point.unix_ts,
            source = %point.source,
            ?outcome,
            "Write-through to store"
        );
        self.cache_put(key, point, iso).await;
    }

    async fn cache_put(&self, key: &str, point: &PricePoint, iso: &str) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let value = CachedPrice {
            price: point.price,
            source: point.source,
            timestamp: iso.to_string(),
            cached_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        };
        if timeout(
            Duration::from_millis(CACHE_OP_TIMEOUT_MS),
            cache.put(key, value),
        )
        .await
        .is_err()
        {
            tracing::warn!(key, "Cache put timed out, dropping entry");
        }
    }
}
