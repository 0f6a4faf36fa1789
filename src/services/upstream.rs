//! Upstream market-data adapter.
//!
//! Wraps the external provider behind a typed outcome: a price, a definitive
//! "no data", or a transient failure the caller may ignore or retry. The
//! adapter itself never raises.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::models::price::Network;
use crate::services::interpolation::round_2dp;

/// Upstream request timeout.
const UPSTREAM_TIMEOUT_SECS: u64 = 10;

lazy_static! {
    /// Symbol to provider coin identifier. Tokens outside this map have no
    /// upstream data; the resolver falls through to interpolation.
    static ref COIN_IDS: HashMap<&'static str, &'static str> = HashMap::from([
        ("BTC", "bitcoin"),
        ("WBTC", "wrapped-bitcoin"),
        ("ETH", "ethereum"),
        ("WETH", "weth"),
        ("STETH", "staked-ether"),
        ("RETH", "rocket-pool-eth"),
        ("CBETH", "coinbase-wrapped-staked-eth"),
        ("USDC", "usd-coin"),
        ("USDT", "tether"),
        ("DAI", "dai"),
        ("MATIC", "matic-network"),
        ("POL", "polygon-ecosystem-token"),
        ("ARB", "arbitrum"),
        ("OP", "optimism"),
        ("LINK", "chainlink"),
        ("UNI", "uniswap"),
        ("AAVE", "aave"),
        ("CRV", "curve-dao-token"),
        ("LDO", "lido-dao"),
        ("SNX", "havven"),
        ("COMP", "compound-governance-token"),
        ("MKR", "maker"),
        ("GRT", "the-graph"),
        ("SHIB", "shiba-inu"),
        ("PEPE", "pepe"),
        ("SOL", "solana"),
        ("AVAX", "avalanche-2"),
    ]);

    /// Well-known contract addresses, keyed by `{platform}:{address_lower}`.
    static ref CONTRACT_IDS: HashMap<&'static str, &'static str> = HashMap::from([
        ("ethereum:0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "usd-coin"),
        ("ethereum:0xdac17f958d2ee523a2206206994597c13d831ec7", "tether"),
        ("ethereum:0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "weth"),
        ("ethereum:0x6b175474e89094c44da98b954eedeac495271d0f", "dai"),
        ("ethereum:0x2260fac5e5542a773aa44fbcfedf7c193bc2c599", "wrapped-bitcoin"),
        ("arbitrum-one:0x912ce59144191c1204e64559fe8253a0e49e6548", "arbitrum"),
        ("optimistic-ethereum:0x4200000000000000000000000000000000000042", "optimism"),
        ("base:0x833589fcd6edb6e08f4c7c32d4f71b54bda02913", "usd-coin"),
    ]);
}

/// Result of a spot price lookup. Errors are values, not exceptions.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamOutcome {
    /// USD price, rounded to two decimals.
    Found(f64),
    /// The provider has no data for this token/time; not retryable.
    NoData,
    /// 5xx, connect failure or timeout; the caller may retry later.
    Transient(String),
}

#[async_trait]
pub trait SpotPriceSource: Send + Sync {
    async fn fetch_spot_price(
        &self,
        token: &str,
        network: Network,
        at: DateTime<Utc>,
    ) -> UpstreamOutcome;
}

/// The opaque first-transfer capability: when did this asset first move
/// on-chain. `None` covers both "unknown asset" and provider failure.
#[async_trait]
pub trait LaunchDateSource: Send + Sync {
    async fn first_transfer(&self, token: &str, network: Network) -> Option<DateTime<Utc>>;
}

#[derive(Debug, Deserialize)]
struct SpotPriceResponse {
    #[serde(flatten)]
    coins: HashMap<String, HashMap<String, f64>>,
}

#[derive(Debug, Deserialize)]
struct HistoricalPriceResponse {
    market_data: Option<MarketData>,
}

#[derive(Debug, Deserialize)]
struct MarketData {
    current_price: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct CoinMetadataResponse {
    genesis_date: Option<String>,
}

/// Provider-backed market data service.
#[derive(Clone)]
pub struct MarketDataService {
    client: Client,
    api_key: String,
    base_url: String,
    /// Lookups within this window of now use the current-price endpoint;
    /// older ones the per-day historical endpoint.
    recent_window_secs: i64,
}

impl MarketDataService {
    pub fn new(api_key: String, base_url: String, recent_window_secs: i64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()
            .unwrap();
        Self {
            client,
            api_key,
            base_url,
            recent_window_secs,
        }
    }

    /// Map a normalized token to the provider's coin identifier.
    pub fn coin_id(token: &str, network: Network) -> Option<&'static str> {
        if token.starts_with("0x") {
            let key = format!("{}:{}", network.platform_id(), token.to_lowercase());
            CONTRACT_IDS.get(key.as_str()).copied()
        } else {
            COIN_IDS.get(token.to_uppercase().as_str()).copied()
        }
    }

    async fn fetch_current(&self, coin_id: &str) -> UpstreamOutcome {
        let url = format!("{}/simple/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("x-cg-pro-api-key", &self.api_key)
            .query(&[("ids", coin_id), ("vs_currencies", "usd")])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return UpstreamOutcome::Transient(format!("request failed: {}", e)),
        };

        let status = response.status();
        if status.is_server_error() {
            return UpstreamOutcome::Transient(format!("upstream returned {}", status));
        }
        if !status.is_success() {
            tracing::debug!(coin_id, %status, "Upstream has no current price");
            return UpstreamOutcome::NoData;
        }

        match response.json::<SpotPriceResponse>().await {
            Ok(body) => match body.coins.get(coin_id).and_then(|p| p.get("usd")) {
                Some(price) => UpstreamOutcome::Found(round_2dp(*price)),
                None => UpstreamOutcome::NoData,
            },
            Err(e) => {
                tracing::debug!(coin_id, "Malformed current-price payload: {}", e);
                UpstreamOutcome::NoData
            }
        }
    }

    async fn fetch_historical(&self, coin_id: &str, at: DateTime<Utc>) -> UpstreamOutcome {
        let url = format!("{}/coins/{}/history", self.base_url, coin_id);
        let date = at.format("%d-%m-%Y").to_string();
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("x-cg-pro-api-key", &self.api_key)
            .query(&[("date", date.as_str()), ("localization", "false")])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return UpstreamOutcome::Transient(format!("request failed: {}", e)),
        };

        let status = response.status();
        if status.is_server_error() {
            return UpstreamOutcome::Transient(format!("upstream returned {}", status));
        }
        if !status.is_success() {
            tracing::debug!(coin_id, %date, %status, "Upstream has no historical price");
            return UpstreamOutcome::NoData;
        }

        match response.json::<HistoricalPriceResponse>().await {
            Ok(body) => {
                let price = body
                    .market_data
                    .and_then(|m| m.current_price.get("usd").copied());
                match price {
                    Some(price) => UpstreamOutcome::Found(round_2dp(price)),
                    None => UpstreamOutcome::NoData,
                }
            }
            Err(e) => {
                tracing::debug!(coin_id, %date, "Malformed historical payload: {}", e);
                UpstreamOutcome::NoData
            }
        }
    }
}

#[async_trait]
impl SpotPriceSource for MarketDataService {
    async fn fetch_spot_price(
        &self,
        token: &str,
        network: Network,
        at: DateTime<Utc>,
    ) -> UpstreamOutcome {
        let Some(coin_id) = Self::coin_id(token, network) else {
            tracing::debug!(token, network = %network, "Token has no provider mapping");
            return UpstreamOutcome::NoData;
        };

        let age_secs = Utc::now().signed_duration_since(at).num_seconds();
        if age_secs <= self.recent_window_secs {
            self.fetch_current(coin_id).await
        } else {
            self.fetch_historical(coin_id, at).await
        }
    }
}

#[async_trait]
impl LaunchDateSource for MarketDataService {
    async fn first_transfer(&self, token: &str, network: Network) -> Option<DateTime<Utc>> {
        let coin_id = Self::coin_id(token, network)?;

        let url = format!("{}/coins/{}", self.base_url, coin_id);
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("x-cg-pro-api-key", &self.api_key)
            .query(&[("localization", "false"), ("market_data", "false")])
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            tracing::debug!(coin_id, status = %response.status(), "No coin metadata upstream");
            return None;
        }

        let body = response.json::<CoinMetadataResponse>().await.ok()?;
        let genesis = body.genesis_date?;
        let date = genesis.parse::<chrono::NaiveDate>().ok()?;
        date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
    }
}
