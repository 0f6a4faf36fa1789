use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of supported networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
}

impl Network {
    pub const ALL: [Network; 5] = [
        Network::Ethereum,
        Network::Polygon,
        Network::Arbitrum,
        Network::Optimism,
        Network::Base,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon",
            Network::Arbitrum => "arbitrum",
            Network::Optimism => "optimism",
            Network::Base => "base",
        }
    }

    /// Provider-side platform identifier for contract-address lookups.
    pub fn platform_id(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon-pos",
            Network::Arbitrum => "arbitrum-one",
            Network::Optimism => "optimistic-ethereum",
            Network::Base => "base",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethereum" => Ok(Network::Ethereum),
            "polygon" => Ok(Network::Polygon),
            "arbitrum" => Ok(Network::Arbitrum),
            "optimism" => Ok(Network::Optimism),
            "base" => Ok(Network::Base),
            _ => Err(()),
        }
    }
}

/// Where a resolved price came from. Only `Upstream` and `Interpolated` are
/// ever persisted; `Cache` exists purely on the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Cache,
    Upstream,
    Interpolated,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Cache => "cache",
            PriceSource::Upstream => "upstream",
            PriceSource::Interpolated => "interpolated",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(PriceSource::Cache),
            "upstream" => Ok(PriceSource::Upstream),
            "interpolated" => Ok(PriceSource::Interpolated),
            _ => Err(()),
        }
    }
}

/// The atomic persisted record: one USD price for one (token, network,
/// second). The store enforces uniqueness on that triple.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub token: String,
    pub network: Network,
    pub unix_ts: i64,
    pub price: f64,
    pub source: PriceSource,
    /// 1.0 for upstream points, the engine's score for interpolated ones
    pub confidence: f64,
}

impl PricePoint {
    pub fn iso_date(&self) -> String {
        iso_from_unix(self.unix_ts)
    }
}

/// Render unix seconds as the canonical ISO-8601 instant used in cache keys
/// and persisted iso_date columns.
pub fn iso_from_unix(unix_ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| unix_ts.to_string())
}

/// Resolver output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub price: f64,
    pub source: PriceSource,
    /// ISO-8601 instant the price is for
    pub timestamp: String,
    pub token: String,
    pub network: Network,
}

/// Value stored under a cache fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPrice {
    pub price: f64,
    pub source: PriceSource,
    pub timestamp: String,
    pub cached_at: String,
}

/// Wire-level error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status_code: None,
            details: None,
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            path: None,
        }
    }
}

/// Supported granularities for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl HistoryInterval {
    pub fn seconds(&self) -> i64 {
        match self {
            HistoryInterval::OneMinute => 60,
            HistoryInterval::FiveMinutes => 300,
            HistoryInterval::FifteenMinutes => 900,
            HistoryInterval::ThirtyMinutes => 1800,
            HistoryInterval::OneHour => 3600,
            HistoryInterval::FourHours => 14400,
            HistoryInterval::OneDay => 86400,
        }
    }
}

impl FromStr for HistoryInterval {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(HistoryInterval::OneMinute),
            "5m" => Ok(HistoryInterval::FiveMinutes),
            "15m" => Ok(HistoryInterval::FifteenMinutes),
            "30m" => Ok(HistoryInterval::ThirtyMinutes),
            "1h" => Ok(HistoryInterval::OneHour),
            "4h" => Ok(HistoryInterval::FourHours),
            "1d" => Ok(HistoryInterval::OneDay),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_round_trips_lowercase() {
        for network in Network::ALL {
            assert_eq!(network.as_str().parse::<Network>(), Ok(network));
        }
        assert_eq!("Ethereum".parse::<Network>(), Ok(Network::Ethereum));
        assert!("solana".parse::<Network>().is_err());
    }

    #[test]
    fn source_serializes_lowercase() {
        let json = serde_json::to_string(&PriceSource::Interpolated).unwrap();
        assert_eq!(json, "\"interpolated\"");
    }

    #[test]
    fn iso_rendering_is_canonical() {
        assert_eq!(iso_from_unix(1704067200), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn history_interval_parses_all_granularities() {
        for (raw, secs) in [
            ("1m", 60),
            ("5m", 300),
            ("15m", 900),
            ("30m", 1800),
            ("1h", 3600),
            ("4h", 14400),
            ("1d", 86400),
        ] {
            assert_eq!(raw.parse::<HistoryInterval>().unwrap().seconds(), secs);
        }
        assert!("2h".parse::<HistoryInterval>().is_err());
    }

    #[test]
    fn cached_price_uses_camel_case() {
        let cached = CachedPrice {
            price: 2300.5,
            source: PriceSource::Upstream,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            cached_at: "2024-01-01T00:05:00Z".to_string(),
        };
        let json = serde_json::to_value(&cached).unwrap();
        assert!(json.get("cachedAt").is_some());
    }
}
