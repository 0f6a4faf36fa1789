//! In-memory fakes behind the oracle's seam traits. Pipeline and worker
//! suites exercise the real composition logic against these.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use price_oracle::jobs::backfill::ProgressSink;
use price_oracle::models::price::{CachedPrice, Network, PricePoint};
use price_oracle::services::cache::PriceCache;
use price_oracle::services::price_store::{PriceStore, WriteOutcome};
use price_oracle::services::upstream::{LaunchDateSource, SpotPriceSource, UpstreamOutcome};

type Key = (String, String, i64);

/// BTreeMap-backed price store with the same uniqueness and straddling
/// semantics as the SQL one, plus a switch to simulate an outage.
#[derive(Default)]
pub struct MemoryPriceStore {
    rows: Mutex<BTreeMap<Key, PricePoint>>,
    down: AtomicBool,
}

impl MemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn seed(&self, points: &[PricePoint]) {
        let mut rows = self.rows.lock().unwrap();
        for point in points {
            rows.insert(
                (
                    point.token.clone(),
                    point.network.as_str().to_string(),
                    point.unix_ts,
                ),
                point.clone(),
            );
        }
    }

    fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceStore for MemoryPriceStore {
    async fn get_by_exact(
        &self,
        token: &str,
        network: Network,
        unix_ts: i64,
    ) -> Option<PricePoint> {
        if self.is_down() {
            return None;
        }
        let rows = self.rows.lock().unwrap();
        rows.get(&(token.to_string(), network.as_str().to_string(), unix_ts))
            .cloned()
    }

    async fn get_straddling(
        &self,
        token: &str,
        network: Network,
        unix_ts: i64,
    ) -> (Option<PricePoint>, Option<PricePoint>) {
        if self.is_down() {
            return (None, None);
        }
        let rows = self.rows.lock().unwrap();
        let token = token.to_string();
        let net = network.as_str().to_string();

        let before = rows
            .range((token.clone(), net.clone(), i64::MIN)..=(token.clone(), net.clone(), unix_ts))
            .next_back()
            .map(|(_, p)| p.clone());
        let after = rows
            .range((token.clone(), net.clone(), unix_ts)..=(token, net, i64::MAX))
            .next()
            .map(|(_, p)| p.clone());
        (before, after)
    }

    async fn get_range(
        &self,
        token: &str,
        network: Network,
        from_ts: i64,
        to_ts: i64,
    ) -> Vec<PricePoint> {
        if self.is_down() {
            return Vec::new();
        }
        let rows = self.rows.lock().unwrap();
        let token = token.to_string();
        let net = network.as_str().to_string();
        rows.range((token.clone(), net.clone(), from_ts)..=(token, net, to_ts))
            .map(|(_, p)| p.clone())
            .collect()
    }

    async fn insert(&self, point: &PricePoint) -> WriteOutcome {
        if self.is_down() {
            return WriteOutcome::Dropped;
        }
        let mut rows = self.rows.lock().unwrap();
        let key = (
            point.token.clone(),
            point.network.as_str().to_string(),
            point.unix_ts,
        );
        if rows.contains_key(&key) {
            WriteOutcome::Duplicate
        } else {
            rows.insert(key, point.clone());
            WriteOutcome::Inserted
        }
    }

    async fn insert_many(&self, points: &[PricePoint]) -> usize {
        let mut inserted = 0;
        for point in points {
            if self.insert(point).await == WriteOutcome::Inserted {
                inserted += 1;
            }
        }
        inserted
    }
}

/// HashMap-backed cache without TTL; enough to observe hit/miss behavior.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CachedPrice>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: &str, value: CachedPrice) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl PriceCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<CachedPrice> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    async fn put(&self, key: &str, value: CachedPrice) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }
}

/// Scriptable upstream: a default outcome plus per-timestamp overrides.
pub struct StubUpstream {
    default: UpstreamOutcome,
    by_ts: Mutex<HashMap<i64, UpstreamOutcome>>,
    calls: AtomicUsize,
}

impl StubUpstream {
    pub fn returning(price: f64) -> Self {
        Self::with_default(UpstreamOutcome::Found(price))
    }

    pub fn no_data() -> Self {
        Self::with_default(UpstreamOutcome::NoData)
    }

    pub fn transient(reason: &str) -> Self {
        Self::with_default(UpstreamOutcome::Transient(reason.to_string()))
    }

    pub fn with_default(default: UpstreamOutcome) -> Self {
        Self {
            default,
            by_ts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_at(&self, unix_ts: i64, outcome: UpstreamOutcome) {
        self.by_ts.lock().unwrap().insert(unix_ts, outcome);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpotPriceSource for StubUpstream {
    async fn fetch_spot_price(
        &self,
        _token: &str,
        _network: Network,
        at: DateTime<Utc>,
    ) -> UpstreamOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.by_ts
            .lock()
            .unwrap()
            .get(&at.timestamp())
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Fixed first-transfer answer.
pub struct StubLaunch {
    pub first: Option<DateTime<Utc>>,
}

impl StubLaunch {
    pub fn at(iso: &str) -> Self {
        Self {
            first: Some(
                DateTime::parse_from_rfc3339(iso)
                    .expect("valid launch date")
                    .with_timezone(&Utc),
            ),
        }
    }

    pub fn unknown() -> Self {
        Self { first: None }
    }
}

#[async_trait]
impl LaunchDateSource for StubLaunch {
    async fn first_transfer(&self, _token: &str, _network: Network) -> Option<DateTime<Utc>> {
        self.first
    }
}

/// Records every checkpoint a worker reports.
#[derive(Default)]
pub struct RecordingProgress {
    checkpoints: Mutex<Vec<i32>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoints(&self) -> Vec<i32> {
        self.checkpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn report(&self, progress: i32) {
        self.checkpoints.lock().unwrap().push(progress);
    }
}
