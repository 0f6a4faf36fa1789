//! Durable price store.
//!
//! All mutations funnel through the `(token, network, unix_ts)` uniqueness
//! constraint; concurrent writers race freely and the second insert becomes a
//! no-op. When the database is unreachable the store degrades: reads return
//! empty, writes are dropped, and nothing here raises.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, Order, QueryFilter, QueryOrder, Set,
};

use crate::entities::{prelude::*, price_points};
use crate::models::price::{Network, PricePoint, PriceSource};

/// Outcome of a single insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// Unique-key conflict; the row already existed.
    Duplicate,
    /// Store unreachable; the write was discarded.
    Dropped,
}

#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn get_by_exact(
        &self,
        token: &str,
        network: Network,
        unix_ts: i64,
    ) -> Option<PricePoint>;

    /// Newest point at or before `unix_ts` and oldest point at or after it.
    /// A point exactly at `unix_ts` appears on both sides.
    async fn get_straddling(
        &self,
        token: &str,
        network: Network,
        unix_ts: i64,
    ) -> (Option<PricePoint>, Option<PricePoint>);

    /// All points in `[from_ts, to_ts]`, ascending.
    async fn get_range(
        &self,
        token: &str,
        network: Network,
        from_ts: i64,
        to_ts: i64,
    ) -> Vec<PricePoint>;

    async fn insert(&self, point: &PricePoint) -> WriteOutcome;

    /// Bulk insert tolerating per-row conflicts; returns rows inserted.
    async fn insert_many(&self, points: &[PricePoint]) -> usize;
}

/// SeaORM-backed store over the `prices` table.
#[derive(Clone)]
pub struct SqlPriceStore {
    db: DatabaseConnection,
}

impl SqlPriceStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn to_point(model: price_points::Model) -> Option<PricePoint> {
        let network = model.network.parse::<Network>().ok()?;
        let source = model.source.parse::<PriceSource>().ok()?;
        let price = model.price.to_string().parse::<f64>().ok()?;
        Some(PricePoint {
            token: model.token,
            network,
            unix_ts: model.unix_ts,
            price,
            source,
            confidence: model.confidence,
        })
    }

    fn to_active_model(point: &PricePoint) -> Option<price_points::ActiveModel> {
        let price = Decimal::from_f64_retain(point.price)?;
        let now = Utc::now().naive_utc();
        Some(price_points::ActiveModel {
            token: Set(point.token.clone()),
            network: Set(point.network.to_string()),
            unix_ts: Set(point.unix_ts),
            iso_date: Set(point.iso_date()),
            price: Set(price),
            source: Set(point.source.to_string()),
            confidence: Set(point.confidence),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        })
    }

    fn log_read_failure(op: &str, err: DbErr) {
        tracing::warn!("Price store {} failed, degrading to empty: {}", op, err);
    }
}

#[async_trait]
impl PriceStore for SqlPriceStore {
    async fn get_by_exact(
        &self,
        token: &str,
        network: Network,
        unix_ts: i64,
    ) -> Option<PricePoint> {
        let found = Prices::find()
            .filter(price_points::Column::Token.eq(token))
            .filter(price_points::Column::Network.eq(network.as_str()))
            .filter(price_points::Column::UnixTs.eq(unix_ts))
            .one(&self.db)
            .await;

        match found {
            Ok(model) => model.and_then(Self::to_point),
            Err(e) => {
                Self::log_read_failure("exact lookup", e);
                None
            }
        }
    }

    async fn get_straddling(
        &self,
        token: &str,
        network: Network,
        unix_ts: i64,
    ) -> (Option<PricePoint>, Option<PricePoint>) {
        let before = Prices::find()
            .filter(price_points::Column::Token.eq(token))
            .filter(price_points::Column::Network.eq(network.as_str()))
            .filter(price_points::Column::UnixTs.lte(unix_ts))
            .order_by(price_points::Column::UnixTs, Order::Desc)
            .one(&self.db)
            .await;

        let after = Prices::find()
            .filter(price_points::Column::Token.eq(token))
            .filter(price_points::Column::Network.eq(network.as_str()))
            .filter(price_points::Column::UnixTs.gte(unix_ts))
            .order_by(price_points::Column::UnixTs, Order::Asc)
            .one(&self.db)
            .await;

        let before = match before {
            Ok(model) => model.and_then(Self::to_point),
            Err(e) => {
                Self::log_read_failure("straddling lookup (before)", e);
                None
            }
        };
        let after = match after {
            Ok(model) => model.and_then(Self::to_point),
            Err(e) => {
                Self::log_read_failure("straddling lookup (after)", e);
                None
            }
        };

        (before, after)
    }

    async fn get_range(
        &self,
        token: &str,
        network: Network,
        from_ts: i64,
        to_ts: i64,
    ) -> Vec<PricePoint> {
        let found = Prices::find()
            .filter(price_points::Column::Token.eq(token))
            .filter(price_points::Column::Network.eq(network.as_str()))
            .filter(price_points::Column::UnixTs.gte(from_ts))
            .filter(price_points::Column::UnixTs.lte(to_ts))
            .order_by(price_points::Column::UnixTs, Order::Asc)
            .all(&self.db)
            .await;

        match found {
            Ok(models) => models.into_iter().filter_map(Self::to_point).collect(),
            Err(e) => {
                Self::log_read_failure("range query", e);
                Vec::new()
            }
        }
    }

    async fn insert(&self, point: &PricePoint) -> WriteOutcome {
        let Some(active) = Self::to_active_model(point) else {
            tracing::warn!(
                token = %point.token,
                unix_ts = point.unix_ts,
                "Dropping price with non-representable value"
            );
            return WriteOutcome::Dropped;
        };

        let result = Prices::insert(active)
            .on_conflict(
                OnConflict::columns([
                    price_points::Column::Token,
                    price_points::Column::Network,
                    price_points::Column::UnixTs,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(&self.db)
            .await;

        match result {
            Ok(_) => WriteOutcome::Inserted,
            Err(DbErr::RecordNotInserted) => {
                tracing::debug!(
                    token = %point.token,
                    network = %point.network,
                    unix_ts = point.unix_ts,
                    "Price already stored, skipping"
                );
                WriteOutcome::Duplicate
            }
            Err(e) => {
                tracing::warn!("Price store insert failed, dropping write: {}", e);
                WriteOutcome::Dropped
            }
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
