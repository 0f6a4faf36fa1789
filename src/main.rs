use std::sync::Arc;

use migration::MigratorTrait;
use sea_orm::Database;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use price_oracle::config::OracleConfig;
use price_oracle::jobs::backfill::WorkerContext;
use price_oracle::jobs::queue::JobQueue;
use price_oracle::services::cache::{MemoryPriceCache, PriceCache};
use price_oracle::services::price_store::SqlPriceStore;
use price_oracle::services::resolver::PriceResolver;
use price_oracle::services::schedules::ScheduleRegistry;
use price_oracle::services::upstream::MarketDataService;
use price_oracle::OracleState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,price_oracle=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = OracleConfig::from_env().expect("Invalid configuration");

    // Connect to the durable store
    tracing::info!("Connecting to price store...");
    let db = Database::connect(&config.store_uri)
        .await
        .expect("Failed to connect to price store");

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    let store = Arc::new(SqlPriceStore::new(db.clone()));

    // Cache layer is optional; the resolver runs without it
    let cache: Option<Arc<dyn PriceCache>> = match &config.cache_uri {
        Some(uri) => {
            tracing::info!(
                ttl_secs = config.cache_ttl_seconds,
                "Cache layer enabled at {}",
                uri
            );
            Some(Arc::new(MemoryPriceCache::new(config.cache_ttl_seconds)))
        }
        None => {
            tracing::warn!("CACHE_URI not set, running without a cache layer");
            None
        }
    };

    let upstream = Arc::new(MarketDataService::new(
        config.upstream_api_key.clone(),
        config.upstream_base_url.clone(),
        config.upstream_recent_window_secs,
    ));

    let resolver = Arc::new(PriceResolver::new(store.clone(), cache, upstream.clone()));

    // Queue backend is optional; scheduling degrades to record-only. When it
    // shares the store database, reuse the pool instead of reconnecting.
    let queue = if config.queue_uri == config.store_uri {
        Some(Arc::new(JobQueue::with_connection(
            db.clone(),
            &config.queue_name,
        )))
    } else {
        match JobQueue::connect(&config.queue_uri, &config.queue_name).await {
            Ok(queue) => Some(Arc::new(queue)),
            Err(e) => {
                tracing::warn!("Starting without a job queue: {}", e);
                None
            }
        }
    };

    let schedules = Arc::new(ScheduleRegistry::new(queue.clone()));

    // Start the backfill worker pool
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Some(queue) = &queue {
        let ctx = WorkerContext {
            store: store.clone(),
            upstream: upstream.clone(),
            launch: upstream.clone(),
        };
        queue.start_workers(ctx, config.worker_concurrency, shutdown_rx.clone());
        tracing::info!(
            concurrency = config.worker_concurrency,
            queue = %config.queue_name,
            "Backfill workers started"
        );
    }

    let _state = OracleState {
        db,
        resolver,
        schedules,
        queue,
    };

    tracing::info!("Price oracle running; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");

    tracing::info!("Shutting down; workers stop at the next batch boundary");
    let _ = shutdown_tx.send(true);

    // Give in-flight jobs a moment to persist partial results
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
}
