// src/bin/run_backfill.rs
//
// One-shot backfill against the configured store and upstream, bypassing the
// queue. Useful for seeding a fresh deployment or repairing a range.

use std::env;
use std::sync::Arc;

use chrono::NaiveDate;
use sea_orm::Database;
use uuid::Uuid;

use migration::MigratorTrait;
use price_oracle::config::OracleConfig;
use price_oracle::jobs::backfill::{run_backfill, ProgressSink, WorkerContext};
use price_oracle::models::backfill::BackfillJobSpec;
use price_oracle::models::price::Network;
use price_oracle::services::price_store::SqlPriceStore;
use price_oracle::services::upstream::MarketDataService;

struct PrintProgress;

#[async_trait::async_trait]
impl ProgressSink for PrintProgress {
    async fn report(&self, progress: i32) {
        println!("   Progress: {}%", progress);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Usage: cargo run --bin run_backfill -- ETH ethereum [2024-01-01] [2024-01-31]
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <token> [network] [start-date] [end-date]", args[0]);
        std::process::exit(1);
    }

    let config = OracleConfig::from_env()?;

    let token = args[1].clone();
    let network = match args.get(2) {
        Some(raw) => raw
            .parse::<Network>()
            .map_err(|_| format!("unknown network: {}", raw))?,
        None => config.upstream_default_network,
    };
    let start_date = args
        .get(3)
        .map(|raw| raw.parse::<NaiveDate>())
        .transpose()?;
    let end_date = args
        .get(4)
        .map(|raw| raw.parse::<NaiveDate>())
        .transpose()?;

    let db = Database::connect(&config.store_uri).await?;
    migration::Migrator::up(&db, None).await?;

    let store = Arc::new(SqlPriceStore::new(db));
    let upstream = Arc::new(MarketDataService::new(
        config.upstream_api_key.clone(),
        config.upstream_base_url.clone(),
        config.upstream_recent_window_secs,
    ));
    let ctx = WorkerContext {
        store,
        upstream: upstream.clone(),
        launch: upstream,
    };

    let spec = BackfillJobSpec {
        token: token.to_uppercase(),
        network,
        start_date,
        end_date,
        request_id: Uuid::new_v4().to_string(),
    };

    println!(
        "Backfilling {} on {} ({} to {})...",
        spec.token,
        spec.network,
        spec.start_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "creation date".to_string()),
        spec.end_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "today".to_string()),
    );

    let result = run_backfill(&ctx, &spec, &PrintProgress, None).await?;

    println!("\nBackfill complete!");
    println!("   Persisted: {}", result.prices_processed);
    println!(
        "   Range: {} to {}",
        result.time_range.start, result.time_range.end
    );
    println!("   Duration: {}ms", result.duration_ms);
    if !result.errors.is_empty() {
        println!("   Errors ({}):", result.errors.len());
        for error in &result.errors {
            println!("     {}", error);
        }
    }

    Ok(())
}
