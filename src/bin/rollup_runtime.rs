//! Rollup Runtime - checkpointed ledger aggregation
//!
//! This binary runs the rollup scheduler against the ledger database:
//! - Loads configuration from the environment (.env supported)
//! - Opens the store and bootstraps the schema on the first run
//! - Runs once at startup, then on every tick
//! - Shuts down gracefully on CTRL+C (the in-flight run is allowed to finish)
//!
//! Usage:
//!   cargo run --release --bin rollup_runtime
//!
//! Environment variables:
//!   ROLLUP_DB_PATH - SQLite database path (default: data/ledger.db)
//!   ENABLE_ROLLUP - Master switch (default: true)
//!   ROLLUP_TICK_INTERVAL_MS - Tick interval (default: 20000)
//!   ROLLUP_RUN_DEADLINE_MS - Per-run deadline (default: 300000)
//!   ROLLUP_BUCKET_SECS - Bucket size (default: 60)
//!   ROLLUP_RETENTION_DAYS - Bucket retention (default: 366)
//!   ROLLUP_CLAIM_HORIZON_DAYS - Claim bound offset (default: 365)
//!   RUST_LOG - Logging level (default: info)

use dotenv::dotenv;
use ledger_rollup::rollup::{RollupConfig, RollupService, SchedulerHandle};
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Rollup Runtime");

    let config = RollupConfig::from_env();

    if !config.enabled {
        info!("⚠️  Rollup is DISABLED (set ENABLE_ROLLUP=true to activate)");
        return Ok(());
    }

    config.validate()?;

    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Tick interval: {}ms", config.tick_interval_ms);
    info!("   ├─ Run deadline: {}ms", config.run_deadline_ms);
    info!("   ├─ Bucket size: {}s", config.bucket_secs);
    info!("   └─ Retention: {} days", config.retention_days);
    log::debug!("Config: {}", serde_json::to_string(&config)?);

    let service = Arc::new(RollupService::new(config));
    let scheduler = SchedulerHandle::spawn(service);

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    let summary = scheduler.shutdown().await;
    info!(
        "✅ Rollup runtime stopped ({} runs, {} failed)",
        summary.runs, summary.failures
    );
    Ok(())
}
