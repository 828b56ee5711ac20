//! Rollup configuration from environment variables

use super::error::{Result, RollupError};
use serde::Serialize;
use std::env;
use std::time::Duration;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Configuration for the rollup runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, Serialize)]
pub struct RollupConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Scheduler tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// Upper bound on a single run in milliseconds
    pub run_deadline_ms: u64,

    /// Rollup bucket size in seconds
    pub bucket_secs: i64,

    /// Buckets older than the newest processed timestamp minus this are pruned
    pub retention_days: i64,

    /// How far into the future a claim pushes the live claim bound
    pub claim_horizon_days: i64,

    /// Master enable flag
    pub enabled: bool,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            db_path: "data/ledger.db".to_string(),
            tick_interval_ms: 20_000,
            run_deadline_ms: 300_000,
            bucket_secs: 60,
            retention_days: 366,
            claim_horizon_days: 365,
            enabled: true,
        }
    }
}

impl RollupConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ROLLUP_DB_PATH` (default: data/ledger.db)
    /// - `ROLLUP_TICK_INTERVAL_MS` (default: 20000)
    /// - `ROLLUP_RUN_DEADLINE_MS` (default: 300000)
    /// - `ROLLUP_BUCKET_SECS` (default: 60)
    /// - `ROLLUP_RETENTION_DAYS` (default: 366)
    /// - `ROLLUP_CLAIM_HORIZON_DAYS` (default: 365)
    /// - `ENABLE_ROLLUP` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: env::var("ROLLUP_DB_PATH").unwrap_or(defaults.db_path),

            tick_interval_ms: parse_var("ROLLUP_TICK_INTERVAL_MS")
                .unwrap_or(defaults.tick_interval_ms),

            run_deadline_ms: parse_var("ROLLUP_RUN_DEADLINE_MS")
                .unwrap_or(defaults.run_deadline_ms),

            bucket_secs: parse_var("ROLLUP_BUCKET_SECS").unwrap_or(defaults.bucket_secs),

            retention_days: parse_var("ROLLUP_RETENTION_DAYS")
                .unwrap_or(defaults.retention_days),

            claim_horizon_days: parse_var("ROLLUP_CLAIM_HORIZON_DAYS")
                .unwrap_or(defaults.claim_horizon_days),

            enabled: parse_var("ENABLE_ROLLUP").unwrap_or(defaults.enabled),
        }
    }

    /// Reject settings the run loop cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.bucket_secs <= 0 {
            return Err(RollupError::Config("ROLLUP_BUCKET_SECS must be positive".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(RollupError::Config("ROLLUP_TICK_INTERVAL_MS must be positive".into()));
        }
        if self.run_deadline_ms == 0 {
            return Err(RollupError::Config("ROLLUP_RUN_DEADLINE_MS must be positive".into()));
        }
        if self.retention_days < 0 || self.claim_horizon_days <= 0 {
            return Err(RollupError::Config(
                "retention must be non-negative and claim horizon positive".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_millis(self.run_deadline_ms)
    }

    pub fn retention_secs(&self) -> i64 {
        self.retention_days * SECS_PER_DAY
    }

    pub fn claim_horizon_secs(&self) -> i64 {
        self.claim_horizon_days * SECS_PER_DAY
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases touch process env, keep them in one test to avoid races.
    #[test]
    fn test_config_from_env() {
        for key in [
            "ROLLUP_DB_PATH",
            "ROLLUP_TICK_INTERVAL_MS",
            "ROLLUP_BUCKET_SECS",
            "ENABLE_ROLLUP",
        ] {
            env::remove_var(key);
        }

        let config = RollupConfig::from_env();
        assert_eq!(config.db_path, "data/ledger.db");
        assert_eq!(config.tick_interval_ms, 20_000);
        assert_eq!(config.run_deadline_ms, 300_000);
        assert_eq!(config.bucket_secs, 60);
        assert!(config.enabled);

        env::set_var("ROLLUP_DB_PATH", "/tmp/rollup-test.db");
        env::set_var("ROLLUP_TICK_INTERVAL_MS", "1500");
        env::set_var("ROLLUP_BUCKET_SECS", "300");
        env::set_var("ENABLE_ROLLUP", "false");

        let config = RollupConfig::from_env();
        assert_eq!(config.db_path, "/tmp/rollup-test.db");
        assert_eq!(config.tick_interval(), Duration::from_millis(1500));
        assert_eq!(config.bucket_secs, 300);
        assert!(!config.enabled);

        env::remove_var("ROLLUP_DB_PATH");
        env::remove_var("ROLLUP_TICK_INTERVAL_MS");
        env::remove_var("ROLLUP_BUCKET_SECS");
        env::remove_var("ENABLE_ROLLUP");
    }

    #[test]
    fn test_validate() {
        let config = RollupConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention_secs(), 366 * 86_400);

        let bad = RollupConfig {
            bucket_secs: 0,
            ..RollupConfig::default()
        };
        assert!(matches!(bad.validate(), Err(RollupError::Config(_))));

        let bad = RollupConfig {
            run_deadline_ms: 0,
            ..RollupConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
