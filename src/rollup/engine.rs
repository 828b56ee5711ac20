//! Rollup service: one checkpointed aggregation run at a time
//!
//! [`RollupService`] owns the store handle (opened lazily, once), the
//! process-local run lock and the run deadline. The store work of a run
//! executes on the blocking pool against a single connection.

use super::balances::AddressBalanceAggregator;
use super::buckets::OutputBucketAggregator;
use super::checkpoint::{CheckpointCoordinator, WindowOrigin};
use super::config::RollupConfig;
use super::db::Store;
use super::error::{Result, RollupError};
use super::retention::RetentionPruner;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};

/// Cancellation flag shared between a run and its deadline
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancelled: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail fast once the run has been cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RollupError::Cancelled);
        }
        Ok(())
    }
}

/// Source of "now" in unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Summary of one successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub origin: WindowOrigin,
    pub window_start: i64,
    /// Aggregation is complete up to here: the newer of the adopted
    /// watermark and the newest ledger timestamp seen
    pub watermark: i64,
    pub buckets_written: usize,
    pub balances_written: usize,
    pub buckets_pruned: usize,
    pub duration_ms: u128,
}

pub(crate) fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// One full run against an already checked-out connection
///
/// Bootstrap/claim failures abort before any aggregation. A failure in either
/// pass returns early with the backup row still in place, so the next run
/// recovers the same window.
pub fn run_pass(
    conn: &mut Connection,
    config: &RollupConfig,
    now: i64,
    ctx: &RunContext,
) -> Result<RunReport> {
    config.validate()?;

    let coordinator = CheckpointCoordinator::new(config.bucket_secs, config.claim_horizon_secs());
    let claimed = coordinator.bootstrap(conn)?.claim(conn, now)?;
    let window = claimed.window();

    log::info!(
        "🔄 Rollup window {:?}: start {} (watermark {})",
        window.origin,
        format_ts(window.start),
        window.watermark
    );

    ctx.check()?;
    let buckets = OutputBucketAggregator::new(config.bucket_secs).run(conn, window.start, ctx)?;
    let balances_written = AddressBalanceAggregator::new().run(conn, window.start, ctx)?;

    ctx.check()?;
    let window = claimed.commit(conn)?.window();

    // A pass-through window start may be a parked claim bound far in the
    // future; only prune relative to timestamps actually seen.
    let buckets_pruned = match buckets.max_created_at {
        Some(_) => RetentionPruner::new(config.retention_secs())
            .prune_best_effort(conn, buckets.watermark()),
        None => 0,
    };

    // The pass may only have found rows in the reprocessed boundary bucket,
    // before the adopted watermark. Everything up to that watermark is still
    // accounted for.
    let committed = buckets.watermark().max(window.watermark);

    log::info!(
        "✅ Processed up to {} ({} buckets, {} balances)",
        format_ts(committed),
        buckets.buckets_written,
        balances_written
    );

    Ok(RunReport {
        origin: window.origin,
        window_start: window.start,
        watermark: committed,
        buckets_written: buckets.buckets_written,
        balances_written,
        buckets_pruned,
        duration_ms: 0,
    })
}

/// Shared rollup service, passed by `Arc` to the scheduler
pub struct RollupService {
    config: RollupConfig,
    clock: Arc<dyn Clock>,
    store: OnceCell<Arc<Store>>,
    run_lock: Mutex<()>,
}

impl RollupService {
    pub fn new(config: RollupConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RollupConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            store: OnceCell::new(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RollupConfig {
        &self.config
    }

    /// Store handle, opened on first use
    ///
    /// Concurrent first callers wait on the same initialisation; a failed
    /// open leaves the cell empty so the next run tries again.
    pub async fn store(&self) -> Result<Arc<Store>> {
        self.store
            .get_or_try_init(|| async {
                let db_path = self.config.db_path.clone();
                let store = tokio::task::spawn_blocking(move || Store::open(db_path))
                    .await
                    .map_err(|e| RollupError::Worker(e.to_string()))??;
                Ok::<_, RollupError>(Arc::new(store))
            })
            .await
            .cloned()
    }

    /// Execute one run, waiting for any run already in flight
    pub async fn refresh(&self) -> Result<RunReport> {
        let _guard = self.run_lock.lock().await;

        let store = self.store().await?;
        let ctx = RunContext::new();
        let now = self.clock.now();
        let started = Instant::now();

        let mut worker = {
            let store = store.clone();
            let ctx = ctx.clone();
            let config = self.config.clone();
            tokio::task::spawn_blocking(move || {
                let mut conn = store.session();
                run_pass(&mut conn, &config, now, &ctx)
            })
        };

        let deadline = self.config.run_deadline();
        let outcome = match tokio::time::timeout(deadline, &mut worker).await {
            Ok(joined) => joined.map_err(|e| RollupError::Worker(e.to_string()))?,
            Err(_) => {
                log::error!(
                    "⏱️  Rollup run exceeded {}ms deadline, interrupting store",
                    deadline.as_millis()
                );
                ctx.cancel();
                store.interrupt();
                // Hold the run lock until the worker has released the connection
                if let Ok(Err(e)) = (&mut worker).await {
                    log::debug!("Interrupted run unwound with: {}", e);
                }
                return Err(RollupError::DeadlineExceeded(deadline.as_millis()));
            }
        };

        outcome.map(|mut report| {
            report.duration_ms = started.elapsed().as_millis();
            report
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::checkpoint::load_state;
    use crate::rollup::db::run_schema_migrations;
    use crate::rollup::types::StateId;

    const NOW: i64 = 1_700_000_000;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_schema_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_run_context_cancel() {
        let ctx = RunContext::new();
        let shared = ctx.clone();
        assert!(ctx.check().is_ok());

        shared.cancel();
        assert!(matches!(ctx.check(), Err(RollupError::Cancelled)));
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(NOW);
        clock.advance(20);
        assert_eq!(clock.now(), NOW + 20);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn test_run_pass_on_empty_ledger_commits() {
        let mut conn = test_conn();

        let report = run_pass(&mut conn, &RollupConfig::default(), NOW, &RunContext::new()).unwrap();

        assert_eq!(report.origin, WindowOrigin::Claimed);
        assert_eq!(report.window_start, 0);
        assert_eq!(report.buckets_written, 0);
        assert!(load_state(&conn, StateId::Backup).unwrap().is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["origin"], "claimed");
        assert_eq!(json["window_start"], 0);
    }

    #[test]
    fn test_cancelled_run_keeps_backup_for_recovery() {
        let mut conn = test_conn();
        let config = RollupConfig::default();

        let ctx = RunContext::new();
        ctx.cancel();
        let result = run_pass(&mut conn, &config, NOW, &ctx);
        assert!(matches!(result, Err(RollupError::Cancelled)));

        let backup = load_state(&conn, StateId::Backup).unwrap().unwrap();

        let report = run_pass(&mut conn, &config, NOW + 20, &RunContext::new()).unwrap();
        assert_eq!(report.origin, WindowOrigin::Recovered);
        assert_eq!(report.window_start, backup.watermark - backup.watermark.rem_euclid(60));
        assert!(load_state(&conn, StateId::Backup).unwrap().is_none());
    }

    #[test]
    fn test_watermark_never_behind_adopted_one() {
        let mut conn = test_conn();
        let boundary = 1_700_000_040;
        conn.execute_batch(&format!(
            "INSERT INTO ledger_outputs (id, transaction_id, asset_id, amount, created_at)
             VALUES ('o1', 't1', 'X', '10', {early});
             INSERT INTO output_addresses (output_id, address, created_at)
             VALUES ('o1', 'a1', {early});
             INSERT INTO aggregation_state VALUES ('live', {adopted}, {adopted});
             INSERT INTO aggregation_state VALUES ('backup', {adopted}, {adopted});",
            early = boundary + 10,
            adopted = boundary + 50,
        ))
        .unwrap();

        let report = run_pass(&mut conn, &RollupConfig::default(), NOW, &RunContext::new()).unwrap();

        // Only the boundary bucket was rescanned, its newest row is older
        assert_eq!(report.origin, WindowOrigin::Recovered);
        assert_eq!(report.window_start, boundary);
        assert_eq!(report.buckets_written, 1);
        assert_eq!(report.watermark, boundary + 50);
    }

    #[test]
    fn test_invalid_config_rejected_before_claim() {
        let mut conn = test_conn();
        let config = RollupConfig {
            bucket_secs: 0,
            ..RollupConfig::default()
        };

        let result = run_pass(&mut conn, &config, NOW, &RunContext::new());

        assert!(matches!(result, Err(RollupError::Config(_))));
        assert!(load_state(&conn, StateId::Live).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_does_not_wedge_service() {
        let dir = tempfile::tempdir().unwrap();
        let config = RollupConfig {
            db_path: dir.path().join("ledger.db").to_string_lossy().into_owned(),
            bucket_secs: 0,
            ..RollupConfig::default()
        };
        let service = RollupService::with_clock(config, Arc::new(FixedClock::new(NOW)));

        for _ in 0..2 {
            assert!(matches!(service.refresh().await, Err(RollupError::Config(_))));
        }
        let store = service.store().await.unwrap();
        assert!(load_state(&store.session(), StateId::Backup).unwrap().is_none());
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(0), "1970-01-01T00:00:00+00:00");
    }
}
