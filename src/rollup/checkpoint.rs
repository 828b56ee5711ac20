//! Checkpoint coordinator: watermark claim protocol and crash recovery
//!
//! State lives in two rows of `aggregation_state`:
//!
//! - `live` is shared with the ingestion pipeline. Ingestion lowers
//!   `claim_bound` to the earliest ledger timestamp it writes; a claim moves
//!   `claim_bound` into `watermark` and parks `claim_bound` a long way in the
//!   future, so any timestamp ingestion writes afterwards compares earlier.
//! - `backup` is a snapshot of `live` taken right after a claim. While it
//!   exists the run that wrote it has not committed, and the next run resumes
//!   from `backup.watermark` instead of claiming again.
//!
//! The transitions are encoded as types:
//! `CheckpointCoordinator` → [`Bootstrapped`] → [`Claimed`] → [`Committed`].

use super::error::{Result, RollupError};
use super::types::{CheckpointState, StateId};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

/// Initial watermark and claim bound: one second past the epoch, so the first
/// run rebuilds the full ledger history.
pub const BOOTSTRAP_TIMESTAMP: i64 = 1;

/// Round a watermark onto the bucket grid without ever skipping data
///
/// Rounds to the nearest boundary; if that lands after the watermark, steps
/// back one full bucket. Reprocessing an extra bucket is fine, skipping one
/// is not.
pub fn round_down_to_boundary(watermark: i64, bucket_secs: i64) -> i64 {
    let offset = watermark.rem_euclid(bucket_secs);
    let floor = watermark - offset;
    let rounded = if offset * 2 >= bucket_secs {
        floor.saturating_add(bucket_secs)
    } else {
        floor
    };

    if rounded > watermark {
        rounded - bucket_secs
    } else {
        rounded
    }
}

/// Read one state row
pub fn load_state(conn: &Connection, id: StateId) -> Result<Option<CheckpointState>> {
    let state = conn
        .query_row(
            "SELECT watermark, claim_bound FROM aggregation_state WHERE id = ?1",
            [id.as_str()],
            |row| {
                Ok(CheckpointState {
                    id,
                    watermark: row.get(0)?,
                    claim_bound: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(state)
}

/// How the current processing window was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowOrigin {
    /// Fresh claim against `live`
    Claimed,
    /// Adopted from a `backup` row left by an uncommitted run
    Recovered,
}

/// The window a run aggregates over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingWindow {
    pub origin: WindowOrigin,
    /// Watermark recorded in the backup row this run owns
    pub watermark: i64,
    /// `watermark` rounded down onto the bucket grid
    pub start: i64,
}

/// Entry point of the checkpoint state machine
#[derive(Debug, Clone, Copy)]
pub struct CheckpointCoordinator {
    bucket_secs: i64,
    claim_horizon_secs: i64,
}

impl CheckpointCoordinator {
    pub fn new(bucket_secs: i64, claim_horizon_secs: i64) -> Self {
        Self {
            bucket_secs,
            claim_horizon_secs,
        }
    }

    /// Ensure the `live` row exists and can be read back
    ///
    /// Concurrent bootstraps from other processes are tolerated: the insert is
    /// ignored when the row is already there.
    pub fn bootstrap(self, conn: &Connection) -> Result<Bootstrapped> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO aggregation_state (id, watermark, claim_bound)
             VALUES (?1, ?2, ?2)",
            params![StateId::Live.as_str(), BOOTSTRAP_TIMESTAMP],
        )?;
        if inserted > 0 {
            log::info!("🌱 Bootstrapped live aggregation state (full history rebuild)");
        }

        let live = load_state(conn, StateId::Live)?.ok_or_else(|| {
            log::error!("❌ Unable to find live aggregation state");
            RollupError::LiveStateMissing
        })?;

        Ok(Bootstrapped {
            coordinator: self,
            live,
        })
    }
}

/// `live` row is known to exist
#[derive(Debug)]
pub struct Bootstrapped {
    coordinator: CheckpointCoordinator,
    live: CheckpointState,
}

impl Bootstrapped {
    pub fn live(&self) -> CheckpointState {
        self.live
    }

    /// Establish this run's window: recover from `backup` or claim a new one
    ///
    /// Recovery detection, the claim update and the backup snapshot share one
    /// IMMEDIATE transaction, so no other writer can observe a claimed `live`
    /// row without its backup.
    pub fn claim(self, conn: &mut Connection, now: i64) -> Result<Claimed> {
        let bucket_secs = self.coordinator.bucket_secs;
        let claim_bound = now.saturating_add(self.coordinator.claim_horizon_secs);

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (origin, watermark) = match load_state(&tx, StateId::Backup)? {
            Some(backup) => {
                log::warn!(
                    "♻️  Found uncommitted backup state, resuming from watermark {}",
                    backup.watermark
                );
                (WindowOrigin::Recovered, backup.watermark)
            }
            None => {
                let claimed = tx
                    .query_row(
                        "UPDATE aggregation_state
                         SET watermark = claim_bound, claim_bound = ?1
                         WHERE id = ?2
                         RETURNING watermark, claim_bound",
                        params![claim_bound, StateId::Live.as_str()],
                        |row| {
                            Ok(CheckpointState {
                                id: StateId::Live,
                                watermark: row.get(0)?,
                                claim_bound: row.get(1)?,
                            })
                        },
                    )
                    .optional()?
                    .ok_or(RollupError::LiveStateMissing)?;

                tx.execute(
                    "INSERT INTO aggregation_state (id, watermark, claim_bound)
                     VALUES (?1, ?2, ?3)",
                    params![
                        StateId::Backup.as_str(),
                        claimed.watermark,
                        claimed.claim_bound
                    ],
                )?;

                log::debug!(
                    "🔒 Claimed window from watermark {} (claim bound parked at {})",
                    claimed.watermark,
                    claimed.claim_bound
                );
                (WindowOrigin::Claimed, claimed.watermark)
            }
        };

        tx.commit()?;

        let window = ProcessingWindow {
            origin,
            watermark,
            start: round_down_to_boundary(watermark, bucket_secs),
        };
        Ok(Claimed { window })
    }
}

/// A window is owned by this run and backed up for crash recovery
#[derive(Debug)]
pub struct Claimed {
    window: ProcessingWindow,
}

impl Claimed {
    pub fn window(&self) -> ProcessingWindow {
        self.window
    }

    /// Drop the backup row this run is working from
    ///
    /// Guarded on the watermark so a backup written by a different run is
    /// left alone.
    pub fn commit(self, conn: &Connection) -> Result<Committed> {
        let deleted = conn.execute(
            "DELETE FROM aggregation_state WHERE id = ?1 AND watermark = ?2",
            params![StateId::Backup.as_str(), self.window.watermark],
        )?;

        if deleted == 0 {
            log::warn!(
                "⚠️  Backup state for watermark {} was already gone at commit",
                self.window.watermark
            );
        }

        Ok(Committed {
            window: self.window,
        })
    }
}

/// Both passes succeeded and the backup is cleared
#[derive(Debug)]
pub struct Committed {
    window: ProcessingWindow,
}

impl Committed {
    pub fn window(&self) -> ProcessingWindow {
        self.window
    }
}

/// Hook through which ledger ingestion reports newly written rows
///
/// Ingestion calls this after writing rows stamped `created_at`; the next
/// claim then starts no later than that timestamp.
pub trait HighWaterFeed: Send + Sync {
    /// Returns true when the live claim bound moved
    fn observe(&self, conn: &Connection, created_at: i64) -> Result<bool>;
}

/// [`HighWaterFeed`] writing straight into `aggregation_state`
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteHighWaterFeed;

impl HighWaterFeed for SqliteHighWaterFeed {
    fn observe(&self, conn: &Connection, created_at: i64) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE aggregation_state SET claim_bound = ?1
             WHERE id = ?2 AND claim_bound > ?1",
            params![created_at, StateId::Live.as_str()],
        )?;
        Ok(updated > 0)
    }
}
