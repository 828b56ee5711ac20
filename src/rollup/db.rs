//! SQLite store handle and schema bootstrap
//!
//! A run checks out the single connection held by [`Store`] and issues every
//! statement of that run on it. The interrupt handle lets the run deadline
//! cancel whatever statement is executing at the time.

use super::error::Result;
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{Connection, InterruptHandle};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Embedded schema files, applied in order. All use IF NOT EXISTS.
const SCHEMA_MIGRATIONS: &[(&str, &str)] = &[
    ("00_ledger.sql", include_str!("../../sql/00_ledger.sql")),
    (
        "01_aggregation_state.sql",
        include_str!("../../sql/01_aggregation_state.sql"),
    ),
    (
        "02_output_buckets.sql",
        include_str!("../../sql/02_output_buckets.sql"),
    ),
    (
        "03_address_balances.sql",
        include_str!("../../sql/03_address_balances.sql"),
    ),
];

/// Run the embedded schema migrations
///
/// Idempotent: safe to call on every startup and on a database the ingestion
/// pipeline has already populated.
pub fn run_schema_migrations(conn: &Connection) -> Result<()> {
    log::info!("🔧 Running schema migrations");

    for (name, sql) in SCHEMA_MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }

    log::info!("✅ Schema migrations completed ({} files)", SCHEMA_MIGRATIONS.len());
    Ok(())
}

/// Connection owned by the rollup service
pub struct Store {
    conn: Mutex<Connection>,
    interrupt: InterruptHandle,
}

impl Store {
    /// Open (or create) the database, apply pragmas and schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn)?;

        log::info!("✅ Rollup store opened: {}", db_path.display());
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already configured connection
    pub fn from_connection(conn: Connection) -> Self {
        let interrupt = conn.get_interrupt_handle();
        Self {
            conn: Mutex::new(conn),
            interrupt,
        }
    }

    /// Check out the connection for the duration of a run
    ///
    /// A run that panicked mid-transaction leaves nothing half-applied (the
    /// transaction rolls back on drop), so a poisoned lock is taken over.
    pub fn session(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            log::warn!("⚠️  Previous run panicked while holding the store, reusing connection");
            poisoned.into_inner()
        })
    }

    /// Abort the statement currently executing on the connection, if any
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }
}
