//! Ledger rollup service
//!
//! Crash-safe periodic aggregation over a SQLite transaction-output ledger.
//! See [`rollup`] for the run lifecycle.

pub mod rollup;
pub mod sqlite_pragma;
