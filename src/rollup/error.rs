//! Error taxonomy for rollup runs
//!
//! Every variant is fatal for the run that produced it and never for the
//! process: the scheduler logs it and retries on the next tick.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollupError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Live aggregation state row missing after bootstrap")]
    LiveStateMissing,

    #[error("Invalid ledger amount: {0:?}")]
    InvalidAmount(String),

    #[error("Amount overflow while summing ledger outputs")]
    AmountOverflow,

    #[error("Run exceeded deadline of {0}ms")]
    DeadlineExceeded(u128),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run worker failed: {0}")]
    Worker(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RollupError {
    /// True for failures caused by the deadline firing mid-run
    pub fn is_deadline(&self) -> bool {
        match self {
            RollupError::DeadlineExceeded(_) | RollupError::Cancelled => true,
            RollupError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::OperationInterrupted
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RollupError>;
