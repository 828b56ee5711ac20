//! # Checkpointed ledger rollups
//!
//! Periodically recomputes two aggregate tables from the append-only ledger:
//!
//! - `output_buckets`: volume and counts per (time bucket, asset)
//! - `address_balances`: running totals per (address, asset)
//!
//! ## Run lifecycle
//!
//! ```text
//! scheduler tick
//!     ↓
//! CheckpointCoordinator: bootstrap live row → recover backup OR claim window
//!     ↓
//! OutputBucketAggregator (window start .. ∞) → result watermark
//!     ↓
//! AddressBalanceAggregator (addresses active in window, full history)
//!     ↓
//! commit: delete own backup row
//!     ↓
//! RetentionPruner (best-effort)
//! ```
//!
//! Both aggregate tables are written with full-replace semantics, so a run
//! that crashes after a partial write is simply repeated from the same window
//! by the next tick.
//!
//! ## Module Organization
//!
//! - `types` - Ledger rows, checkpoint state, aggregate rows
//! - `checkpoint` - Watermark/claim state machine and ingestion hook
//! - `buckets` / `balances` - The two aggregation passes
//! - `replace` - Full-overwrite writer used by both passes
//! - `retention` - Bucket pruning
//! - `engine` - Run service (store init, run lock, deadline)
//! - `scheduler` - Tick loop with shutdown signal

pub mod balances;
pub mod buckets;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod replace;
pub mod retention;
pub mod scheduler;
pub mod types;

// Re-export commonly used types
pub use balances::AddressBalanceAggregator;
pub use buckets::{BucketPassResult, OutputBucketAggregator};
pub use checkpoint::{
    round_down_to_boundary, CheckpointCoordinator, HighWaterFeed, ProcessingWindow,
    SqliteHighWaterFeed, WindowOrigin,
};
pub use config::RollupConfig;
pub use db::Store;
pub use engine::{run_pass, Clock, FixedClock, RollupService, RunContext, RunReport, SystemClock};
pub use error::{Result, RollupError};
pub use replace::{replace_all, ReplaceRow};
pub use retention::RetentionPruner;
pub use scheduler::{rollup_scheduler_task, SchedulerHandle, SchedulerSummary};
pub use types::{
    AddressAssetBalance, CheckpointState, LedgerOutput, OutputAddress, OutputBucket, StateId, UNSPENT,
};
