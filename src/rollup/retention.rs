//! Retention pruning for `output_buckets`
//!
//! Best-effort: a failed prune is logged and the run still succeeds.

use super::error::Result;
use rusqlite::{params, Connection};

#[derive(Debug, Clone, Copy)]
pub struct RetentionPruner {
    retention_secs: i64,
}

impl RetentionPruner {
    pub fn new(retention_secs: i64) -> Self {
        Self { retention_secs }
    }

    pub fn cutoff(&self, watermark: i64) -> i64 {
        watermark.saturating_sub(self.retention_secs)
    }

    /// Delete buckets older than `watermark - retention`
    pub fn prune(&self, conn: &Connection, watermark: i64) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM output_buckets WHERE bucket_ts < ?1",
            params![self.cutoff(watermark)],
        )?;
        Ok(deleted)
    }

    /// Prune, logging instead of returning failures
    pub fn prune_best_effort(&self, conn: &Connection, watermark: i64) -> usize {
        match self.prune(conn, watermark) {
            Ok(deleted) => {
                if deleted > 0 {
                    log::info!(
                        "🧹 Pruned {} buckets older than {}",
                        deleted,
                        self.cutoff(watermark)
                    );
                }
                deleted
            }
            Err(e) => {
                log::warn!("⚠️  Bucket pruning failed: {}", e);
                0
            }
        }
    }
}
