//! Replace writer: full-overwrite persistence for recomputed rows
//!
//! Every write leaves the stored row exactly equal to the value written.
//! Existing values are never merged or added to, which is what makes
//! recomputing a bucket or balance from the same (or an earlier) window safe.

use super::error::Result;
use super::types::{AddressAssetBalance, OutputBucket};
use super::RunContext;
use rusqlite::{params, Connection};

/// A row that can be written with full-replace semantics
pub trait ReplaceRow {
    /// Table name, for logging
    const TABLE: &'static str;

    /// Insert the row, or overwrite every non-key column of the existing one
    fn replace(&self, conn: &Connection) -> Result<()>;
}

impl ReplaceRow for OutputBucket {
    const TABLE: &'static str = "output_buckets";

    fn replace(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO output_buckets (
                bucket_ts, asset_id, transaction_volume, transaction_count,
                address_count, asset_count, output_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(bucket_ts, asset_id) DO UPDATE SET
                transaction_volume = excluded.transaction_volume,
                transaction_count = excluded.transaction_count,
                address_count = excluded.address_count,
                asset_count = excluded.asset_count,
                output_count = excluded.output_count
            "#,
        )?;

        stmt.execute(params![
            self.bucket_ts,
            self.asset_id,
            self.transaction_volume.to_string(),
            self.transaction_count,
            self.address_count,
            self.asset_count,
            self.output_count,
        ])?;

        Ok(())
    }
}

impl ReplaceRow for AddressAssetBalance {
    const TABLE: &'static str = "address_balances";

    fn replace(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO address_balances (
                address, asset_id, transaction_count,
                total_received, total_sent, balance, utxo_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(address, asset_id) DO UPDATE SET
                transaction_count = excluded.transaction_count,
                total_received = excluded.total_received,
                total_sent = excluded.total_sent,
                balance = excluded.balance,
                utxo_count = excluded.utxo_count
            "#,
        )?;

        stmt.execute(params![
            self.address,
            self.asset_id,
            self.transaction_count,
            self.total_received.to_string(),
            self.total_sent.to_string(),
            self.balance.to_string(),
            self.utxo_count,
        ])?;

        Ok(())
    }
}

/// Replace-write a batch of rows, stopping at the first failure
///
/// Returns the number of rows written.
pub fn replace_all<R: ReplaceRow>(conn: &Connection, rows: &[R], ctx: &RunContext) -> Result<usize> {
    for row in rows {
        ctx.check()?;
        row.replace(conn)?;
    }

    log::debug!("✅ Replaced {} rows in {}", rows.len(), R::TABLE);
    Ok(rows.len())
}
