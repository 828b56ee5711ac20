//! Core data types for the rollup pipeline
//!
//! Ledger rows (`LedgerOutput`, `OutputAddress`) are written by the ingestion
//! pipeline and only read here. Everything else is owned by this crate.

use super::error::{Result, RollupError};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Sentinel stored in `redeeming_transaction_id` for an unspent output
pub const UNSPENT: &str = "";

/// Transaction output as written by the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOutput {
    pub id: String,
    pub transaction_id: String,
    pub asset_id: String,
    pub amount: Decimal,
    pub created_at: i64,
    pub redeeming_transaction_id: String,
}

impl LedgerOutput {
    /// Select list matching [`LedgerOutput::from_row`], for `ledger_outputs o`
    pub const COLUMNS: &'static str =
        "o.id, o.transaction_id, o.asset_id, o.amount, o.created_at, o.redeeming_transaction_id";

    /// Build from the first six columns of a row selected with [`Self::COLUMNS`]
    pub fn from_row(row: &rusqlite::Row<'_>) -> Result<Self> {
        let raw_amount: String = row.get(3)?;
        Ok(Self {
            id: row.get(0)?,
            transaction_id: row.get(1)?,
            asset_id: row.get(2)?,
            amount: parse_amount(&raw_amount)?,
            created_at: row.get(4)?,
            redeeming_transaction_id: row.get(5)?,
        })
    }

    pub fn is_spent(&self) -> bool {
        self.redeeming_transaction_id != UNSPENT
    }
}

/// Association between an output and one of its receiving addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAddress {
    pub output_id: String,
    pub address: String,
    pub created_at: i64,
}

/// Identity of a row in `aggregation_state`
///
/// Only two rows may ever exist. `Live` carries the shared claim protocol,
/// `Backup` is the crash-recovery checkpoint of an uncommitted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateId {
    Live,
    Backup,
}

impl StateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateId::Live => "live",
            StateId::Backup => "backup",
        }
    }
}

/// One row of `aggregation_state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointState {
    pub id: StateId,
    /// Aggregation is complete up to here (unix seconds)
    pub watermark: i64,
    /// Hand-off boundary for the next processing window (unix seconds)
    pub claim_bound: i64,
}

/// Time + asset volume statistics for one rollup bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBucket {
    pub bucket_ts: i64,
    pub asset_id: String,
    pub transaction_volume: Decimal,
    pub transaction_count: i64,
    pub address_count: i64,
    pub asset_count: i64,
    pub output_count: i64,
}

/// Running totals of one address for one asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAssetBalance {
    pub address: String,
    pub asset_id: String,
    pub transaction_count: i64,
    pub total_received: Decimal,
    pub total_sent: Decimal,
    pub balance: Decimal,
    pub utxo_count: i64,
}

/// Parse a stored ledger amount
///
/// Amounts are non-negative integers persisted as decimal text.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let amount = Decimal::from_str(raw.trim())
        .map_err(|_| RollupError::InvalidAmount(raw.to_string()))?;

    if amount.is_sign_negative() || !amount.fract().is_zero() {
        return Err(RollupError::InvalidAmount(raw.to_string()));
    }

    Ok(amount.normalize())
}

/// Add two amounts, failing instead of wrapping or losing precision
pub fn add_amount(total: Decimal, amount: Decimal) -> Result<Decimal> {
    total.checked_add(amount).ok_or(RollupError::AmountOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_accepts_integers() {
        assert_eq!(parse_amount("100").unwrap(), Decimal::from(100));
        assert_eq!(parse_amount(" 0 ").unwrap(), Decimal::ZERO);
        assert_eq!(
            parse_amount("18446744073709551615").unwrap(),
            Decimal::from(u64::MAX)
        );
    }

    #[test]
    fn test_parse_amount_rejects_bad_values() {
        assert!(matches!(parse_amount("-5"), Err(RollupError::InvalidAmount(_))));
        assert!(matches!(parse_amount("1.5"), Err(RollupError::InvalidAmount(_))));
        assert!(matches!(parse_amount("abc"), Err(RollupError::InvalidAmount(_))));
    }

    #[test]
    fn test_add_amount_overflow() {
        assert!(matches!(
            add_amount(Decimal::MAX, Decimal::ONE),
            Err(RollupError::AmountOverflow)
        ));
        assert_eq!(
            add_amount(Decimal::from(100), Decimal::from(50)).unwrap(),
            Decimal::from(150)
        );
    }

    #[test]
    fn test_spent_sentinel() {
        let mut output = LedgerOutput {
            id: "o1".to_string(),
            transaction_id: "t1".to_string(),
            asset_id: "X".to_string(),
            amount: Decimal::from(10),
            created_at: 1_700_000_000,
            redeeming_transaction_id: UNSPENT.to_string(),
        };
        assert!(!output.is_spent());

        output.redeeming_transaction_id = "t2".to_string();
        assert!(output.is_spent());
    }
}
