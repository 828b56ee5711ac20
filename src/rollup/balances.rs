//! Address balance aggregator
//!
//! Balances are running totals, so an address touched by the window is
//! recomputed from its whole history. Cost follows the number of addresses
//! active in the window, not the size of the ledger.

use super::error::Result;
use super::replace::replace_all;
use super::types::{add_amount, AddressAssetBalance, LedgerOutput};
use super::RunContext;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};

#[derive(Default)]
struct BalanceAccumulator {
    transactions: HashSet<String>,
    total_received: Decimal,
    total_sent: Decimal,
    balance: Decimal,
    utxo_count: i64,
}

/// Recomputes `address_balances` for addresses active in the window
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressBalanceAggregator;

impl AddressBalanceAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Full-history balances of every address with an association at or
    /// after `window_start`
    pub fn compute(
        &self,
        conn: &Connection,
        window_start: i64,
        ctx: &RunContext,
    ) -> Result<Vec<AddressAssetBalance>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, oa.address
             FROM ledger_outputs o
             JOIN output_addresses oa ON oa.output_id = o.id
             WHERE oa.address IN (
                 SELECT DISTINCT address FROM output_addresses WHERE created_at >= ?1
             )",
            LedgerOutput::COLUMNS
        ))?;
        let mut rows = stmt.query(params![window_start])?;

        let mut groups: BTreeMap<(String, String), BalanceAccumulator> = BTreeMap::new();

        while let Some(row) = rows.next()? {
            ctx.check()?;

            let output = LedgerOutput::from_row(row)?;
            let address: String = row.get(6)?;

            let acc = groups.entry((address, output.asset_id.clone())).or_default();
            acc.total_received = add_amount(acc.total_received, output.amount)?;

            if output.is_spent() {
                acc.total_sent = add_amount(acc.total_sent, output.amount)?;
            } else {
                acc.balance = add_amount(acc.balance, output.amount)?;
                acc.utxo_count += 1;
            }
            acc.transactions.insert(output.transaction_id);
        }

        Ok(groups
            .into_iter()
            .map(|((address, asset_id), acc)| AddressAssetBalance {
                address,
                asset_id,
                transaction_count: acc.transactions.len() as i64,
                total_received: acc.total_received,
                total_sent: acc.total_sent,
                balance: acc.balance,
                utxo_count: acc.utxo_count,
            })
            .collect())
    }

    /// Compute and replace-write; returns the number of rows written
    pub fn run(&self, conn: &Connection, window_start: i64, ctx: &RunContext) -> Result<usize> {
        let balances = self.compute(conn, window_start, ctx)?;
        if balances.is_empty() {
            return Ok(0);
        }
        replace_all(conn, &balances, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::db::run_schema_migrations;

    const T0: i64 = 1_700_000_040;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_schema_migrations(&conn).unwrap();
        conn
    }

    fn insert_output(conn: &Connection, id: &str, tx: &str, amount: &str, at: i64, addr: &str, redeemed_by: &str) {
        conn.execute(
            "INSERT INTO ledger_outputs (id, transaction_id, asset_id, amount, created_at, redeeming_transaction_id)
             VALUES (?1, ?2, 'X', ?3, ?4, ?5)",
            params![id, tx, amount, at, redeemed_by],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO output_addresses (output_id, address, created_at) VALUES (?1, ?2, ?3)",
            params![id, addr, at],
        )
        .unwrap();
    }

    #[test]
    fn test_balance_includes_history_before_window() {
        let conn = test_conn();
        // Old history for addr1, far before the window
        insert_output(&conn, "o1", "t1", "100", T0 - 86_400, "addr1", "t9");
        // New activity inside the window
        insert_output(&conn, "o2", "t2", "50", T0 + 10, "addr1", "");

        let balances = AddressBalanceAggregator::new()
            .compute(&conn, T0, &RunContext::new())
            .unwrap();

        assert_eq!(balances.len(), 1);
        let b = &balances[0];
        assert_eq!(b.address, "addr1");
        assert_eq!(b.total_received, Decimal::from(150));
        assert_eq!(b.total_sent, Decimal::from(100));
        assert_eq!(b.balance, Decimal::from(50));
        assert_eq!(b.utxo_count, 1);
        assert_eq!(b.transaction_count, 2);
    }

    #[test]
    fn test_inactive_addresses_untouched() {
        let conn = test_conn();
        insert_output(&conn, "o1", "t1", "100", T0 - 600, "idle", "");
        insert_output(&conn, "o2", "t2", "5", T0 + 1, "busy", "");

        let written = AddressBalanceAggregator::new()
            .run(&conn, T0, &RunContext::new())
            .unwrap();
        assert_eq!(written, 1);

        let addresses: Vec<String> = conn
            .prepare("SELECT address FROM address_balances")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(addresses, vec!["busy".to_string()]);
    }

    #[test]
    fn test_spend_moves_amount_to_sent() {
        let conn = test_conn();
        insert_output(&conn, "o1", "t1", "100", T0, "addr1", "");
        let aggregator = AddressBalanceAggregator::new();
        aggregator.run(&conn, T0, &RunContext::new()).unwrap();

        conn.execute(
            "UPDATE ledger_outputs SET redeeming_transaction_id = 't2' WHERE id = 'o1'",
            [],
        )
        .unwrap();
        aggregator.run(&conn, T0, &RunContext::new()).unwrap();

        let stored: (String, String, String, i64) = conn
            .query_row(
                "SELECT total_received, total_sent, balance, utxo_count FROM address_balances",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(
            stored,
            ("100".to_string(), "100".to_string(), "0".to_string(), 0)
        );
    }
}
