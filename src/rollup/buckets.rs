//! Output bucket aggregator
//!
//! Recomputes (bucket, asset) volume statistics for every bucket at or after
//! the window start. The window start sits on a bucket boundary, so each
//! touched bucket sees all of its outputs and is rewritten whole.

use super::checkpoint::round_down_to_boundary;
use super::error::Result;
use super::replace::replace_all;
use super::types::{add_amount, LedgerOutput, OutputBucket};
use super::RunContext;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};

/// Outcome of one bucket pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPassResult {
    pub window_start: i64,
    /// Newest raw `created_at` seen, if any output matched
    pub max_created_at: Option<i64>,
    pub buckets_written: usize,
}

impl BucketPassResult {
    /// Furthest timestamp this pass accounted for
    pub fn watermark(&self) -> i64 {
        self.max_created_at.unwrap_or(self.window_start)
    }
}

#[derive(Default)]
struct BucketAccumulator {
    volume: Decimal,
    outputs: HashSet<String>,
    transactions: HashSet<String>,
    addresses: HashSet<String>,
    assets: HashSet<String>,
}

/// Close out every asset group of one bucket
fn finish_bucket(bucket_ts: i64, groups: BTreeMap<String, BucketAccumulator>) -> Vec<OutputBucket> {
    groups
        .into_iter()
        .map(|(asset_id, acc)| OutputBucket {
            bucket_ts,
            asset_id,
            transaction_volume: acc.volume,
            transaction_count: acc.transactions.len() as i64,
            address_count: acc.addresses.len() as i64,
            asset_count: acc.assets.len() as i64,
            output_count: acc.outputs.len() as i64,
        })
        .collect()
}

/// Recomputes `output_buckets` from the ledger
#[derive(Debug, Clone, Copy)]
pub struct OutputBucketAggregator {
    bucket_secs: i64,
}

impl OutputBucketAggregator {
    pub fn new(bucket_secs: i64) -> Self {
        Self { bucket_secs }
    }

    /// Scan every output with `created_at >= window_start` (no upper bound)
    /// in time order, handing each bucket to `sink` once the scan has moved
    /// past it. Only one bucket is held in memory at a time.
    ///
    /// Returns the newest raw `created_at` seen.
    fn scan<F>(&self, conn: &Connection, window_start: i64, ctx: &RunContext, mut sink: F) -> Result<Option<i64>>
    where
        F: FnMut(Vec<OutputBucket>) -> Result<()>,
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, oa.address
             FROM ledger_outputs o
             LEFT JOIN output_addresses oa ON oa.output_id = o.id
             WHERE o.created_at >= ?1
             ORDER BY o.created_at, o.id",
            LedgerOutput::COLUMNS
        ))?;
        let mut rows = stmt.query(params![window_start])?;

        let mut current: Option<(i64, BTreeMap<String, BucketAccumulator>)> = None;
        let mut max_created_at: Option<i64> = None;

        while let Some(row) = rows.next()? {
            ctx.check()?;

            let output = LedgerOutput::from_row(row)?;
            let address: Option<String> = row.get(6)?;

            // Rows arrive in created_at order, so this is also the maximum
            max_created_at = Some(output.created_at);

            let bucket_ts = round_down_to_boundary(output.created_at, self.bucket_secs);
            if current.as_ref().is_some_and(|(ts, _)| *ts != bucket_ts) {
                if let Some((ts, groups)) = current.take() {
                    sink(finish_bucket(ts, groups))?;
                }
            }

            let (_, groups) = current.get_or_insert_with(|| (bucket_ts, BTreeMap::new()));
            let acc = groups.entry(output.asset_id.clone()).or_default();

            // The join yields one row per address. An output's amount and
            // count go in once, deliberately not once per address as a SUM
            // over the join would.
            if acc.outputs.insert(output.id) {
                acc.volume = add_amount(acc.volume, output.amount)?;
            }
            acc.transactions.insert(output.transaction_id);
            acc.assets.insert(output.asset_id);
            if let Some(address) = address {
                acc.addresses.insert(address);
            }
        }

        if let Some((ts, groups)) = current {
            sink(finish_bucket(ts, groups))?;
        }

        Ok(max_created_at)
    }

    /// Aggregate every output at or after `window_start` into bucket rows
    pub fn compute(
        &self,
        conn: &Connection,
        window_start: i64,
        ctx: &RunContext,
    ) -> Result<(Vec<OutputBucket>, Option<i64>)> {
        let mut buckets = Vec::new();
        let max_created_at = self.scan(conn, window_start, ctx, |mut rows| {
            buckets.append(&mut rows);
            Ok(())
        })?;
        Ok((buckets, max_created_at))
    }

    /// Replace-write each touched bucket as soon as the scan completes it
    pub fn run(&self, conn: &Connection, window_start: i64, ctx: &RunContext) -> Result<BucketPassResult> {
        let mut buckets_written = 0;
        let max_created_at = self.scan(conn, window_start, ctx, |rows| {
            buckets_written += replace_all(conn, &rows, ctx)?;
            Ok(())
        })?;

        if max_created_at.is_none() {
            log::debug!("No ledger outputs at or after {}", window_start);
        }

        Ok(BucketPassResult {
            window_start,
            max_created_at,
            buckets_written,
        })
    }
}
