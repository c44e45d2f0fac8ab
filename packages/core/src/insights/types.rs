//! Core data types shared by the extractor, aggregators, and snapshot store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// A single transaction as delivered by the ledger source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub hash: String,
    pub fee_charged: u64,
    pub operation_count: u32,
    pub successful: bool,
}

/// Ledger capacity data, when the source provides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerCapacity {
    /// Operations applied in the ledger's transaction set.
    pub operation_count: u32,
    /// Maximum operations the transaction set may hold.
    pub max_operations: u32,
}

impl LedgerCapacity {
    /// Fraction of ledger capacity used, clamped to `[0, 1]`.
    pub fn fill_ratio(&self) -> Option<f64> {
        if self.max_operations == 0 {
            return None;
        }
        Some((self.operation_count as f64 / self.max_operations as f64).clamp(0.0, 1.0))
    }
}

/// One ledger close as observed on the network.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCloseEvent {
    pub sequence: u64,
    pub close_time: DateTime<Utc>,
    pub base_fee: u64,
    pub capacity: Option<LedgerCapacity>,
    pub transactions: Vec<LedgerTransaction>,
}

/// Ledger-level facts the aggregators need alongside the fee records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerHeader {
    pub sequence: u64,
    pub close_time: DateTime<Utc>,
    pub base_fee: u64,
    pub fill_ratio: Option<f64>,
}

impl From<&LedgerCloseEvent> for LedgerHeader {
    fn from(event: &LedgerCloseEvent) -> Self {
        Self {
            sequence: event.sequence,
            close_time: event.close_time,
            base_fee: event.base_fee,
            fill_ratio: event.capacity.and_then(|c| c.fill_ratio()),
        }
    }
}

/// Normalized per-transaction fee data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFeeRecord {
    pub transaction_hash: String,
    pub fee_charged: u64,
    pub operation_count: u32,
    /// `fee_charged / max(operation_count, 1)`.
    pub fee_per_operation: u64,
    pub successful: bool,
    pub close_time: DateTime<Utc>,
}

impl TransactionFeeRecord {
    pub fn from_transaction(tx: &LedgerTransaction, close_time: DateTime<Utc>) -> Self {
        Self {
            transaction_hash: tx.hash.clone(),
            fee_charged: tx.fee_charged,
            operation_count: tx.operation_count,
            fee_per_operation: tx.fee_charged / u64::from(tx.operation_count.max(1)),
            successful: tx.successful,
            close_time,
        }
    }
}

/// A ledger that passed extraction, with its records.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedLedger {
    pub header: LedgerHeader,
    pub records: Vec<TransactionFeeRecord>,
}

/// Identifies a window by its reporting duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowId(u64);

impl WindowId {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_duration_secs(self.0))
    }
}

impl FromStr for WindowId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration_secs(s).map(WindowId)
    }
}

impl Serialize for WindowId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse `"30s"`, `"5m"`, `"1h"`, `"1d"` or bare seconds.
pub fn parse_duration_secs(input: &str) -> Result<u64, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".into());
    }

    let (digits, multiplier) = match s.chars().last() {
        Some('s') => (&s[..s.len() - 1], 1),
        Some('m') => (&s[..s.len() - 1], 60),
        Some('h') => (&s[..s.len() - 1], 3_600),
        Some('d') => (&s[..s.len() - 1], 86_400),
        _ => (s, 1),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {}", input))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("duration overflows: {}", input))
}

/// Format seconds using the largest unit that divides evenly.
pub fn format_duration_secs(secs: u64) -> String {
    if secs > 0 && secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Estimated fee at one percentile target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileFee {
    pub target: f64,
    pub fee: u64,
}

/// Missing ledger range detected between two observed sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceGap {
    pub first_missing: u64,
    pub last_missing: u64,
    /// Close time of the last ledger seen before the gap.
    pub from: DateTime<Utc>,
    /// Close time of the first ledger seen after the gap.
    pub to: DateTime<Utc>,
}

impl SequenceGap {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.from < end && self.to > start
    }
}

/// Immutable published view of one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub window: WindowId,
    pub as_of_sequence: u64,
    pub base_fee: u64,
    pub average_paid_fee: f64,
    pub min_fee: u64,
    pub max_fee: u64,
    pub average_fee_per_operation: f64,
    pub percentiles: Vec<PercentileFee>,
    pub congestion_score: f64,
    /// Scores of closed buckets inside the window span, oldest first.
    pub congestion_trend: Vec<f64>,
    pub sample_count: u64,
    pub transaction_count: u64,
    pub ledger_count: u64,
    pub failed_count: u64,
    pub late_drops: u64,
    pub data_gap: bool,
    pub gaps: Vec<SequenceGap>,
    pub stale: bool,
    pub span_start: DateTime<Utc>,
    pub span_end: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Snapshot {
    /// Fee estimate for a configured percentile target.
    #[cfg(test)]
    pub fn percentile(&self, target: f64) -> Option<u64> {
        self.percentiles
            .iter()
            .find(|p| (p.target - target).abs() < f64::EPSILON)
            .map(|p| p.fee)
    }

    /// Copy of this snapshot with a new `stale` flag.
    pub fn with_stale(&self, stale: bool, now: DateTime<Utc>) -> Self {
        Self {
            stale,
            last_updated: now,
            ..self.clone()
        }
    }

    /// True when every field except `last_updated` matches.
    #[cfg(test)]
    pub fn same_content(&self, other: &Snapshot) -> bool {
        Self {
            last_updated: other.last_updated,
            ..self.clone()
        } == *other
    }
}
