//! Fixed-span aggregation unit of a window.

use super::histogram::FeeHistogram;
use super::types::{LedgerHeader, TransactionFeeRecord};

/// Mergeable online fee statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeStats {
    /// Records accepted, failed ones included.
    pub record_count: u64,
    pub failed_count: u64,
    /// Sum of fees that entered the fee statistics.
    pub fee_sum: u64,
    /// Sum of `max(operation_count, 1)` over the same records.
    pub operation_sum: u64,
    pub fees: FeeHistogram,
    pub fees_per_operation: FeeHistogram,
}

impl FeeStats {
    pub fn record(&mut self, record: &TransactionFeeRecord, failed_in_fee_stats: bool) {
        self.record_count += 1;
        if !record.successful {
            self.failed_count += 1;
            if !failed_in_fee_stats {
                return;
            }
        }
        self.fee_sum = self.fee_sum.saturating_add(record.fee_charged);
        self.operation_sum = self
            .operation_sum
            .saturating_add(u64::from(record.operation_count.max(1)));
        self.fees.record(record.fee_charged);
        self.fees_per_operation.record(record.fee_per_operation);
    }

    pub fn merge(&mut self, other: &FeeStats) {
        self.record_count += other.record_count;
        self.failed_count += other.failed_count;
        self.fee_sum = self.fee_sum.saturating_add(other.fee_sum);
        self.operation_sum = self.operation_sum.saturating_add(other.operation_sum);
        self.fees.merge(&other.fees);
        self.fees_per_operation.merge(&other.fees_per_operation);
    }

    /// Records that entered the fee statistics.
    pub fn sample_count(&self) -> u64 {
        self.fees.count()
    }

    pub fn average_fee(&self) -> f64 {
        match self.fees.count() {
            0 => 0.0,
            n => self.fee_sum as f64 / n as f64,
        }
    }

    pub fn average_fee_per_operation(&self) -> f64 {
        match self.operation_sum {
            0 => 0.0,
            ops => self.fee_sum as f64 / ops as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BucketState {
    Open,
    Closed { congestion_score: f64 },
}

/// Statistics for `[start, start + duration)`. Frozen once closed.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    number: i64,
    duration_secs: i64,
    stats: FeeStats,
    ledger_count: u64,
    base_fee: u64,
    fill_sum: f64,
    fill_samples: u64,
    state: BucketState,
}

impl Bucket {
    /// Bucket number `n` covers `[n * duration, (n + 1) * duration)`.
    pub fn new(number: i64, duration_secs: i64) -> Self {
        Self {
            number,
            duration_secs,
            stats: FeeStats::default(),
            ledger_count: 0,
            base_fee: 0,
            fill_sum: 0.0,
            fill_samples: 0,
            state: BucketState::Open,
        }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn start(&self) -> i64 {
        self.number * self.duration_secs
    }

    pub fn end(&self) -> i64 {
        self.start() + self.duration_secs
    }

    #[cfg(test)]
    pub fn covers(&self, timestamp: i64) -> bool {
        self.start() <= timestamp && timestamp < self.end()
    }

    pub fn stats(&self) -> &FeeStats {
        &self.stats
    }

    pub fn ledger_count(&self) -> u64 {
        self.ledger_count
    }

    /// Base fee of the latest ledger seen in this bucket (0 if none).
    pub fn base_fee(&self) -> u64 {
        self.base_fee
    }

    /// Mean ledger fill ratio, if any ledger reported capacity.
    pub fn fill_ratio(&self) -> Option<f64> {
        (self.fill_samples > 0).then(|| self.fill_sum / self.fill_samples as f64)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, BucketState::Closed { .. })
    }

    pub fn congestion_score(&self) -> Option<f64> {
        match self.state {
            BucketState::Closed { congestion_score } => Some(congestion_score),
            BucketState::Open => None,
        }
    }

    pub fn observe_ledger(&mut self, header: &LedgerHeader) {
        debug_assert!(!self.is_closed(), "closed bucket must not change");
        self.ledger_count += 1;
        self.base_fee = header.base_fee;
        if let Some(fill) = header.fill_ratio {
            self.fill_sum += fill;
            self.fill_samples += 1;
        }
    }

    pub fn record(&mut self, record: &TransactionFeeRecord, failed_in_fee_stats: bool) {
        debug_assert!(!self.is_closed(), "closed bucket must not change");
        self.stats.record(record, failed_in_fee_stats);
    }

    pub fn close(&mut self, congestion_score: f64) {
        self.state = BucketState::Closed { congestion_score };
    }
}
