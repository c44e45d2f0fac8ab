//! Congestion scoring for closed buckets.
//!
//! `score = clamp((p90 / base_fee - 1) * w1 + fill_ratio * w2, 0, 1)`, where
//! `p90` is the bucket's 90th percentile fee per operation. When the source
//! gives no capacity data the fill weight folds into the premium weight.

use super::bucket::Bucket;
use super::config::CongestionWeights;

/// Quantile of fee per operation compared against the base fee.
pub const PREMIUM_PERCENTILE: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionScorer {
    weights: CongestionWeights,
}

impl CongestionScorer {
    pub fn new(weights: CongestionWeights) -> Self {
        Self { weights }
    }

    /// Score a bucket from its own statistics.
    pub fn score_bucket(&self, bucket: &Bucket) -> f64 {
        let p90 = bucket
            .stats()
            .fees_per_operation
            .percentile(PREMIUM_PERCENTILE);
        let premium = match p90 {
            Some(fee) => fee_premium(fee, bucket.base_fee()),
            None => 0.0,
        };
        self.score(premium, bucket.fill_ratio())
    }

    /// Score from a fee-premium ratio (`p90 / base_fee - 1`) and optional fill.
    pub fn score(&self, premium: f64, fill_ratio: Option<f64>) -> f64 {
        let CongestionWeights {
            fee_premium: w1,
            fill_ratio: w2,
        } = self.weights;

        let raw = match fill_ratio {
            Some(fill) => premium * w1 + fill.clamp(0.0, 1.0) * w2,
            None => premium * (w1 + w2),
        };

        if raw.is_nan() {
            return 0.0;
        }
        raw.clamp(0.0, 1.0)
    }
}

/// `fee / base_fee - 1`, or 0 when the base fee is unknown.
pub fn fee_premium(fee: u64, base_fee: u64) -> f64 {
    if base_fee == 0 {
        return 0.0;
    }
    fee as f64 / base_fee as f64 - 1.0
}
