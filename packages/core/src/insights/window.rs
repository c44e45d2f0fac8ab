//! Ring-of-buckets window aggregator.
//!
//! Each window owns `retention` slots; bucket number `n` (covering
//! `[n * granularity, (n + 1) * granularity)`) lives in slot
//! `n mod retention`. The aggregator is a single-writer state machine: all
//! mutation happens through `ingest_ledger` on the
//! ingestion task, and readers only ever see the [`Snapshot`]s it returns.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::bucket::{Bucket, FeeStats};
use super::config::{InsightsConfig, PublishPolicy, WindowConfig};
use super::detector::CongestionScorer;
use super::error::IngestError;
use super::types::{
    ExtractedLedger, LedgerHeader, PercentileFee, SequenceGap, Snapshot, TransactionFeeRecord,
    WindowId,
};

/// Values stamped onto every snapshot built during one ingestion step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishContext {
    pub stale: bool,
    pub now: DateTime<Utc>,
}

fn to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[derive(Debug)]
pub struct WindowAggregator {
    id: WindowId,
    granularity: i64,
    buckets_per_window: i64,
    tolerance: i64,
    slots: Vec<Option<Bucket>>,
    /// Newest bucket number.
    head: Option<i64>,
    /// Latest close time observed, in seconds.
    max_time: Option<i64>,
    percentile_targets: Vec<f64>,
    failed_in_fee_stats: bool,
    publish_policy: PublishPolicy,
    scorer: CongestionScorer,
    last_sequence: Option<u64>,
    last_close_time: Option<DateTime<Utc>>,
    last_base_fee: u64,
    gaps: VecDeque<SequenceGap>,
    late_drops: u64,
}

impl WindowAggregator {
    pub fn new(window: &WindowConfig, config: &InsightsConfig) -> Self {
        let retention = window.retention.max(1);
        Self {
            id: window.id(),
            granularity: window.granularity_secs.max(1) as i64,
            buckets_per_window: window.buckets_per_window().max(1) as i64,
            tolerance: config.late_arrival_tolerance_secs as i64,
            slots: vec![None; retention],
            head: None,
            max_time: None,
            percentile_targets: config.percentile_targets.clone(),
            failed_in_fee_stats: config.failed_in_fee_stats,
            publish_policy: config.publish_policy,
            scorer: CongestionScorer::new(config.congestion_weights),
            last_sequence: None,
            last_close_time: None,
            last_base_fee: 0,
            gaps: VecDeque::new(),
            late_drops: 0,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn late_drops(&self) -> u64 {
        self.late_drops
    }

    fn retention(&self) -> i64 {
        self.slots.len() as i64
    }

    fn slot_index(&self, number: i64) -> usize {
        number.rem_euclid(self.retention()) as usize
    }

    fn watermark(&self) -> Option<i64> {
        self.max_time.map(|t| t - self.tolerance)
    }

    /// Oldest bucket number still inside the retention horizon.
    fn oldest_retained(&self) -> Option<i64> {
        self.head.map(|h| h - self.retention() + 1)
    }

    /// Retained bucket by number.
    pub fn bucket(&self, number: i64) -> Option<&Bucket> {
        self.slots[self.slot_index(number)]
            .as_ref()
            .filter(|b| b.number() == number)
    }

    /// Retained buckets, oldest first.
    pub fn buckets(&self) -> Vec<&Bucket> {
        let mut buckets: Vec<&Bucket> = self.slots.iter().flatten().collect();
        buckets.sort_by_key(|b| b.number());
        buckets
    }

    /// Bucket number that covers `timestamp` (seconds).
    pub fn bucket_number(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.granularity)
    }

    /// Ingest one extracted ledger: gap check, clock advance, then records.
    ///
    /// Returns the snapshots to publish, in order.
    pub fn ingest_ledger(&mut self, ledger: &ExtractedLedger, ctx: PublishContext) -> Vec<Snapshot> {
        let mut published = Vec::new();
        let header = &ledger.header;

        if let Some(last) = self.last_sequence {
            if header.sequence <= last {
                tracing::debug!(
                    "Window {}: ignoring ledger {} at or below {}",
                    self.id,
                    header.sequence,
                    last
                );
                return published;
            }
        }

        self.detect_gap(header);

        let t = header.close_time.timestamp();
        self.advance_to(t, ctx, &mut published);

        if let Some(bucket) = self.open_bucket_mut(t) {
            bucket.observe_ledger(header);
        }
        self.last_sequence = Some(header.sequence);
        self.last_close_time = Some(header.close_time);
        self.last_base_fee = header.base_fee;

        for record in &ledger.records {
            self.place(record);
        }

        if self.publish_policy == PublishPolicy::EveryLedger {
            published.extend(self.snapshot(ctx));
        }
        published
    }

    /// Ingest a single fee record on its own.
    #[cfg(test)]
    pub fn ingest_record(
        &mut self,
        record: &TransactionFeeRecord,
        ctx: PublishContext,
    ) -> Vec<Snapshot> {
        let mut published = Vec::new();
        self.advance_to(record.close_time.timestamp(), ctx, &mut published);
        self.place(record);
        published
    }

    fn detect_gap(&mut self, header: &LedgerHeader) {
        let (Some(last), Some(last_time)) = (self.last_sequence, self.last_close_time) else {
            return;
        };
        if header.sequence == last + 1 {
            return;
        }

        let err = IngestError::SequenceGap {
            expected: last + 1,
            received: header.sequence,
        };
        tracing::warn!("Window {}: {}", self.id, err);

        self.gaps.push_back(SequenceGap {
            first_missing: last + 1,
            last_missing: header.sequence - 1,
            from: last_time,
            to: header.close_time,
        });
    }

    /// Move the clock forward to `t`, closing and evicting buckets as needed.
    fn advance_to(&mut self, t: i64, ctx: PublishContext, out: &mut Vec<Snapshot>) {
        if self.max_time.map_or(false, |m| t <= m) {
            return;
        }
        self.max_time = Some(t);

        let watermark = t - self.tolerance;
        let mut due: Vec<i64> = self
            .slots
            .iter()
            .flatten()
            .filter(|b| !b.is_closed() && b.end() <= watermark)
            .map(|b| b.number())
            .collect();
        due.sort_unstable();
        for number in due {
            self.close_bucket(number, ctx, out);
        }

        let target = self.bucket_number(t);
        match self.head {
            Some(head) if target <= head => {}
            Some(head) => {
                let first = (head + 1).max(target - self.retention() + 1);
                for number in first..=target {
                    self.evict_for(number, ctx, out);
                }
                self.head = Some(target);
            }
            None => self.head = Some(target),
        }

        self.prune_gaps();
    }

    /// Free the slot `number` will use, closing its occupant first if needed.
    fn evict_for(&mut self, number: i64, ctx: PublishContext, out: &mut Vec<Snapshot>) {
        let idx = self.slot_index(number);
        let occupant = match &self.slots[idx] {
            Some(bucket) if bucket.number() != number => bucket.number(),
            _ => return,
        };
        if self.slots[idx].as_ref().map_or(false, |b| !b.is_closed()) {
            self.close_bucket(occupant, ctx, out);
        }
        tracing::debug!("Window {}: evicting bucket {}", self.id, occupant);
        self.slots[idx] = None;
    }

    fn close_bucket(&mut self, number: i64, ctx: PublishContext, out: &mut Vec<Snapshot>) {
        let idx = self.slot_index(number);
        let scorer = self.scorer;
        let Some(bucket) = self.slots[idx].as_mut().filter(|b| b.number() == number) else {
            return;
        };
        let score = scorer.score_bucket(bucket);
        bucket.close(score);
        tracing::debug!(
            "Window {}: closed bucket {} ({} records, congestion {:.3})",
            self.id,
            number,
            bucket.stats().record_count,
            score
        );
        out.extend(self.snapshot(ctx));
    }

    fn prune_gaps(&mut self) {
        let Some(oldest) = self.oldest_retained() else {
            return;
        };
        let horizon = to_datetime(oldest * self.granularity);
        while self.gaps.front().map_or(false, |g| g.to <= horizon) {
            self.gaps.pop_front();
        }
    }

    /// Open bucket covering `t`, created on first use. `None` if `t` is late.
    fn open_bucket_mut(&mut self, t: i64) -> Option<&mut Bucket> {
        let number = self.bucket_number(t);
        let oldest = self.oldest_retained()?;
        let watermark = self.watermark()?;
        if number < oldest || (number + 1) * self.granularity <= watermark {
            return None;
        }

        let idx = self.slot_index(number);
        let granularity = self.granularity;
        let slot = &mut self.slots[idx];
        if slot.as_ref().map_or(true, |b| b.number() != number) {
            *slot = Some(Bucket::new(number, granularity));
        }
        slot.as_mut().filter(|b| !b.is_closed())
    }

    fn place(&mut self, record: &TransactionFeeRecord) {
        let t = record.close_time.timestamp();
        let failed_in_fee_stats = self.failed_in_fee_stats;
        match self.open_bucket_mut(t) {
            Some(bucket) => bucket.record(record, failed_in_fee_stats),
            None => {
                self.late_drops += 1;
                let open_from = self
                    .watermark()
                    .map(|w| w.div_euclid(self.granularity) * self.granularity)
                    .unwrap_or(t);
                let err = IngestError::LateArrival {
                    window: self.id,
                    timestamp: t,
                    open_from,
                };
                tracing::debug!("Dropping record {}: {}", record.transaction_hash, err);
            }
        }
    }

    /// Build a snapshot of the current state: every retained bucket inside
    /// the window span ending at the head bucket, merged.
    ///
    /// Returns `None` before the first ledger. Two calls on unchanged state
    /// differ only in `last_updated`.
    pub fn snapshot(&self, ctx: PublishContext) -> Option<Snapshot> {
        let head = self.head?;
        let span_end_number = head + 1;
        let span_start_number = span_end_number - self.buckets_per_window;
        let span_start = to_datetime(span_start_number * self.granularity);
        let span_end = to_datetime(span_end_number * self.granularity);

        let in_span: Vec<&Bucket> = self
            .buckets()
            .into_iter()
            .filter(|b| b.number() >= span_start_number)
            .collect();

        let mut merged = FeeStats::default();
        let mut ledger_count = 0;
        for bucket in &in_span {
            merged.merge(bucket.stats());
            ledger_count += bucket.ledger_count();
        }

        let congestion_trend: Vec<f64> = in_span
            .iter()
            .filter_map(|b| b.congestion_score())
            .collect();
        let congestion_score = match congestion_trend.last() {
            Some(score) => *score,
            None => self
                .bucket(head)
                .map(|b| self.scorer.score_bucket(b))
                .unwrap_or(0.0),
        };

        let percentiles = self
            .percentile_targets
            .iter()
            .map(|target| PercentileFee {
                target: *target,
                fee: merged.fees.percentile(*target).unwrap_or(0),
            })
            .collect();

        let gaps: Vec<SequenceGap> = self
            .gaps
            .iter()
            .filter(|g| g.overlaps(span_start, span_end))
            .copied()
            .collect();

        Some(Snapshot {
            window: self.id,
            as_of_sequence: self.last_sequence.unwrap_or(0),
            base_fee: self.last_base_fee,
            average_paid_fee: merged.average_fee(),
            min_fee: merged.fees.min().unwrap_or(0),
            max_fee: merged.fees.max().unwrap_or(0),
            average_fee_per_operation: merged.average_fee_per_operation(),
            percentiles,
            congestion_score,
            congestion_trend,
            sample_count: merged.sample_count(),
            transaction_count: merged.record_count,
            ledger_count,
            failed_count: merged.failed_count,
            late_drops: self.late_drops,
            data_gap: !gaps.is_empty(),
            gaps,
            stale: ctx.stale,
            span_start,
            span_end,
            last_updated: ctx.now,
        })
    }
}
