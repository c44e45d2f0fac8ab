//! Turns ledger-close events into per-transaction fee records.

use std::collections::BTreeMap;

use super::config::InsightsConfig;
use super::error::IngestError;
use super::types::{ExtractedLedger, LedgerCloseEvent, LedgerHeader, TransactionFeeRecord};

/// Counters kept by the extractor. Rejections are counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    pub accepted: u64,
    pub stale_rejected: u64,
    pub failed_excluded: u64,
    /// Events released from the reorder buffer without their predecessor.
    pub forced_releases: u64,
}

/// Normalizes ledger events and guards the sequence watermark.
#[derive(Debug)]
pub struct FeeExtractor {
    include_failed: bool,
    watermark: Option<u64>,
    reorder_capacity: usize,
    pending: BTreeMap<u64, LedgerCloseEvent>,
    stats: ExtractorStats,
}

impl FeeExtractor {
    pub fn new(include_failed: bool, reorder_capacity: usize) -> Self {
        Self {
            include_failed,
            watermark: None,
            reorder_capacity,
            pending: BTreeMap::new(),
            stats: ExtractorStats::default(),
        }
    }

    pub fn from_config(config: &InsightsConfig) -> Self {
        Self::new(config.include_failed_transactions, config.reorder_capacity)
    }

    /// Last processed sequence.
    #[cfg(test)]
    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Extract fee records from one event, bypassing the reorder buffer.
    ///
    /// Events at or below the watermark yield no records.
    #[cfg(test)]
    pub fn extract(&mut self, event: &LedgerCloseEvent) -> Vec<TransactionFeeRecord> {
        self.admit(event)
            .map(|ledger| ledger.records)
            .unwrap_or_default()
    }

    /// Feed one event through the reorder buffer.
    ///
    /// Returns every ledger that became ready, in sequence order. With a
    /// zero-capacity buffer this is the event itself (or nothing if stale).
    pub fn accept(&mut self, event: LedgerCloseEvent) -> Vec<ExtractedLedger> {
        if let Err(err) = self.check_sequence(event.sequence) {
            self.reject(err);
            return Vec::new();
        }

        let next_expected = self.watermark.map(|w| w + 1);
        let in_order = next_expected.map_or(true, |n| event.sequence == n);

        if self.reorder_capacity == 0 || (in_order && self.pending.is_empty()) {
            return self.admit(&event).into_iter().collect();
        }

        self.pending.entry(event.sequence).or_insert(event);

        let mut ready = Vec::new();
        self.drain_consecutive(&mut ready);

        while self.pending.len() > self.reorder_capacity {
            if let Some((sequence, held)) = self.pending.pop_first() {
                tracing::warn!(
                    "Reorder buffer full; releasing ledger {} without its predecessor",
                    sequence
                );
                self.stats.forced_releases += 1;
                ready.extend(self.admit(&held));
                self.drain_consecutive(&mut ready);
            }
        }

        ready
    }

    /// Release every held event in sequence order.
    pub fn flush(&mut self) -> Vec<ExtractedLedger> {
        let held = std::mem::take(&mut self.pending);
        held.into_values()
            .filter_map(|event| self.admit(&event))
            .collect()
    }

    fn drain_consecutive(&mut self, ready: &mut Vec<ExtractedLedger>) {
        loop {
            let next = match self.watermark {
                Some(w) => w + 1,
                None => match self.pending.keys().next() {
                    Some(first) => *first,
                    None => return,
                },
            };
            match self.pending.remove(&next) {
                Some(event) => ready.extend(self.admit(&event)),
                None => return,
            }
        }
    }

    fn check_sequence(&self, sequence: u64) -> Result<(), IngestError> {
        match self.watermark {
            Some(watermark) if sequence <= watermark => Err(IngestError::StaleEvent {
                sequence,
                watermark,
            }),
            _ => Ok(()),
        }
    }

    fn reject(&mut self, err: IngestError) {
        self.stats.stale_rejected += 1;
        tracing::debug!("Skipping event: {}", err);
    }

    fn admit(&mut self, event: &LedgerCloseEvent) -> Option<ExtractedLedger> {
        if let Err(err) = self.check_sequence(event.sequence) {
            self.reject(err);
            return None;
        }
        self.watermark = Some(event.sequence);
        self.stats.accepted += 1;

        let mut records = Vec::with_capacity(event.transactions.len());
        for tx in &event.transactions {
            if !tx.successful && !self.include_failed {
                self.stats.failed_excluded += 1;
                continue;
            }
            records.push(TransactionFeeRecord::from_transaction(tx, event.close_time));
        }

        Some(ExtractedLedger {
            header: LedgerHeader::from(event),
            records,
        })
    }
}
