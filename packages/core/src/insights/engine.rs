//! Fee Insights Engine
//!
//! Single writer for every window: owns the extractor and the window
//! aggregators, and pushes the snapshots they build into the shared
//! [`SnapshotStore`]. Processing one event is synchronous, so a shutdown
//! between events never leaves a bucket-close half published.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::config::InsightsConfig;
use super::error::{ConfigError, IngestError};
use super::extractor::{ExtractorStats, FeeExtractor};
use super::types::{ExtractedLedger, LedgerCloseEvent, Snapshot, WindowId};
use super::window::{PublishContext, WindowAggregator};
use crate::store::SnapshotStore;

/// Why published snapshots are currently untrustworthy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Staleness {
    pub upstream_unavailable: bool,
    pub degraded: bool,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        self.upstream_unavailable || self.degraded
    }
}

pub struct FeeInsightsEngine {
    extractor: FeeExtractor,
    windows: Vec<WindowAggregator>,
    store: Arc<SnapshotStore>,
    staleness: Staleness,
    published: u64,
}

impl FeeInsightsEngine {
    /// Validate `config` and build one aggregator per window.
    pub fn new(config: InsightsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let windows: Vec<WindowAggregator> = config
            .sorted_windows()
            .iter()
            .map(|w| WindowAggregator::new(w, &config))
            .collect();
        let store = Arc::new(SnapshotStore::new(windows.iter().map(|w| w.id())));

        Ok(Self {
            extractor: FeeExtractor::from_config(&config),
            windows,
            store,
            staleness: Staleness::default(),
            published: 0,
        })
    }

    /// Read handle for the query side.
    pub fn store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        self.windows.iter().map(|w| w.id()).collect()
    }

    pub fn extractor_stats(&self) -> ExtractorStats {
        self.extractor.stats()
    }

    pub fn late_drops(&self, window: WindowId) -> Option<u64> {
        self.window(window).map(|w| w.late_drops())
    }

    #[cfg(test)]
    pub fn staleness(&self) -> Staleness {
        self.staleness
    }

    /// Total snapshots published so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    fn window(&self, id: WindowId) -> Option<&WindowAggregator> {
        self.windows.iter().find(|w| w.id() == id)
    }

    /// Process one ledger-close event at wall-clock `now`.
    ///
    /// Returns the number of snapshots published.
    pub fn process_at(&mut self, event: LedgerCloseEvent, now: DateTime<Utc>) -> usize {
        let ready = self.extractor.accept(event);
        ready
            .iter()
            .map(|ledger| self.apply(ledger, now))
            .sum()
    }

    pub fn process(&mut self, event: LedgerCloseEvent) -> usize {
        self.process_at(event, Utc::now())
    }

    /// Release anything held in the reorder buffer.
    pub fn flush(&mut self) -> usize {
        let now = Utc::now();
        let ready = self.extractor.flush();
        ready.iter().map(|ledger| self.apply(ledger, now)).sum()
    }

    fn apply(&mut self, ledger: &ExtractedLedger, now: DateTime<Utc>) -> usize {
        let ctx = PublishContext {
            stale: self.staleness.is_stale(),
            now,
        };
        let mut count = 0;
        for window in &mut self.windows {
            for snapshot in window.ingest_ledger(ledger, ctx) {
                count += publish(&self.store, snapshot);
            }
        }
        self.published += count as u64;
        count
    }

    /// Rebuild and publish every window from current state.
    #[cfg(test)]
    pub fn publish_all_at(&mut self, now: DateTime<Utc>) -> usize {
        let ctx = PublishContext {
            stale: self.staleness.is_stale(),
            now,
        };
        let mut count = 0;
        for window in &self.windows {
            if let Some(snapshot) = window.snapshot(ctx) {
                count += publish(&self.store, snapshot);
            }
        }
        self.published += count as u64;
        count
    }

    /// Record an upstream outage or recovery.
    pub fn set_upstream_unavailable(&mut self, unavailable: Option<IngestError>) {
        if let Some(err) = &unavailable {
            tracing::warn!("Marking snapshots stale: {}", err);
        }
        let next = Staleness {
            upstream_unavailable: unavailable.is_some(),
            ..self.staleness
        };
        self.update_staleness(next, Utc::now());
    }

    /// Record whether the ingestion queue is saturated.
    pub fn set_degraded(&mut self, degraded: bool) {
        let next = Staleness {
            degraded,
            ..self.staleness
        };
        self.update_staleness(next, Utc::now());
    }

    fn update_staleness(&mut self, next: Staleness, now: DateTime<Utc>) {
        if next == self.staleness {
            return;
        }
        let was_stale = self.staleness.is_stale();
        self.staleness = next;
        if was_stale != next.is_stale() {
            let replaced = self.store.mark_stale(next.is_stale(), now);
            tracing::info!(
                "Snapshot staleness changed to {} ({} snapshots republished)",
                next.is_stale(),
                replaced
            );
        }
    }
}

fn publish(store: &SnapshotStore, snapshot: Snapshot) -> usize {
    let window = snapshot.window;
    match store.publish(window, snapshot) {
        Ok(()) => {
            tracing::debug!("Published snapshot for window {}", window);
            1
        }
        Err(err) => {
            tracing::error!("Snapshot publish failed: {}", err);
            0
        }
    }
}
