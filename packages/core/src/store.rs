//! Published snapshots, one slot per window.
//!
//! The set of windows is fixed at construction, so the map itself is never
//! mutated; each slot is an [`ArcSwapOption`] that the ingestion task swaps
//! wholesale. Readers load an `Arc<Snapshot>` without locking and keep a
//! consistent value for as long as they hold it.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};

use crate::insights::error::StoreError;
use crate::insights::types::{Snapshot, WindowId};

pub struct SnapshotStore {
    slots: BTreeMap<WindowId, ArcSwapOption<Snapshot>>,
}

impl SnapshotStore {
    pub fn new(windows: impl IntoIterator<Item = WindowId>) -> Self {
        Self {
            slots: windows
                .into_iter()
                .map(|id| (id, ArcSwapOption::empty()))
                .collect(),
        }
    }

    /// Replace the window's snapshot in one atomic store.
    pub fn publish(&self, window: WindowId, snapshot: Snapshot) -> Result<(), StoreError> {
        let slot = self
            .slots
            .get(&window)
            .ok_or(StoreError::UnknownWindow(window))?;
        slot.store(Some(Arc::new(snapshot)));
        Ok(())
    }

    /// Latest snapshot, or `None` if the window is unknown or not yet published.
    pub fn get(&self, window: WindowId) -> Option<Arc<Snapshot>> {
        self.slots.get(&window).and_then(|slot| slot.load_full())
    }

    /// Configured windows, shortest first.
    pub fn windows(&self) -> Vec<WindowId> {
        self.slots.keys().copied().collect()
    }

    /// Republish every existing snapshot whose `stale` flag differs.
    ///
    /// Returns how many snapshots were replaced.
    pub fn mark_stale(&self, stale: bool, now: DateTime<Utc>) -> usize {
        let mut replaced = 0;
        for slot in self.slots.values() {
            if let Some(current) = slot.load_full() {
                if current.stale != stale {
                    slot.store(Some(Arc::new(current.with_stale(stale, now))));
                    replaced += 1;
                }
            }
        }
        replaced
    }
}

/// Read side handed to the API layer.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<SnapshotStore>,
}

impl QueryService {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn get_snapshot(&self, window: WindowId) -> Option<Arc<Snapshot>> {
        self.store.get(window)
    }

    pub fn list_windows(&self) -> Vec<WindowId> {
        self.store.windows()
    }
}
