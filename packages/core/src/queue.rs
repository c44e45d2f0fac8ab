//! Bounded hand-off between the ledger poller and the ingestion task.
//!
//! One producer, one consumer. When the queue is full the configured
//! [`Backpressure`] policy decides whether the producer waits or the oldest
//! queued event is discarded. Either way the queue flags itself degraded
//! until the consumer drains it below half capacity.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;
use tokio::sync::Notify;

use crate::insights::types::LedgerCloseEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// Producer waits for space.
    #[default]
    Block,
    /// Oldest queued event is dropped to make room.
    DropOldest,
}

impl FromStr for Backpressure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Backpressure::Block),
            "drop-oldest" | "drop_oldest" => Ok(Backpressure::DropOldest),
            other => Err(format!("unknown backpressure policy: {}", other)),
        }
    }
}

pub struct EventQueue {
    inner: ArrayQueue<LedgerCloseEvent>,
    policy: Backpressure,
    not_empty: Notify,
    not_full: Notify,
    degraded: AtomicBool,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl EventQueue {
    /// `capacity` must be non-zero; config validation guarantees it.
    pub fn new(capacity: usize, policy: Backpressure) -> Self {
        Self {
            inner: ArrayQueue::new(capacity.max(1)),
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            degraded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Events discarded under `DropOldest`.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn mark_saturated(&self) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                "Ingestion queue saturated ({} events); snapshots will be marked stale",
                self.capacity()
            );
        }
    }

    /// Enqueue an event according to the backpressure policy.
    pub async fn push(&self, event: LedgerCloseEvent) {
        match self.policy {
            Backpressure::DropOldest => {
                if let Some(old) = self.inner.force_push(event) {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    self.mark_saturated();
                    tracing::warn!("Dropped queued ledger {} to make room", old.sequence);
                }
                self.not_empty.notify_one();
            }
            Backpressure::Block => {
                let mut pending = event;
                loop {
                    match self.inner.push(pending) {
                        Ok(()) => {
                            self.not_empty.notify_one();
                            return;
                        }
                        Err(back) => {
                            pending = back;
                            self.mark_saturated();
                            self.not_full.notified().await;
                        }
                    }
                }
            }
        }
    }

    /// Next event, waiting if the queue is empty. `None` once closed and drained.
    pub async fn pop(&self) -> Option<LedgerCloseEvent> {
        loop {
            if let Some(event) = self.inner.pop() {
                if self.inner.len() * 2 < self.capacity() {
                    self.degraded.store(false, Ordering::Release);
                }
                self.not_full.notify_one();
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.not_empty.notified().await;
        }
    }

    /// Stop accepting the consumer's wait; pending events are still drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_one();
    }
}
