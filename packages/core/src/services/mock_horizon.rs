//! Mock Horizon client for testing
//!
//! Implements `LedgerDataProvider` and `NetworkFeeSource` with scripted
//! responses so tests can exercise the polling scheduler, the engine and the
//! API without a live Horizon node.
//!
//! Gated behind `#[cfg(test)]`, so it never reaches production builds.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::insights::{
    error::ProviderError,
    provider::{LedgerDataProvider, ProviderMetadata},
    types::LedgerCloseEvent,
};
use crate::services::horizon::{NetworkFeeSource, NetworkFeeStats};

type Scripted = Result<Vec<LedgerCloseEvent>, ProviderError>;

/// A scripted implementation of `LedgerDataProvider`.
///
/// Each `fetch_ledgers_after` call consumes the next scripted response;
/// once the script runs out every call returns an empty batch.
///
/// # Example
/// ```rust
/// let mock = MockHorizonClient::new()
///     .with_batch(vec![event])
///     .with_error(ProviderError::ServiceUnavailable);
/// ```
pub struct MockHorizonClient {
    script: Mutex<VecDeque<Scripted>>,
    /// Cursor passed to each `fetch_ledgers_after` call, in order.
    cursors: Mutex<Vec<Option<u64>>>,
    /// Tracks total number of `fetch_ledgers_after` calls.
    pub call_count: Arc<AtomicUsize>,
    /// Controls whether `health_check` succeeds or returns `ServiceUnavailable`.
    healthy: bool,
    /// Returned by `network_fee_stats`; `None` answers `ServiceUnavailable`.
    fee_stats: Option<NetworkFeeStats>,
}

impl MockHorizonClient {
    /// Create a new mock with an empty script and a healthy status.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            cursors: Mutex::new(Vec::new()),
            call_count: Arc::new(AtomicUsize::new(0)),
            healthy: true,
            fee_stats: None,
        }
    }

    /// Queue a successful batch.
    pub fn with_batch(self, events: Vec<LedgerCloseEvent>) -> Self {
        self.push(Ok(events));
        self
    }

    /// Queue a failed call.
    pub fn with_error(self, error: ProviderError) -> Self {
        self.push(Err(error));
        self
    }

    /// Control whether `health_check` succeeds (`true`) or fails (`false`).
    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn with_fee_stats(mut self, stats: NetworkFeeStats) -> Self {
        self.fee_stats = Some(stats);
        self
    }

    fn push(&self, response: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    /// Returns the current call count without consuming the mock.
    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn cursors(&self) -> Vec<Option<u64>> {
        self.cursors.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Default for MockHorizonClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerDataProvider for MockHorizonClient {
    async fn fetch_ledgers_after(
        &self,
        cursor: Option<u64>,
        limit: u32,
    ) -> Result<Vec<LedgerCloseEvent>, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.push(cursor);
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Ok(mut events)) => {
                events.truncate(limit as usize);
                Ok(events)
            }
            Some(Err(err)) => Err(err),
            None => Ok(Vec::new()),
        }
    }

    fn provider_name(&self) -> &str {
        "MockHorizon"
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.healthy {
            Ok(())
        } else {
            Err(ProviderError::ServiceUnavailable)
        }
    }

    fn get_metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            supports_historical: false,
            max_batch_size: 100,
            rate_limit_per_minute: None,
            data_freshness_seconds: 5,
        }
    }
}

#[async_trait]
impl NetworkFeeSource for MockHorizonClient {
    async fn network_fee_stats(&self) -> Result<NetworkFeeStats, ProviderError> {
        self.fee_stats.clone().ok_or(ProviderError::ServiceUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_event(sequence: u64) -> LedgerCloseEvent {
        LedgerCloseEvent {
            sequence,
            close_time: Utc::now(),
            base_fee: 100,
            capacity: None,
            transactions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn returns_scripted_batches_in_order() {
        let mock = MockHorizonClient::new()
            .with_batch(vec![make_event(1), make_event(2)])
            .with_batch(vec![make_event(3)]);

        let first = mock.fetch_ledgers_after(None, 10).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = mock.fetch_ledgers_after(Some(2), 10).await.unwrap();
        assert_eq!(second[0].sequence, 3);
        assert_eq!(mock.cursors(), vec![None, Some(2)]);
    }

    #[tokio::test]
    async fn returns_empty_vec_once_script_is_exhausted() {
        let mock = MockHorizonClient::new();
        let result = mock.fetch_ledgers_after(None, 10).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn returns_scripted_error() {
        let mock = MockHorizonClient::new().with_error(ProviderError::NetworkError {
            message: "simulated timeout".into(),
        });

        let result = mock.fetch_ledgers_after(None, 10).await;
        assert!(matches!(result.unwrap_err(), ProviderError::NetworkError { .. }));
    }

    #[tokio::test]
    async fn batch_is_truncated_to_limit() {
        let mock = MockHorizonClient::new().with_batch((1..=5).map(make_event).collect());
        assert_eq!(mock.fetch_ledgers_after(None, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn call_counter_increments_even_on_error() {
        let mock = MockHorizonClient::new().with_error(ProviderError::ServiceUnavailable);

        let _ = mock.fetch_ledgers_after(None, 10).await;
        let _ = mock.fetch_ledgers_after(None, 10).await;
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn health_check_fails_when_unhealthy() {
        let mock = MockHorizonClient::new().with_healthy(false);
        let result = mock.health_check().await;
        assert!(matches!(result.unwrap_err(), ProviderError::ServiceUnavailable));
    }

    #[tokio::test]
    async fn network_fee_stats_unavailable_until_scripted() {
        let mock = MockHorizonClient::new();
        assert!(matches!(
            mock.network_fee_stats().await.unwrap_err(),
            ProviderError::ServiceUnavailable
        ));
    }

    #[test]
    fn provider_name_is_mock_horizon() {
        let mock = MockHorizonClient::new();
        assert_eq!(mock.provider_name(), "MockHorizon");
    }
}
