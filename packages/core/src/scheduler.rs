use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time;

use crate::insights::error::ProviderError;
use crate::insights::provider::LedgerDataProvider;
use crate::insights::FeeInsightsEngine;
use crate::queue::EventQueue;

/// Upstream health as last seen by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamStatus {
    Available,
    Unavailable(ProviderError),
}

pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Exponential backoff with up to 25% random jitter.
///
/// `retry_after` (from a rate-limit response) is honoured as a lower bound.
pub fn backoff_delay(base: Duration, failures: u32, retry_after: Option<u64>) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let raw = base
        .saturating_mul(1u32 << exponent)
        .min(MAX_BACKOFF);
    let jitter_ms = (raw.as_millis() as u64) / 4;
    let jitter = if jitter_ms > 0 {
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    } else {
        Duration::ZERO
    };

    let delay = raw + jitter;
    match retry_after {
        Some(secs) => delay.max(Duration::from_secs(secs)),
        None => delay,
    }
}

/// Flip `shutdown` once `signal` fires.
///
/// If the signal handler cannot be installed the sender is held forever, so
/// receivers keep waiting instead of seeing a closed channel.
pub async fn forward_shutdown_signal<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            shutdown.send_replace(true);
        }
        Err(err) => {
            tracing::error!("Failed to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================
// POLLING LOOP
// ============================================================

pub async fn run_ledger_polling(
    provider: Arc<dyn LedgerDataProvider>,
    queue: Arc<EventQueue>,
    status: watch::Sender<UpstreamStatus>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let batch_size = provider.get_metadata().max_batch_size;
    let mut cursor: Option<u64> = None;
    let mut failures: u32 = 0;

    tracing::info!(
        "Ledger polling started via {} (interval: {}s)",
        provider.provider_name(),
        poll_interval.as_secs()
    );

    loop {
        let delay = match provider.fetch_ledgers_after(cursor, batch_size).await {
            Ok(events) => {
                if failures > 0 {
                    tracing::info!("Upstream recovered after {} failed polls", failures);
                }
                failures = 0;
                status.send_if_modified(|s| {
                    let changed = *s != UpstreamStatus::Available;
                    *s = UpstreamStatus::Available;
                    changed
                });

                let fetched = events.len();
                for event in events {
                    cursor = Some(event.sequence);
                    tokio::select! {
                        _ = queue.push(event) => {}
                        _ = shutdown.changed() => {
                            tracing::info!("Shutdown signal received. Stopping polling.");
                            queue.close();
                            return;
                        }
                    }
                }

                if fetched > 0 {
                    tracing::debug!("Queued {} ledgers (cursor {:?})", fetched, cursor);
                }

                // a full batch means we are behind the tip
                if fetched as u32 >= batch_size {
                    Duration::ZERO
                } else {
                    poll_interval
                }
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                let delay = backoff_delay(poll_interval, failures, err.retry_after_secs());
                tracing::error!(
                    "Ledger polling error: {} (attempt {}, retrying in {:?})",
                    err,
                    failures,
                    delay
                );
                status.send_replace(UpstreamStatus::Unavailable(err));
                delay
            }
        };

        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = shutdown.changed() => {
                tracing::info!("Shutdown signal received. Stopping polling.");
                break;
            }
        }
    }

    queue.close();
    tracing::info!("Ledger polling stopped cleanly");
}

// ============================================================
// INGESTION LOOP
// ============================================================

/// Single writer: drains the queue into the engine until the queue is
/// closed and empty.
///
/// A shutdown signal closes the queue; events already queued are still
/// applied before the reorder buffer is flushed.
pub async fn run_ingestion(
    mut engine: FeeInsightsEngine,
    queue: Arc<EventQueue>,
    mut status: watch::Receiver<UpstreamStatus>,
    mut shutdown: watch::Receiver<bool>,
) -> FeeInsightsEngine {
    tracing::info!("Ingestion started for windows {:?}", engine.window_ids());
    let mut upstream_open = true;
    let mut draining = false;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed(), if !draining => {
                tracing::info!("Shutdown signal received. Draining ingestion queue.");
                draining = true;
                queue.close();
            }

            changed = status.changed(), if upstream_open => {
                if changed.is_err() {
                    upstream_open = false;
                    continue;
                }
                let current = status.borrow_and_update().clone();
                match current {
                    UpstreamStatus::Available => engine.set_upstream_unavailable(None),
                    UpstreamStatus::Unavailable(err) => {
                        engine.set_upstream_unavailable(Some((&err).into()))
                    }
                }
            }

            event = queue.pop() => {
                let Some(event) = event else {
                    tracing::debug!("Ingestion queue closed and drained");
                    break;
                };
                let sequence = event.sequence;
                let published = engine.process(event);
                if published > 0 {
                    tracing::debug!("Ledger {} published {} snapshots", sequence, published);
                }
                engine.set_degraded(queue.is_degraded());
            }
        }
    }

    let flushed = engine.flush();
    if flushed > 0 {
        tracing::info!("Flushed reorder buffer ({} snapshots published)", flushed);
    }
    tracing::info!("Ingestion stopped cleanly");
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::config::{InsightsConfig, WindowConfig};
    use crate::insights::types::{LedgerCloseEvent, LedgerTransaction, WindowId};
    use crate::queue::Backpressure;
    use crate::services::mock_horizon::MockHorizonClient;
    use chrono::{TimeZone, Utc};

    const T0: i64 = 1_700_000_040;

    fn event(sequence: u64, time: i64, fee: u64) -> LedgerCloseEvent {
        LedgerCloseEvent {
            sequence,
            close_time: Utc.timestamp_opt(time, 0).unwrap(),
            base_fee: 100,
            capacity: None,
            transactions: vec![LedgerTransaction {
                hash: format!("tx{}", sequence),
                fee_charged: fee,
                operation_count: 1,
                successful: true,
            }],
        }
    }

    fn engine() -> FeeInsightsEngine {
        FeeInsightsEngine::new(InsightsConfig {
            windows: vec![WindowConfig::new(60, 10)],
            ..InsightsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(1);
        let first = backoff_delay(base, 1, None);
        assert!(first >= base && first <= base + base / 4);

        let third = backoff_delay(base, 3, None);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_secs(5));

        let capped = backoff_delay(base, 30, None);
        assert!(capped >= MAX_BACKOFF && capped <= MAX_BACKOFF + MAX_BACKOFF / 4);
    }

    #[test]
    fn backoff_honours_retry_after() {
        let delay = backoff_delay(Duration::from_secs(1), 1, Some(30));
        assert!(delay >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn poller_queues_events_and_reports_outages() {
        let mock = Arc::new(
            MockHorizonClient::new()
                .with_batch(vec![event(1, T0, 100), event(2, T0 + 5, 100)])
                .with_error(ProviderError::RateLimitExceeded {
                    retry_after_secs: None,
                })
                .with_batch(vec![event(3, T0 + 10, 100)]),
        );
        let queue = Arc::new(EventQueue::new(8, Backpressure::Block));
        let (status_tx, mut status_rx) = watch::channel(UpstreamStatus::Available);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = tokio::spawn(run_ledger_polling(
            mock.clone(),
            queue.clone(),
            status_tx,
            Duration::from_secs(5),
            shutdown_rx,
        ));

        status_rx.changed().await.unwrap();
        assert!(matches!(
            *status_rx.borrow_and_update(),
            UpstreamStatus::Unavailable(ProviderError::RateLimitExceeded { .. })
        ));
        status_rx.changed().await.unwrap();
        assert_eq!(*status_rx.borrow(), UpstreamStatus::Available);

        shutdown_tx.send(true).unwrap();
        poller.await.unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(&mock.cursors()[..3], &[None, Some(2), Some(2)]);
    }

    #[tokio::test]
    async fn signal_flips_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        forward_shutdown_signal(async { Ok::<(), io::Error>(()) }, shutdown_tx).await;
        assert!(*shutdown_rx.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_signal_handler_keeps_service_running() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(forward_shutdown_signal(
            async { Err::<(), _>(io::Error::new(io::ErrorKind::Other, "no signal support")) },
            shutdown_tx,
        ));

        let waited = time::timeout(Duration::from_secs(3_600), shutdown_rx.changed()).await;
        assert!(waited.is_err(), "shutdown receivers must keep waiting");
        assert!(!*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn ingestion_publishes_and_stops_on_shutdown() {
        let engine = engine();
        let store = engine.store();
        let queue = Arc::new(EventQueue::new(8, Backpressure::Block));
        let (_status_tx, status_rx) = watch::channel(UpstreamStatus::Available);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        queue.push(event(1, T0, 100)).await;
        queue.push(event(2, T0 + 10, 300)).await;

        let handle = tokio::spawn(run_ingestion(engine, queue.clone(), status_rx, shutdown_rx));
        while !queue.is_empty() {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send(true).unwrap();
        let engine = handle.await.unwrap();

        assert_eq!(engine.published(), 1);
        let snap = store.get(WindowId::from_secs(60)).unwrap();
        assert_eq!(snap.as_of_sequence, 1);
        assert!(!snap.stale);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_events_first() {
        let engine = engine();
        let queue = Arc::new(EventQueue::new(8, Backpressure::Block));
        let (_status_tx, status_rx) = watch::channel(UpstreamStatus::Available);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for seq in 1..=3 {
            queue.push(event(seq, T0 + 10 * (seq as i64 - 1), 100)).await;
        }
        shutdown_tx.send(true).unwrap();

        let engine = run_ingestion(engine, queue.clone(), status_rx, shutdown_rx).await;
        assert!(queue.is_empty());
        // ledgers 2 and 3 each close the bucket before them
        assert_eq!(engine.published(), 2);
    }

    #[tokio::test]
    async fn closed_queue_ends_ingestion() {
        let engine = engine();
        let store = engine.store();
        let queue = Arc::new(EventQueue::new(8, Backpressure::Block));
        let (_status_tx, status_rx) = watch::channel(UpstreamStatus::Available);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        queue.push(event(1, T0, 100)).await;
        queue.push(event(2, T0 + 10, 100)).await;
        queue.close();

        let engine = run_ingestion(engine, queue, status_rx, shutdown_rx).await;
        assert_eq!(engine.published(), 1);
        assert_eq!(store.get(WindowId::from_secs(60)).unwrap().as_of_sequence, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_closes_queue_when_stopping() {
        let mock = Arc::new(MockHorizonClient::new().with_batch(vec![event(1, T0, 100)]));
        let queue = Arc::new(EventQueue::new(8, Backpressure::Block));
        let (status_tx, _status_rx) = watch::channel(UpstreamStatus::Available);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = tokio::spawn(run_ledger_polling(
            mock,
            queue.clone(),
            status_tx,
            Duration::from_secs(5),
            shutdown_rx,
        ));
        shutdown_tx.send(true).unwrap();
        poller.await.unwrap();

        // whatever was queued is still handed out, then the queue reports its end
        while let Some(event) = queue.pop().await {
            assert_eq!(event.sequence, 1);
        }
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn upstream_outage_reaches_snapshots() {
        let engine = engine();
        let store = engine.store();
        let queue = Arc::new(EventQueue::new(8, Backpressure::Block));
        let (status_tx, status_rx) = watch::channel(UpstreamStatus::Available);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        queue.push(event(1, T0, 100)).await;
        queue.push(event(2, T0 + 10, 100)).await;
        let handle = tokio::spawn(run_ingestion(engine, queue.clone(), status_rx, shutdown_rx));

        let w = WindowId::from_secs(60);
        while store.get(w).is_none() {
            tokio::task::yield_now().await;
        }
        status_tx
            .send(UpstreamStatus::Unavailable(ProviderError::ServiceUnavailable))
            .unwrap();
        while !store.get(w).unwrap().stale {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        let engine = handle.await.unwrap();
        assert!(engine.staleness().upstream_unavailable);
    }
}
