//! End-to-end checks through the engine and the snapshot store.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use super::config::{InsightsConfig, WindowConfig};
use super::engine::FeeInsightsEngine;
use super::types::{LedgerCloseEvent, LedgerTransaction, Snapshot, WindowId};

const T0: i64 = 1_700_000_040;

fn tx(sequence: u64, index: usize, fee: u64, successful: bool) -> LedgerTransaction {
    LedgerTransaction {
        hash: format!("{}-{}", sequence, index),
        fee_charged: fee,
        operation_count: 1,
        successful,
    }
}

fn event(sequence: u64, time: i64, fees: &[u64]) -> LedgerCloseEvent {
    LedgerCloseEvent {
        sequence,
        close_time: Utc.timestamp_opt(time, 0).unwrap(),
        base_fee: 100,
        capacity: None,
        transactions: fees
            .iter()
            .enumerate()
            .map(|(i, fee)| tx(sequence, i, *fee, true))
            .collect(),
    }
}

fn engine_with(windows: Vec<WindowConfig>) -> FeeInsightsEngine {
    FeeInsightsEngine::new(InsightsConfig {
        windows,
        ..InsightsConfig::default()
    })
    .unwrap()
}

fn latest(engine: &FeeInsightsEngine, secs: u64) -> Snapshot {
    let snap = engine.store().get(WindowId::from_secs(secs)).unwrap();
    (*snap).clone()
}

#[test]
fn average_min_max_of_a_closed_bucket() {
    let mut engine = engine_with(vec![WindowConfig::new(60, 10)]);
    engine.process(event(1, T0, &[100, 150, 200, 100]));
    engine.process(event(2, T0 + 10, &[]));

    let snap = latest(&engine, 60);
    assert_eq!(snap.base_fee, 100);
    assert_eq!(snap.average_paid_fee, 137.5);
    assert_eq!(snap.min_fee, 100);
    assert_eq!(snap.max_fee, 200);
    assert_eq!(snap.sample_count, 4);
    assert_eq!(snap.as_of_sequence, 1);
}

#[test]
fn skipped_sequences_flag_a_data_gap_and_ingestion_continues() {
    let mut engine = engine_with(vec![WindowConfig::new(60, 10)]);
    engine.process(event(100, T0, &[100]));
    engine.process(event(103, T0 + 15, &[100]));
    engine.process(event(104, T0 + 20, &[100]));

    let snap = latest(&engine, 60);
    assert_eq!(snap.as_of_sequence, 103);
    assert!(snap.data_gap);
    assert_eq!(snap.gaps.len(), 1);
    assert_eq!(snap.gaps[0].first_missing, 101);
    assert_eq!(snap.gaps[0].last_missing, 102);
    assert_eq!(snap.gaps[0].from.timestamp(), T0);
    assert_eq!(snap.gaps[0].to.timestamp(), T0 + 15);
    assert_eq!(engine.extractor_stats().accepted, 3);
}

#[test]
fn evicted_bucket_no_longer_contributes() {
    // retention of three 10s buckets
    let mut engine = engine_with(vec![WindowConfig::new(30, 10)]);
    engine.process(event(1, T0, &[10_000]));
    for (i, seq) in (2..=5).enumerate() {
        engine.process(event(seq, T0 + 10 * (i as i64 + 1), &[100]));
    }

    let snap = latest(&engine, 30);
    assert_eq!(snap.as_of_sequence, 4);
    assert_eq!(snap.max_fee, 100);
    assert_eq!(snap.sample_count, 3);
    assert_eq!(snap.congestion_trend.len(), 3);
}

#[test]
fn publishing_twice_differs_only_in_timestamp() {
    let mut engine = engine_with(vec![WindowConfig::new(60, 10)]);
    engine.process(event(1, T0, &[100, 400]));
    engine.process(event(2, T0 + 10, &[250]));

    engine.publish_all_at(Utc.timestamp_opt(T0 + 100, 0).unwrap());
    let first = latest(&engine, 60);
    engine.publish_all_at(Utc.timestamp_opt(T0 + 200, 0).unwrap());
    let second = latest(&engine, 60);

    assert!(first.same_content(&second));
    assert_ne!(first.last_updated, second.last_updated);
}

#[test]
fn failed_transactions_are_tagged_but_kept_out_of_fee_stats() {
    let mut engine = engine_with(vec![WindowConfig::new(60, 10)]);
    let mut first = event(1, T0, &[100]);
    first.transactions.push(tx(1, 1, 5_000, false));
    engine.process(first);
    engine.process(event(2, T0 + 10, &[]));

    let snap = latest(&engine, 60);
    assert_eq!(snap.transaction_count, 2);
    assert_eq!(snap.failed_count, 1);
    assert_eq!(snap.sample_count, 1);
    assert_eq!(snap.max_fee, 100);
}

#[test]
fn failed_transactions_can_be_excluded_entirely() {
    let mut engine = FeeInsightsEngine::new(InsightsConfig {
        windows: vec![WindowConfig::new(60, 10)],
        include_failed_transactions: false,
        ..InsightsConfig::default()
    })
    .unwrap();
    let mut first = event(1, T0, &[100]);
    first.transactions.push(tx(1, 1, 5_000, false));
    engine.process(first);
    engine.process(event(2, T0 + 10, &[]));

    let snap = latest(&engine, 60);
    assert_eq!(snap.transaction_count, 1);
    assert_eq!(snap.failed_count, 0);
    assert_eq!(engine.extractor_stats().failed_excluded, 1);
}

#[test]
fn reorder_buffer_restores_sequence_order() {
    let mut engine = FeeInsightsEngine::new(InsightsConfig {
        windows: vec![WindowConfig::new(60, 10)],
        reorder_capacity: 4,
        ..InsightsConfig::default()
    })
    .unwrap();
    engine.process(event(1, T0, &[100]));
    engine.process(event(3, T0 + 6, &[100]));
    engine.process(event(2, T0 + 3, &[100]));
    engine.process(event(4, T0 + 10, &[]));

    let snap = latest(&engine, 60);
    assert!(!snap.data_gap);
    assert_eq!(snap.sample_count, 3);
    assert_eq!(engine.late_drops(WindowId::from_secs(60)), Some(0));
}

#[test]
fn windows_publish_independently() {
    let mut engine = engine_with(vec![WindowConfig::new(60, 10), WindowConfig::new(300, 60)]);
    engine.process(event(1, T0, &[100]));
    engine.process(event(2, T0 + 10, &[200]));
    assert!(engine.store().get(WindowId::from_secs(300)).is_none());

    engine.process(event(3, T0 + 60, &[300]));
    let long = latest(&engine, 300);
    assert_eq!(long.sample_count, 2);
    assert_eq!(latest(&engine, 60).sample_count, 2);
}

proptest! {
    #[test]
    fn in_order_counts_match_transactions(
        steps in prop::collection::vec((1i64..30, prop::collection::vec(any::<bool>(), 0..6)), 1..40),
    ) {
        let mut engine = engine_with(vec![WindowConfig::new(3_600, 10)]);
        let mut time = T0;
        let mut expected = 0u64;
        let mut failed = 0u64;

        for (i, (advance, outcomes)) in steps.iter().enumerate() {
            time += advance;
            let sequence = i as u64 + 1;
            let mut ev = event(sequence, time, &[]);
            ev.transactions = outcomes
                .iter()
                .enumerate()
                .map(|(j, ok)| tx(sequence, j, 100 + j as u64, *ok))
                .collect();
            expected += outcomes.len() as u64;
            failed += outcomes.iter().filter(|ok| !**ok).count() as u64;
            engine.process(ev);
        }

        engine.publish_all_at(Utc::now());
        let snap = latest(&engine, 3_600);
        prop_assert_eq!(snap.transaction_count + snap.late_drops, expected);
        prop_assert_eq!(snap.late_drops, 0);
        prop_assert_eq!(snap.failed_count, failed);
    }

    #[test]
    fn percentiles_are_ordered(fees in prop::collection::vec(100u64..1_000_000, 1..200)) {
        let mut engine = engine_with(vec![WindowConfig::new(60, 10)]);
        engine.process(event(1, T0, &fees));
        engine.process(event(2, T0 + 10, &[]));

        let snap = latest(&engine, 60);
        let p50 = snap.percentile(50.0).unwrap();
        let p90 = snap.percentile(90.0).unwrap();
        let p99 = snap.percentile(99.0).unwrap();
        prop_assert!(p50 <= p90 && p90 <= p99);
        prop_assert!(snap.min_fee <= p50 && p99 <= snap.max_fee);
    }
}
