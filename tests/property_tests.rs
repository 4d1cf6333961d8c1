//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use proptest::prelude::*;
use store_replication::correlation::{CorrelationWindow, ScoringPolicy, WindowEntry};
use store_replication::record::{ReplicationEvent, UnitKind};
use store_replication::store::{calculate_lag_ms, compare_stream_ids, parse_stream_id_timestamp};
use store_replication::{FraudAlert, Indicator, MetricsAggregator};

// =============================================================================
// Stream ID Comparison Properties
// =============================================================================

proptest! {
    /// Stream ID comparison is reflexive: a == a
    #[test]
    fn stream_id_comparison_reflexive(ts in 0u64..u64::MAX, seq in 0u64..1000u64) {
        let id = format!("{}-{}", ts, seq);
        prop_assert_eq!(compare_stream_ids(&id, &id), std::cmp::Ordering::Equal);
    }

    /// Stream ID comparison is antisymmetric: if a < b then b > a
    #[test]
    fn stream_id_comparison_antisymmetric(
        ts1 in 0u64..1_000_000_000_000u64,
        seq1 in 0u64..1000u64,
        ts2 in 0u64..1_000_000_000_000u64,
        seq2 in 0u64..1000u64,
    ) {
        let id1 = format!("{}-{}", ts1, seq1);
        let id2 = format!("{}-{}", ts2, seq2);
        prop_assert_eq!(compare_stream_ids(&id1, &id2).reverse(), compare_stream_ids(&id2, &id1));
    }

    /// Higher timestamp always means greater ID (regardless of sequence)
    #[test]
    fn stream_id_timestamp_dominates(
        ts1 in 0u64..1_000_000_000_000u64,
        ts2 in 0u64..1_000_000_000_000u64,
        seq1 in 0u64..1000u64,
        seq2 in 0u64..1000u64,
    ) {
        prop_assume!(ts1 != ts2);
        let cmp = compare_stream_ids(&format!("{}-{}", ts1, seq1), &format!("{}-{}", ts2, seq2));
        prop_assert_eq!(cmp, ts1.cmp(&ts2));
    }

    /// The log start sorts before every real position
    #[test]
    fn log_start_sorts_first(ts in 1u64..u64::MAX, seq in 0u64..1000u64) {
        let id = format!("{}-{}", ts, seq);
        prop_assert_eq!(compare_stream_ids("0", &id), std::cmp::Ordering::Less);
    }

    #[test]
    fn stream_id_timestamp_parsing(ts in 0u64..u64::MAX, seq in 0u64..1000u64) {
        let id = format!("{}-{}", ts, seq);
        prop_assert_eq!(parse_stream_id_timestamp(&id), Some(ts));
    }

    /// Lag is never negative and is exact when the cursor trails
    #[test]
    fn lag_is_saturating(cursor in 0u64..1_000_000_000u64, latest in 0u64..1_000_000_000u64) {
        let lag = calculate_lag_ms(&format!("{}-0", cursor), &format!("{}-0", latest));
        prop_assert_eq!(lag, Some(latest.saturating_sub(cursor)));
    }
}

// =============================================================================
// Scoring Properties
// =============================================================================

fn entry(id: &str, store: &str, customer: &str, ts: i64, has_photo: bool) -> WindowEntry {
    WindowEntry {
        record_id: id.to_string(),
        store_id: store.to_string(),
        customer_id: customer.to_string(),
        timestamp: ts,
        has_photo,
        amount: -50.0,
    }
}

proptest! {
    /// Scores are clamped to 0..=100 for any weights
    #[test]
    fn score_is_clamped(
        cross in 0u32..500,
        photo in 0u32..500,
        customer in 0u32..500,
        timing in 0u32..500,
        has_photo in any::<bool>(),
        same_customer in any::<bool>(),
        dt in 0i64..1000,
    ) {
        let policy = ScoringPolicy {
            cross_store_weight: cross,
            no_photo_weight: photo,
            customer_mismatch_weight: customer,
            suspicious_timing_weight: timing,
            ..ScoringPolicy::default()
        };
        let prior = entry("R1", "STORE_A", "C1", 1000, true);
        let incoming = entry("R2", "STORE_B", if same_customer { "C1" } else { "C2" }, 1000 + dt, has_photo);

        let pair = policy.score_pair(&prior, &incoming);
        prop_assert!(pair.score <= 100);
        prop_assert!(pair.indicators.contains(&Indicator::SameOriginalCrossStore));
        prop_assert_eq!(pair.time_diff_secs, dt);
    }

    /// Removing the photo never lowers the score
    #[test]
    fn missing_photo_never_lowers_score(same_customer in any::<bool>(), dt in -600i64..600) {
        let policy = ScoringPolicy::default();
        let customer = if same_customer { "C1" } else { "C2" };
        let prior = entry("R1", "STORE_A", "C1", 1000, true);
        let with_photo = policy.score_pair(&prior, &entry("R2", "STORE_B", customer, 1000 + dt, true));
        let without = policy.score_pair(&prior, &entry("R2", "STORE_B", customer, 1000 + dt, false));
        prop_assert!(without.score >= with_photo.score);
    }

    /// Risk level is monotone in the score
    #[test]
    fn classification_is_monotone(a in 0u8..=100, b in 0u8..=100) {
        let policy = ScoringPolicy::default();
        prop_assume!(a <= b);
        prop_assert!(policy.classify(a) <= policy.classify(b));
    }
}

// =============================================================================
// Window Properties
// =============================================================================

proptest! {
    /// A window never exceeds its capacity or holds a record twice
    #[test]
    fn window_bounded_and_unique(
        ids in prop::collection::vec(0u8..20, 0..100),
        capacity in 1usize..10,
    ) {
        let mut window = CorrelationWindow::new();
        for (i, id) in ids.iter().enumerate() {
            window.push(entry(&format!("R{}", id), "STORE_A", "C1", i as i64, true), capacity);
            prop_assert!(window.len() <= capacity);
        }
        let mut seen: Vec<_> = window.iter().map(|e| e.record_id.clone()).collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        prop_assert_eq!(seen.len(), total);
    }
}

// =============================================================================
// Aggregator Properties
// =============================================================================

proptest! {
    /// Welford mean equals the arithmetic mean, min/max match
    #[test]
    fn welford_mean_matches(latencies in prop::collection::vec(0.0f64..10_000.0, 1..200)) {
        let agg = MetricsAggregator::new("STORE_A", "STORE_B");
        for (i, latency) in latencies.iter().enumerate() {
            agg.record_replication(&ReplicationEvent {
                source_store: if i % 2 == 0 { "STORE_A" } else { "STORE_B" }.to_string(),
                target_store: if i % 2 == 0 { "STORE_B" } else { "STORE_A" }.to_string(),
                record_id: format!("T{}", i),
                kind: UnitKind::Record,
                payload_size_bytes: 10,
                latency_ms: *latency,
                timestamp: 0,
            });
        }

        let snap = agg.snapshot();
        let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
        let min = latencies.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = latencies.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        prop_assert!((snap.avg_latency_ms - mean).abs() < 1e-6 * mean.max(1.0));
        prop_assert_eq!(snap.min_latency_ms, min);
        prop_assert_eq!(snap.max_latency_ms, max);
        prop_assert_eq!(snap.total_replications, latencies.len() as u64);
        prop_assert_eq!(snap.a_to_b_count + snap.b_to_a_count, latencies.len() as u64);
    }
}

// =============================================================================
// Alert Identity Properties
// =============================================================================

proptest! {
    /// Alert ids are deterministic and fixed-length
    #[test]
    fn alert_id_deterministic(fraud in "[A-Z0-9_]{1,20}", counterpart in "[A-Z0-9_]{1,20}") {
        let id = FraudAlert::make_id(&fraud, &counterpart);
        prop_assert_eq!(&id, &FraudAlert::make_id(&fraud, &counterpart));
        prop_assert_eq!(id.len(), "ALERT_".len() + 24);
        prop_assert!(id["ALERT_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
