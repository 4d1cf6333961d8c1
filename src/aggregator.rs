// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process replication and fraud statistics.
//!
//! Counters are atomics. Latency is a running Welford mean with min/max
//! behind one short mutex, so [`MetricsAggregator::snapshot`] never waits on
//! anything but that critical section.

use crate::correlation::Correlation;
use crate::record::ReplicationEvent;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct LatencyStats {
    count: u64,
    mean: f64,
    min: f64,
    max: f64,
}

impl LatencyStats {
    fn update(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.mean = value;
            self.min = value;
            self.max = value;
            return;
        }
        self.mean += (value - self.mean) / self.count as f64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Point-in-time copy of the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_replications: u64,
    pub a_to_b_count: u64,
    pub b_to_a_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub data_volume_bytes: u64,
    pub errors: u64,
    pub duplicates_skipped: u64,
    pub fraud_attempts: u64,
    pub fraud_detected: u64,
    pub fraud_prevented: u64,
    /// Sum of |amount| of prevented returns.
    pub value_protected: f64,
    pub alerts_emitted: u64,
}

/// Shared statistics for both directions.
pub struct MetricsAggregator {
    store_a: String,
    store_b: String,
    total: AtomicU64,
    a_to_b: AtomicU64,
    b_to_a: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
    duplicates: AtomicU64,
    attempts: AtomicU64,
    detected: AtomicU64,
    prevented: AtomicU64,
    /// In cents to stay atomic.
    value_protected_cents: AtomicU64,
    alerts: AtomicU64,
    latency: Mutex<LatencyStats>,
}

impl MetricsAggregator {
    pub fn new(store_a: impl Into<String>, store_b: impl Into<String>) -> Self {
        Self {
            store_a: store_a.into(),
            store_b: store_b.into(),
            total: AtomicU64::new(0),
            a_to_b: AtomicU64::new(0),
            b_to_a: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            detected: AtomicU64::new(0),
            prevented: AtomicU64::new(0),
            value_protected_cents: AtomicU64::new(0),
            alerts: AtomicU64::new(0),
            latency: Mutex::new(LatencyStats::default()),
        }
    }

    /// Count one applied unit.
    pub fn record_replication(&self, event: &ReplicationEvent) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if event.source_store == self.store_a && event.target_store == self.store_b {
            self.a_to_b.fetch_add(1, Ordering::Relaxed);
        } else if event.source_store == self.store_b && event.target_store == self.store_a {
            self.b_to_a.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes
            .fetch_add(event.payload_size_bytes as u64, Ordering::Relaxed);

        let mut latency = self.latency.lock().unwrap_or_else(|e| e.into_inner());
        latency.update(event.latency_ms);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the fraud outcome of one correlation.
    pub fn record_correlation(&self, correlation: &Correlation, alert_threshold: u8) {
        if !correlation.is_suspicious() {
            return;
        }
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if correlation.score >= alert_threshold {
            self.detected.fetch_add(1, Ordering::Relaxed);
        }
        if correlation.risk_level.is_blocking() {
            self.prevented.fetch_add(1, Ordering::Relaxed);
            let cents = (correlation.flagged().amount.abs() * 100.0).round() as u64;
            self.value_protected_cents.fetch_add(cents, Ordering::Relaxed);
        }
    }

    pub fn record_alerts(&self, count: usize) {
        self.alerts.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        MetricsSnapshot {
            total_replications: self.total.load(Ordering::Relaxed),
            a_to_b_count: self.a_to_b.load(Ordering::Relaxed),
            b_to_a_count: self.b_to_a.load(Ordering::Relaxed),
            avg_latency_ms: latency.mean,
            min_latency_ms: latency.min,
            max_latency_ms: latency.max,
            data_volume_bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates.load(Ordering::Relaxed),
            fraud_attempts: self.attempts.load(Ordering::Relaxed),
            fraud_detected: self.detected.load(Ordering::Relaxed),
            fraud_prevented: self.prevented.load(Ordering::Relaxed),
            value_protected: self.value_protected_cents.load(Ordering::Relaxed) as f64 / 100.0,
            alerts_emitted: self.alerts.load(Ordering::Relaxed),
        }
    }
}
