//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Log reads per direction
//! - Replicated units (applied, duplicate, dropped) by kind
//! - Replication latency and lag
//! - Fraud correlation outcomes and alerts
//! - Cursor persistence
//!
//! The library installs no exporter; the embedding process chooses one.
//!
//! # Metric Naming Convention
//!
//! Replication metrics are prefixed with `replication_`, fraud metrics with
//! `fraud_`. Counters end in `_total`, histograms record seconds.
//!
//! # Usage
//!
//! ```rust,no_run
//! use store_replication::metrics;
//! use std::time::Duration;
//!
//! metrics::record_log_read("STORE_A->STORE_B", 12, Duration::from_millis(3));
//! metrics::record_unit_applied("STORE_A->STORE_B", "STREAM", 180, Duration::from_millis(2));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Log reads
// =============================================================================

/// Record one log read and how many entries it returned.
pub fn record_log_read(direction: &str, entries: usize, duration: Duration) {
    counter!("replication_log_reads_total", "direction" => direction.to_string()).increment(1);
    counter!("replication_log_entries_read_total", "direction" => direction.to_string())
        .increment(entries as u64);
    histogram!("replication_log_read_duration_seconds", "direction" => direction.to_string())
        .record(duration.as_secs_f64());
}

/// Record a log read that failed (before retry).
pub fn record_log_read_failure(direction: &str) {
    counter!("replication_log_read_failures_total", "direction" => direction.to_string()).increment(1);
}

/// Record replication lag in milliseconds (based on stream id timestamps).
pub fn record_replication_lag_ms(direction: &str, lag_ms: u64) {
    gauge!("replication_lag_ms", "direction" => direction.to_string()).set(lag_ms as f64);
}

// =============================================================================
// Replicated units
// =============================================================================

/// Record a unit written to the target store.
pub fn record_unit_applied(direction: &str, kind: &str, bytes: usize, latency: Duration) {
    counter!(
        "replication_units_applied_total",
        "direction" => direction.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
    counter!("replication_bytes_total", "direction" => direction.to_string()).increment(bytes as u64);
    histogram!("replication_unit_latency_seconds", "kind" => kind.to_string())
        .record(latency.as_secs_f64());
}

/// Record a unit skipped because the target already had it.
pub fn record_unit_duplicate(direction: &str, kind: &str) {
    counter!(
        "replication_units_duplicate_total",
        "direction" => direction.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a unit dropped after write retries were exhausted.
pub fn record_unit_dropped(direction: &str, kind: &str) {
    counter!(
        "replication_units_dropped_total",
        "direction" => direction.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a record skipped because it originated in the target store.
pub fn record_echo_skipped(direction: &str) {
    counter!("replication_echo_skipped_total", "direction" => direction.to_string()).increment(1);
}

/// Record errors by type.
pub fn record_error(direction: &str, error_type: &str) {
    counter!(
        "replication_errors_total",
        "direction" => direction.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// =============================================================================
// Fraud correlation
// =============================================================================

/// Record a correlated return by risk level.
pub fn record_correlation(risk_level: &str, score: u8) {
    counter!("fraud_returns_scored_total", "risk_level" => risk_level.to_string()).increment(1);
    histogram!("fraud_return_score").record(score as f64);
}

/// Record an alert newly appended to the alert log(s).
pub fn record_alert(risk_level: &str) {
    counter!("fraud_alerts_total", "risk_level" => risk_level.to_string()).increment(1);
}

/// Record an alert that could not be appended to a store.
pub fn record_alert_failure(store_id: &str) {
    counter!("fraud_alert_failures_total", "store_id" => store_id.to_string()).increment(1);
}

/// Record an origin lookup against a store's key/value namespace.
pub fn record_origin_lookup(outcome: &str) {
    counter!("fraud_origin_lookups_total", "outcome" => outcome.to_string()).increment(1);
}

/// Gauges for correlation state size.
pub fn set_correlation_state(open_windows: usize, tracked_purchases: usize) {
    gauge!("fraud_open_windows").set(open_windows as f64);
    gauge!("fraud_tracked_purchases").set(tracked_purchases as f64);
}

/// Record window entries evicted by the periodic sweep.
pub fn record_window_sweep(evicted: usize) {
    counter!("fraud_window_sweeps_total").increment(1);
    counter!("fraud_window_entries_evicted_total").increment(evicted as u64);
}

// =============================================================================
// Cursor persistence
// =============================================================================

/// Record cursor flush batch (debounced writes).
pub fn record_cursor_flush(flushed: usize, errors: usize) {
    counter!("replication_cursor_flushes_total").increment(1);
    counter!("replication_cursor_flushed_count").increment(flushed as u64);
    if errors > 0 {
        counter!("replication_cursor_flush_errors_total").increment(errors as u64);
    }
}

/// Record cursor SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn cursor_retries_total(operation: &str) {
    counter!("replication_cursor_retries_total", "operation" => operation.to_string()).increment(1);
}

// =============================================================================
// Engine
// =============================================================================

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Numeric encoding for alerting rules
    let value = match state {
        "Created" => 0.0,
        "Connecting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("replication_engine_state").set(value);
}

/// Gauge for a direction's worker status (1 = running, 0 = halted/stopped).
pub fn set_direction_running(direction: &str, running: bool) {
    gauge!("replication_direction_running", "direction" => direction.to_string())
        .set(if running { 1.0 } else { 0.0 });
}

/// Gauge for a store's transaction log length.
pub fn set_log_length(store_id: &str, len: u64) {
    gauge!("replication_log_length", "store_id" => store_id.to_string()).set(len as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The metrics crate uses global state and no recorder is installed in
    // tests, so these only check the calls do not panic.

    #[test]
    fn test_record_log_read() {
        record_log_read("A->B", 0, Duration::ZERO);
        record_log_read("A->B", 10, Duration::from_millis(5));
        record_log_read_failure("B->A");
    }

    #[test]
    fn test_record_units() {
        record_unit_applied("A->B", "STREAM", 120, Duration::from_millis(1));
        record_unit_duplicate("A->B", "RECORD");
        record_unit_dropped("B->A", "PHOTO");
        record_echo_skipped("B->A");
        record_error("A->B", "store_io");
    }

    #[test]
    fn test_record_fraud() {
        record_correlation("CRITICAL", 100);
        record_alert("HIGH");
        record_alert_failure("STORE_A");
        record_origin_lookup("found");
        set_correlation_state(3, 42);
        record_window_sweep(0);
    }

    #[test]
    fn test_set_engine_state_all_states() {
        for state in ["Created", "Connecting", "Running", "ShuttingDown", "Stopped", "Failed", "Bogus"] {
            set_engine_state(state);
        }
    }

    #[test]
    fn test_cursor_and_gauges() {
        record_cursor_flush(2, 0);
        record_cursor_flush(0, 1);
        cursor_retries_total("set");
        record_replication_lag_ms("A->B", 250);
        set_direction_running("A->B", true);
        set_log_length("STORE_A", 17);
    }
}
