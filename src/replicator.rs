// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicates one transaction from a source store to a target store.
//!
//! # Units
//!
//! ```text
//! STREAM  append to the target log        (skipped if the target has the id)
//! RECORD  write transaction:{id}          (SET NX)
//! PHOTO   copy photo:{id} if the source has one
//! ```
//!
//! Each unit is retried on its own. A unit whose retries run out is dropped
//! and reported; the other units still run.

use crate::error::Result;
use crate::metrics;
use crate::record::{ReplicationEvent, TransactionRecord, UnitKind};
use crate::resilience::{retry_with_backoff, RetryConfig};
use crate::store::{TransactionStore, WriteOutcome};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// One replication direction, e.g. `STORE_A->STORE_B`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Direction {
    pub source: String,
    pub target: String,
}

impl Direction {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Cursor and metric key.
    pub fn name(&self) -> String {
        format!("{}->{}", self.source, self.target)
    }

    /// A record that originated in the target store must not be sent back.
    pub fn is_echo(&self, record: &TransactionRecord) -> bool {
        record.store_id == self.target
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// What happened to each unit of one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationReport {
    pub record_id: String,
    /// One event per applied unit.
    pub events: Vec<ReplicationEvent>,
    /// Units the target already had, with the time spent finding out (ms).
    pub duplicates: Vec<(UnitKind, f64)>,
    /// Units given up on, with the last error.
    pub dropped: Vec<(UnitKind, String)>,
    /// The source had no photo for this record.
    pub photo_skipped: bool,
}

impl ReplicationReport {
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.events.iter().map(|e| e.payload_size_bytes).sum()
    }
}

/// Copies records from `source` to `target`.
pub struct Replicator<S: TransactionStore> {
    source: Arc<S>,
    target: Arc<S>,
    direction: Direction,
    retry: RetryConfig,
}

impl<S: TransactionStore> Replicator<S> {
    pub fn new(source: Arc<S>, target: Arc<S>, retry: RetryConfig) -> Self {
        let direction = Direction::new(source.store_id(), target.store_id());
        Self {
            source,
            target,
            direction,
            retry,
        }
    }

    pub fn direction(&self) -> &Direction {
        &self.direction
    }

    /// Replicate all units of `record`.
    pub async fn replicate(&self, record: &TransactionRecord) -> ReplicationReport {
        let mut report = ReplicationReport {
            record_id: record.id.clone(),
            ..Default::default()
        };
        let target = &self.target;

        self.apply_unit(&mut report, UnitKind::Stream, || target.append_log(record))
            .await;
        self.apply_unit(&mut report, UnitKind::Record, || target.put_record(record))
            .await;

        let source = &self.source;
        let photo = retry_with_backoff(&self.retry, "get_photo", || source.get_photo(&record.id)).await;
        match photo {
            Ok(Some(blob)) => {
                let blob = blob.as_slice();
                self.apply_unit(&mut report, UnitKind::Photo, || target.put_photo(&record.id, blob))
                    .await;
            }
            Ok(None) => report.photo_skipped = true,
            Err(e) => self.drop_unit(&mut report, UnitKind::Photo, e.to_string()),
        }

        debug!(
            direction = %self.direction,
            record_id = %record.id,
            applied = report.events.len(),
            duplicates = report.duplicates.len(),
            dropped = report.dropped.len(),
            "Record replicated"
        );
        report
    }

    async fn apply_unit<F, Fut>(&self, report: &mut ReplicationReport, kind: UnitKind, write: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<WriteOutcome>>,
    {
        let direction = self.direction.name();
        let started = Instant::now();
        let outcome = retry_with_backoff(&self.retry, kind.as_str(), write).await;
        let elapsed = started.elapsed();
        let latency_ms = elapsed.as_secs_f64() * 1000.0;

        match outcome {
            Ok(WriteOutcome::Applied { bytes }) => {
                metrics::record_unit_applied(&direction, kind.as_str(), bytes, elapsed);
                report.events.push(ReplicationEvent {
                    source_store: self.direction.source.clone(),
                    target_store: self.direction.target.clone(),
                    record_id: report.record_id.clone(),
                    kind,
                    payload_size_bytes: bytes,
                    latency_ms,
                    timestamp: chrono::Utc::now().timestamp(),
                });
            }
            Ok(WriteOutcome::Duplicate) => {
                metrics::record_unit_duplicate(&direction, kind.as_str());
                report.duplicates.push((kind, latency_ms));
            }
            Err(e) => self.drop_unit(report, kind, e.to_string()),
        }
    }

    fn drop_unit(&self, report: &mut ReplicationReport, kind: UnitKind, reason: String) {
        error!(
            direction = %self.direction,
            record_id = %report.record_id,
            unit = %kind,
            error = %reason,
            "Replication unit dropped after retries"
        );
        metrics::record_unit_dropped(&self.direction.name(), kind.as_str());
        report.dropped.push((kind, reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<MemoryStore>, Replicator<MemoryStore>) {
        let a = Arc::new(MemoryStore::new("STORE_A"));
        let b = Arc::new(MemoryStore::new("STORE_B"));
        let replicator = Replicator::new(Arc::clone(&a), Arc::clone(&b), RetryConfig::testing());
        (a, b, replicator)
    }

    fn record() -> TransactionRecord {
        TransactionRecord::purchase("T1", "STORE_A", "C1", 199.99, 1_700_000_000).with_sku("SKU-1")
    }

    #[test]
    fn test_direction() {
        let d = Direction::new("STORE_A", "STORE_B");
        assert_eq!(d.name(), "STORE_A->STORE_B");
        assert_eq!(d.to_string(), "STORE_A->STORE_B");
        assert!(d.is_echo(&TransactionRecord::purchase("T", "STORE_B", "C", 1.0, 1)));
        assert!(!d.is_echo(&TransactionRecord::purchase("T", "STORE_A", "C", 1.0, 1)));
    }

    #[tokio::test]
    async fn test_replicates_all_units() {
        let (a, b, replicator) = setup();
        let r = record();
        a.pos_append(&r);
        a.put_photo_blob("T1", b"jpeg-bytes");

        let report = replicator.replicate(&r).await;
        assert!(report.is_complete());
        assert!(!report.photo_skipped);
        let kinds: Vec<_> = report.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![UnitKind::Stream, UnitKind::Record, UnitKind::Photo]);
        assert!(report.events.iter().all(|e| e.source_store == "STORE_A" && e.target_store == "STORE_B"));
        assert!(report.bytes() > 0);

        assert_eq!(b.log_count("T1"), 1);
        assert!(b.has_record("T1"));
        assert_eq!(b.photo("T1"), Some(b"jpeg-bytes".to_vec()));
        assert_eq!(
            b.log_entries()[0].record().unwrap().product_sku.as_deref(),
            Some("SKU-1")
        );
    }

    #[tokio::test]
    async fn test_missing_photo_is_skipped() {
        let (a, _b, replicator) = setup();
        let r = record();
        a.pos_append(&r);

        let report = replicator.replicate(&r).await;
        assert!(report.photo_skipped);
        assert_eq!(report.events.len(), 2);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_second_replication_is_all_duplicates() {
        let (a, b, replicator) = setup();
        let r = record();
        a.pos_append(&r);
        a.put_photo_blob("T1", b"p");

        replicator.replicate(&r).await;
        let again = replicator.replicate(&r).await;

        assert!(again.events.is_empty());
        assert_eq!(again.duplicates.len(), 3);
        assert_eq!(b.log_count("T1"), 1);
    }

    #[tokio::test]
    async fn test_transient_target_failure_is_retried() {
        let (a, b, replicator) = setup();
        let r = record();
        a.pos_append(&r);
        b.fail_next(2);

        let report = replicator.replicate(&r).await;
        assert!(report.is_complete());
        assert_eq!(b.log_count("T1"), 1);
    }

    #[tokio::test]
    async fn test_target_down_drops_units() {
        let (a, b, replicator) = setup();
        let r = record();
        a.pos_append(&r);
        a.put_photo_blob("T1", b"p");
        b.set_offline(true);

        let report = replicator.replicate(&r).await;
        assert!(!report.is_complete());
        assert!(report.events.is_empty());
        let dropped: Vec<_> = report.dropped.iter().map(|(k, _)| *k).collect();
        assert_eq!(dropped, vec![UnitKind::Stream, UnitKind::Record, UnitKind::Photo]);
    }
}
