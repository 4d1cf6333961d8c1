// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process store with the same contract as [`RedisStore`](super::RedisStore).
//!
//! Used by tests and demos. With the `test-harness` feature it also supports
//! fault injection:
//!
//! - [`fail_next`](MemoryStore::fail_next): the next N operations fail transiently
//! - [`set_offline`](MemoryStore::set_offline): every operation fails until cleared
//! - [`set_log_offline`](MemoryStore::set_log_offline): only log reads fail
//!
//! The `pos_*` helpers stand in for a point-of-sale writing locally.

use super::{compare_stream_ids, LogEntry, StoreFuture, TransactionStore, WriteOutcome};
use crate::alert::FraudAlert;
use crate::error::{ReplicationError, Result};
use crate::record::TransactionRecord;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct Inner {
    log: Vec<(String, HashMap<String, String>)>,
    log_ids: HashSet<String>,
    records: HashMap<String, String>,
    photos: HashMap<String, Vec<u8>>,
    alerts: Vec<FraudAlert>,
    alert_ids: HashSet<String>,
    last_ms: u64,
    last_seq: u64,
    fail_next: usize,
    offline: bool,
    log_offline: bool,
}

impl Inner {
    fn next_position(&mut self) -> String {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if now_ms > self.last_ms {
            self.last_ms = now_ms;
            self.last_seq = 0;
        } else {
            self.last_seq += 1;
        }
        format!("{}-{}", self.last_ms, self.last_seq)
    }

    fn push_entry(&mut self, fields: HashMap<String, String>) -> String {
        let position = self.next_position();
        if let Some(id) = fields.get("transaction_id") {
            self.log_ids.insert(id.clone());
        }
        self.log.push((position.clone(), fields));
        position
    }
}

/// In-memory [`TransactionStore`].
pub struct MemoryStore {
    store_id: String,
    inner: Mutex<Inner>,
    appended: Notify,
}

impl MemoryStore {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            inner: Mutex::new(Inner::default()),
            appended: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply injected faults for one operation.
    fn check(&self, inner: &mut Inner, operation: &str, is_read: bool) -> Result<()> {
        if inner.offline || (is_read && inner.log_offline) {
            return Err(ReplicationError::store_io(&self.store_id, operation, "store offline"));
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(ReplicationError::store_io(&self.store_id, operation, "injected failure"));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fault injection
    // ─────────────────────────────────────────────────────────────────────────

    /// Fail the next `n` operations with a transient error.
    #[cfg(any(feature = "test-harness", test))]
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    #[cfg(any(feature = "test-harness", test))]
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail log reads only. Writes and lookups keep working.
    #[cfg(any(feature = "test-harness", test))]
    pub fn set_log_offline(&self, offline: bool) {
        self.lock().log_offline = offline;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Point-of-sale helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a local transaction: log entry plus record document.
    pub fn pos_append(&self, record: &TransactionRecord) -> String {
        let fields = record
            .to_stream_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let position = {
            let mut inner = self.lock();
            if let Ok(json) = record.to_json() {
                inner.records.insert(record.id.clone(), json);
            }
            inner.push_entry(fields)
        };
        self.appended.notify_waiters();
        position
    }

    /// Append raw fields to the log (for malformed entries).
    pub fn pos_append_raw(&self, fields: &[(&str, &str)]) -> String {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let position = self.lock().push_entry(fields);
        self.appended.notify_waiters();
        position
    }

    /// Store a photo blob captured at the point of sale.
    pub fn put_photo_blob(&self, record_id: &str, blob: &[u8]) {
        self.lock().photos.insert(record_id.to_string(), blob.to_vec());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.lock()
            .log
            .iter()
            .map(|(pos, fields)| LogEntry::from_fields(pos.clone(), fields))
            .collect()
    }

    /// How many log entries carry `record_id`.
    pub fn log_count(&self, record_id: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(_, f)| f.get("transaction_id").map(String::as_str) == Some(record_id))
            .count()
    }

    pub fn has_record(&self, record_id: &str) -> bool {
        self.lock().records.contains_key(record_id)
    }

    pub fn photo(&self, record_id: &str) -> Option<Vec<u8>> {
        self.lock().photos.get(record_id).cloned()
    }

    pub fn alerts(&self) -> Vec<FraudAlert> {
        self.lock().alerts.clone()
    }
}

impl TransactionStore for MemoryStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn read_log<'a>(
        &'a self,
        after: &'a str,
        count: usize,
        block: Duration,
    ) -> StoreFuture<'a, Vec<LogEntry>> {
        Box::pin(async move {
            let deadline = Instant::now() + block;
            loop {
                let appended = self.appended.notified();
                {
                    let mut inner = self.lock();
                    self.check(&mut inner, "read_log", true)?;
                    let entries: Vec<LogEntry> = inner
                        .log
                        .iter()
                        .filter(|(pos, _)| compare_stream_ids(pos, after).is_gt())
                        .take(count.max(1))
                        .map(|(pos, fields)| LogEntry::from_fields(pos.clone(), fields))
                        .collect();
                    if !entries.is_empty() {
                        return Ok(entries);
                    }
                }
                if Instant::now() >= deadline {
                    return Ok(Vec::new());
                }
                if tokio::time::timeout_at(deadline, appended).await.is_err() {
                    return Ok(Vec::new());
                }
            }
        })
    }

    fn append_log<'a>(&'a self, record: &'a TransactionRecord) -> StoreFuture<'a, WriteOutcome> {
        Box::pin(async move {
            let fields: HashMap<String, String> = record
                .to_stream_fields()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            {
                let mut inner = self.lock();
                self.check(&mut inner, "append_log", false)?;
                if inner.records.contains_key(&record.id) || inner.log_ids.contains(&record.id) {
                    return Ok(WriteOutcome::Duplicate);
                }
                inner.push_entry(fields);
            }
            self.appended.notify_waiters();
            Ok(WriteOutcome::Applied {
                bytes: record.stream_payload_size(),
            })
        })
    }

    fn put_record<'a>(&'a self, record: &'a TransactionRecord) -> StoreFuture<'a, WriteOutcome> {
        Box::pin(async move {
            let json = record.to_json()?;
            let mut inner = self.lock();
            self.check(&mut inner, "put_record", false)?;
            if inner.records.contains_key(&record.id) {
                return Ok(WriteOutcome::Duplicate);
            }
            let bytes = json.len();
            inner.records.insert(record.id.clone(), json);
            Ok(WriteOutcome::Applied { bytes })
        })
    }

    fn get_record<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<TransactionRecord>> {
        Box::pin(async move {
            let json = {
                let mut inner = self.lock();
                self.check(&mut inner, "get_record", false)?;
                inner.records.get(record_id).cloned()
            };
            json.map(|raw| TransactionRecord::from_json(&raw)).transpose()
        })
    }

    fn get_photo<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let mut inner = self.lock();
            self.check(&mut inner, "get_photo", false)?;
            Ok(inner.photos.get(record_id).cloned())
        })
    }

    fn put_photo<'a>(&'a self, record_id: &'a str, blob: &'a [u8]) -> StoreFuture<'a, WriteOutcome> {
        Box::pin(async move {
            let mut inner = self.lock();
            self.check(&mut inner, "put_photo", false)?;
            if inner.photos.contains_key(record_id) {
                return Ok(WriteOutcome::Duplicate);
            }
            inner.photos.insert(record_id.to_string(), blob.to_vec());
            Ok(WriteOutcome::Applied { bytes: blob.len() })
        })
    }

    fn append_alert<'a>(&'a self, alert: &'a FraudAlert) -> StoreFuture<'a, WriteOutcome> {
        Box::pin(async move {
            let mut inner = self.lock();
            self.check(&mut inner, "append_alert", false)?;
            if !inner.alert_ids.insert(alert.alert_id.clone()) {
                return Ok(WriteOutcome::Duplicate);
            }
            inner.alerts.push(alert.clone());
            Ok(WriteOutcome::Applied {
                bytes: alert.stream_payload_size(),
            })
        })
    }

    fn log_len(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut inner = self.lock();
            self.check(&mut inner, "log_len", true)?;
            Ok(inner.log.len() as u64)
        })
    }

    fn latest_position(&self) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let mut inner = self.lock();
            self.check(&mut inner, "latest_position", true)?;
            Ok(inner.log.last().map(|(pos, _)| pos.clone()))
        })
    }
}
