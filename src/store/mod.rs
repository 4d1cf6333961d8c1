// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store substrate.
//!
//! A store is an append-only transaction log plus a key/value namespace
//! (records, photos) plus an alert log. The pipeline only talks to stores
//! through [`TransactionStore`], so workers can be driven by Redis in
//! production and by [`MemoryStore`] in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> store_replication::Result<()> {
//! use store_replication::store::{MemoryStore, TransactionStore};
//! use store_replication::TransactionRecord;
//! use std::time::Duration;
//!
//! let store = MemoryStore::new("STORE_A");
//! store.pos_append(&TransactionRecord::purchase("T1", "STORE_A", "C1", 10.0, 1_700_000_000));
//!
//! let entries = store.read_log("0", 10, Duration::from_millis(100)).await?;
//! assert_eq!(entries.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Positions
//!
//! Log positions are stream ids (`{ms}-{seq}`). `"0"` means "before the
//! first entry". Reads are exclusive of the given position.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use crate::alert::FraudAlert;
use crate::error::Result;
use crate::record::TransactionRecord;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Type alias for boxed store futures (keeps trait signatures readable).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Position meaning "start of log".
pub const LOG_START: &str = "0";

/// Outcome of an idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write happened; payload size in bytes.
    Applied { bytes: usize },
    /// The id was already present. Nothing was written.
    Duplicate,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied { .. })
    }
}

/// What a log entry decoded to.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryBody {
    Record(TransactionRecord),
    /// The entry could not be decoded. Surfaced so it can be scored.
    Malformed {
        record_id: Option<String>,
        reason: String,
    },
}

/// One log entry and its position.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub position: String,
    pub body: EntryBody,
}

impl LogEntry {
    /// Decode raw entry fields. Never fails: bad entries become `Malformed`.
    pub fn from_fields(position: impl Into<String>, fields: &HashMap<String, String>) -> Self {
        let body = match TransactionRecord::from_stream_fields(fields) {
            Ok(record) => EntryBody::Record(record),
            Err(e) => EntryBody::Malformed {
                record_id: fields
                    .get("transaction_id")
                    .filter(|id| !id.trim().is_empty())
                    .cloned(),
                reason: e.to_string(),
            },
        };
        Self {
            position: position.into(),
            body,
        }
    }

    pub fn record(&self) -> Option<&TransactionRecord> {
        match &self.body {
            EntryBody::Record(r) => Some(r),
            EntryBody::Malformed { .. } => None,
        }
    }
}

/// Trait defining what the pipeline needs from a store.
///
/// All writes are idempotent by record id (or alert id): writing an id that
/// is already present returns [`WriteOutcome::Duplicate`] instead of an error.
/// Transient failures are returned as retryable errors; retry policy belongs
/// to the caller.
pub trait TransactionStore: Send + Sync + 'static {
    /// Store tag (matches `store_id` on records that originated here).
    fn store_id(&self) -> &str;

    /// Read up to `count` entries after `after`, waiting at most `block` for
    /// new entries. An empty vector means no data.
    fn read_log<'a>(
        &'a self,
        after: &'a str,
        count: usize,
        block: Duration,
    ) -> StoreFuture<'a, Vec<LogEntry>>;

    /// Append a record to the log unless this store already has it.
    fn append_log<'a>(&'a self, record: &'a TransactionRecord) -> StoreFuture<'a, WriteOutcome>;

    /// Write the record document unless present.
    fn put_record<'a>(&'a self, record: &'a TransactionRecord) -> StoreFuture<'a, WriteOutcome>;

    /// Point lookup of a record document.
    fn get_record<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<TransactionRecord>>;

    /// Photo blob for a record, if one was captured.
    fn get_photo<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    /// Write a photo blob unless present.
    fn put_photo<'a>(&'a self, record_id: &'a str, blob: &'a [u8]) -> StoreFuture<'a, WriteOutcome>;

    /// Append an alert unless an alert with the same id was appended before.
    fn append_alert<'a>(&'a self, alert: &'a FraudAlert) -> StoreFuture<'a, WriteOutcome>;

    /// Number of entries in the transaction log.
    fn log_len(&self) -> StoreFuture<'_, u64>;

    /// Position of the newest log entry, if any.
    fn latest_position(&self) -> StoreFuture<'_, Option<String>>;
}

/// Compare two stream ids numerically.
///
/// Stream ids are formatted as `{timestamp}-{sequence}` (e.g., "1234567890123-0").
/// `"0"` and malformed ids sort as timestamp 0.
pub fn compare_stream_ids(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |s: &str| -> (u64, u64) {
        match s.split_once('-') {
            Some((ts, seq)) => (ts.parse().unwrap_or(0), seq.parse().unwrap_or(0)),
            None => (s.parse().unwrap_or(0), 0),
        }
    };
    parse(a).cmp(&parse(b))
}

/// Parse the millisecond timestamp of a stream id. `None` for `"0"` or malformed ids.
pub fn parse_stream_id_timestamp(stream_id: &str) -> Option<u64> {
    let (ts, seq) = stream_id.split_once('-')?;
    seq.parse::<u64>().ok()?;
    ts.parse().ok()
}

/// Lag in milliseconds between a cursor and the newest entry.
///
/// Returns 0 if the cursor is ahead of latest.
pub fn calculate_lag_ms(cursor: &str, latest: &str) -> Option<u64> {
    let cursor_ts = parse_stream_id_timestamp(cursor)?;
    let latest_ts = parse_stream_id_timestamp(latest)?;
    Some(latest_ts.saturating_sub(cursor_ts))
}
