// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Log reader: hands out a store's log entries one at a time.
//!
//! # Delivery
//!
//! At-least-once. Fetches always start after the last *committed* position,
//! so a record that was read but not committed is delivered again after a
//! failure. The reader never skips ahead of what the caller committed.
//!
//! # Failures
//!
//! A failed fetch is retried under the reader's [`RetryConfig`]. When the
//! attempts are used up the reader returns
//! [`ReplicationError::StoreUnavailable`]; only the direction using this
//! reader is affected.

use crate::config::ReaderConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::resilience::{retry_with_backoff, RetryConfig};
use crate::store::{compare_stream_ids, LogEntry, TransactionStore};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Result of one [`LogReader::read_next`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Entry(LogEntry),
    /// Nothing new within the block timeout.
    NoData,
}

/// Sequential reader over one store's log.
pub struct LogReader<S: TransactionStore> {
    store: Arc<S>,
    direction: String,
    block_timeout: Duration,
    batch_size: usize,
    retry: RetryConfig,
    buffer: VecDeque<LogEntry>,
    /// Last position handed out.
    position: String,
    /// Last position the caller finished processing.
    committed: String,
}

impl<S: TransactionStore> LogReader<S> {
    /// Create a reader that resumes after `start`.
    pub fn new(store: Arc<S>, direction: impl Into<String>, start: impl Into<String>, config: &ReaderConfig) -> Self {
        let start = start.into();
        Self {
            store,
            direction: direction.into(),
            block_timeout: config.block_timeout_duration(),
            batch_size: config.batch_size.max(1),
            retry: config.retry_config(),
            buffer: VecDeque::new(),
            position: start.clone(),
            committed: start,
        }
    }

    /// Next entry, or `NoData` after the block timeout.
    pub async fn read_next(&mut self) -> Result<ReadOutcome> {
        if self.buffer.is_empty() {
            self.fetch().await?;
        }
        match self.buffer.pop_front() {
            Some(entry) => {
                self.position = entry.position.clone();
                Ok(ReadOutcome::Entry(entry))
            }
            None => Ok(ReadOutcome::NoData),
        }
    }

    async fn fetch(&mut self) -> Result<()> {
        let store: &S = &self.store;
        let direction = self.direction.as_str();
        let after = self.committed.as_str();
        let (count, block) = (self.batch_size, self.block_timeout);

        let started = Instant::now();
        let result = retry_with_backoff(&self.retry, "read_log", move || {
            let read = store.read_log(after, count, block);
            async move {
                let result = read.await;
                if result.is_err() {
                    metrics::record_log_read_failure(direction);
                }
                result
            }
        })
        .await;

        let entries = match result {
            Ok(entries) => entries,
            Err(e) if e.is_retryable() => {
                return Err(ReplicationError::StoreUnavailable {
                    store_id: self.store.store_id().to_string(),
                    attempts: self.retry.max_attempts,
                    message: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        metrics::record_log_read(&self.direction, entries.len(), started.elapsed());

        let committed = &self.committed;
        self.buffer.extend(
            entries
                .into_iter()
                .filter(|e| compare_stream_ids(&e.position, committed).is_gt()),
        );
        // Buffered entries restart after the committed position
        self.position = self.committed.clone();

        if !self.buffer.is_empty() {
            trace!(
                direction = %self.direction,
                count = self.buffer.len(),
                after = %self.committed,
                "Fetched log entries"
            );
        }
        Ok(())
    }

    /// Mark everything up to `position` as processed. Never moves backwards.
    pub fn commit(&mut self, position: &str) {
        if compare_stream_ids(position, &self.committed).is_gt() {
            self.committed = position.to_string();
        }
    }

    /// Position of the last entry handed out.
    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn committed_position(&self) -> &str {
        &self.committed
    }

    pub fn direction(&self) -> &str {
        &self.direction
    }
}
