// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cursor persistence for log positions.
//!
//! Stores the last committed log position of each replication direction
//! (`"STORE_A->STORE_B"`) in SQLite, so a restarted process resumes where it
//! left off instead of replaying both logs from the start.
//!
//! # Debounced Writes
//!
//! - `set()` updates the in-memory cache immediately and marks the cursor dirty
//! - `flush_dirty()` persists all dirty cursors to disk in a batch
//! - The coordinator calls `flush_dirty()` periodically and on shutdown
//!
//! A crash between `set()` and `flush_dirty()` loses at most one flush
//! interval of progress. The records in that interval are read again on
//! restart; every replicated unit and alert is idempotent by id.
//!
//! # SQLite Busy Handling
//!
//! SQLITE_BUSY/SQLITE_LOCKED are retried with exponential backoff
//! (5 attempts, 10ms doubling to 500ms). The cache is updated first, so a
//! failed flush only delays persistence.
//!
//! ## Cursor Semantics
//!
//! The cursor stores the **last fully processed** position. Reads resume
//! after it (exclusive).
//!
//! ```text
//! read 1234 → replicate → correlate → alert → set cursor 1234
//!                          (crash here = re-read 1234, idempotent)
//! ```

use crate::config::CursorConfig;
use crate::error::{ReplicationError, Result};
use crate::store::LOG_START;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

const IN_MEMORY: &str = ":memory:";

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "SQLite operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::cursor_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(operation = operation_name, attempts, "SQLite busy, max retries exceeded");
                }
                return Err(e);
            }
        }
    }
}

/// Persistent cursor storage backed by SQLite.
pub struct CursorStore {
    pool: SqlitePool,
    /// Direction → last committed position
    cache: Arc<RwLock<HashMap<String, String>>>,
    /// Directions with cursors not yet persisted
    dirty: Arc<RwLock<HashSet<String>>>,
    path: String,
}

impl CursorStore {
    /// Open the cursor store described by `config`.
    pub async fn open(config: &CursorConfig) -> Result<Self> {
        if config.sqlite_path == IN_MEMORY {
            Self::in_memory().await
        } else {
            Self::new(&config.sqlite_path).await
        }
    }

    /// Create a cursor store at the given path.
    ///
    /// Creates the database and table if they don't exist.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Initializing cursor store");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))
            .map_err(|e| ReplicationError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        Self::init(pool, path_str).await
    }

    /// Non-persistent store for tests.
    ///
    /// Each in-memory connection is its own database, so the pool is pinned
    /// to a single connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| ReplicationError::Config(format!("Invalid SQLite path: {}", e)))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::init(pool, IN_MEMORY.to_string()).await
    }

    async fn init(pool: SqlitePool, path: String) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS direction_cursors (
                direction TEXT PRIMARY KEY,
                position TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT direction, position FROM direction_cursors")
                .fetch_all(&pool)
                .await?;

        let mut cache = HashMap::new();
        for (direction, position) in rows {
            debug!(direction = %direction, position = %position, "Loaded cursor from disk");
            cache.insert(direction, position);
        }

        if !cache.is_empty() {
            info!(count = cache.len(), "Restored cursors from previous run");
        }

        Ok(Self {
            pool,
            cache: Arc::new(RwLock::new(cache)),
            dirty: Arc::new(RwLock::new(HashSet::new())),
            path,
        })
    }

    /// Get the cursor for a direction (from cache).
    pub async fn get(&self, direction: &str) -> Option<String> {
        self.cache.read().await.get(direction).cloned()
    }

    /// Get the cursor, or the start of the log for a first run.
    pub async fn get_or_start(&self, direction: &str) -> String {
        self.get(direction).await.unwrap_or_else(|| LOG_START.to_string())
    }

    /// Update the cursor for a direction (debounced).
    pub async fn set(&self, direction: &str, position: &str) {
        self.cache
            .write()
            .await
            .insert(direction.to_string(), position.to_string());
        self.dirty.write().await.insert(direction.to_string());

        debug!(direction = %direction, position = %position, "Cursor updated (pending flush)");
    }

    /// Flush all dirty cursors to disk. Returns the number flushed.
    pub async fn flush_dirty(&self) -> Result<usize> {
        let dirty: Vec<String> = self.dirty.write().await.drain().collect();
        if dirty.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let cache = self.cache.read().await;
        let pool = &self.pool;

        let mut flushed = 0;
        let mut errors = 0;

        for direction in &dirty {
            let Some(position) = cache.get(direction) else {
                continue;
            };

            let result = execute_with_retry("cursor_flush", || async {
                sqlx::query(
                    r#"
                    INSERT INTO direction_cursors (direction, position, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(direction) DO UPDATE SET
                        position = excluded.position,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(direction)
                .bind(position)
                .bind(now)
                .execute(pool)
                .await
            })
            .await;

            match result {
                Ok(_) => flushed += 1,
                Err(e) => {
                    errors += 1;
                    warn!(direction = %direction, error = %e, "Failed to flush cursor");
                    // Retry on next flush
                    self.dirty.write().await.insert(direction.clone());
                }
            }
        }

        crate::metrics::record_cursor_flush(flushed, errors);
        if flushed > 0 {
            debug!(flushed, errors, "Flushed dirty cursors");
        }

        if errors > 0 {
            return Err(ReplicationError::Internal(format!("Failed to flush {} cursors", errors)));
        }
        Ok(flushed)
    }

    pub async fn has_dirty(&self) -> bool {
        !self.dirty.read().await.is_empty()
    }

    pub async fn dirty_count(&self) -> usize {
        self.dirty.read().await.len()
    }

    /// Database path (`:memory:` for in-memory stores).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        if self.path == IN_MEMORY {
            return Ok(());
        }
        let pool = &self.pool;
        execute_with_retry("cursor_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await
        })
        .await?;

        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Flush dirty cursors, checkpoint and close the pool.
    pub async fn close(&self) {
        if self.has_dirty().await {
            match self.flush_dirty().await {
                Ok(count) if count > 0 => info!(count, "Flushed dirty cursors on close"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to flush dirty cursors on close"),
            }
        }

        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!(path = %self.path, "Cursor store closed");
    }
}
