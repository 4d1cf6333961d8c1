// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed store.
//!
//! # Key layout
//!
//! ```text
//! transaction_stream        XADD by the POS and by replication
//! transaction:{id}          JSON record document (SET NX)
//! photo:{id}                photo bytes (SET NX)
//! fraud_alerts              alert stream
//! replication:log_ids       ids appended to this log by replication
//! replication:alert_ids     ids appended to the alert stream
//! ```
//!
//! Log and alert appends run as Lua scripts so the "already present?"
//! check and the XADD are one atomic step.

use super::{LogEntry, StoreFuture, TransactionStore, WriteOutcome};
use crate::alert::FraudAlert;
use crate::config::StoreConfig;
use crate::error::{ReplicationError, Result};
use crate::record::TransactionRecord;
use crate::resilience::{retry_with_backoff, RetryConfig};
use redis::aio::ConnectionManager;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, trace, warn};

/// KEYS: log_ids set, stream, record key. ARGV: record id, then field/value pairs.
const APPEND_LOG_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[3]) == 1 then
  return false
end
if redis.call('SADD', KEYS[1], ARGV[1]) == 0 then
  return false
end
return redis.call('XADD', KEYS[2], '*', unpack(ARGV, 2))
"#;

/// KEYS: alert_ids set, alert stream. ARGV: alert id, then field/value pairs.
const APPEND_ALERT_SCRIPT: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 0 then
  return false
end
return redis.call('XADD', KEYS[2], '*', unpack(ARGV, 2))
"#;

/// One store backed by a Redis instance.
///
/// `ConnectionManager` is Clone and multiplexed, so each call clones it.
pub struct RedisStore {
    config: StoreConfig,
    conn: ConnectionManager,
    append_log_script: Script,
    append_alert_script: Script,
}

impl RedisStore {
    /// Connect with retry. Each attempt is bounded by `retry.connection_timeout`.
    pub async fn connect(config: StoreConfig, retry: &RetryConfig) -> Result<Self> {
        info!(store_id = %config.store_id, url = %config.redis_url, "Connecting to store");

        let client = Client::open(config.redis_url.as_str()).map_err(|e| {
            ReplicationError::Config(format!("Invalid Redis URL for {}: {}", config.store_id, e))
        })?;
        let connection_timeout = retry.connection_timeout;

        let conn = retry_with_backoff(retry, "connect", || {
            let client = client.clone();
            async move {
                match timeout(connection_timeout, client.get_connection_manager()).await {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(e)) => Err(ReplicationError::redis("connect", e)),
                    Err(_) => Err(ReplicationError::redis_msg(
                        "connect",
                        format!("timed out after {}ms", connection_timeout.as_millis()),
                    )),
                }
            }
        })
        .await
        .map_err(|e| ReplicationError::StoreUnavailable {
            store_id: config.store_id.clone(),
            attempts: retry.max_attempts,
            message: e.to_string(),
        })?;

        info!(store_id = %config.store_id, "Connected to store");

        Ok(Self {
            config,
            conn,
            append_log_script: Script::new(APPEND_LOG_SCRIPT),
            append_alert_script: Script::new(APPEND_ALERT_SCRIPT),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn io_error(&self, operation: &str, e: redis::RedisError) -> ReplicationError {
        ReplicationError::store_io(&self.config.store_id, operation, e.to_string())
    }

    async fn set_nx(&self, operation: &str, key: String, value: &[u8]) -> Result<WriteOutcome> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.io_error(operation, e))?;
        Ok(match reply {
            Some(_) => WriteOutcome::Applied { bytes: value.len() },
            None => WriteOutcome::Duplicate,
        })
    }
}

impl TransactionStore for RedisStore {
    fn store_id(&self) -> &str {
        &self.config.store_id
    }

    fn read_log<'a>(
        &'a self,
        after: &'a str,
        count: usize,
        block: Duration,
    ) -> StoreFuture<'a, Vec<LogEntry>> {
        Box::pin(async move {
            let mut opts = StreamReadOptions::default().count(count.max(1));
            if !block.is_zero() {
                opts = opts.block(block.as_millis() as usize);
            }

            let mut conn = self.conn.clone();
            // XREAD BLOCK timeout COUNT batch STREAMS key after
            let reply: Option<StreamReadReply> = conn
                .xread_options(&[&self.config.stream_key], &[after], &opts)
                .await
                .map_err(|e| self.io_error("XREAD", e))?;

            let mut entries = Vec::new();
            for stream in reply.map(|r| r.keys).unwrap_or_default() {
                for id in stream.ids {
                    let fields = string_fields(&id.map);
                    let entry = LogEntry::from_fields(id.id, &fields);
                    trace!(store_id = %self.config.store_id, position = %entry.position, "Read log entry");
                    entries.push(entry);
                }
            }
            Ok(entries)
        })
    }

    fn append_log<'a>(&'a self, record: &'a TransactionRecord) -> StoreFuture<'a, WriteOutcome> {
        Box::pin(async move {
            let mut invocation = self.append_log_script.key(&self.config.log_ids_key);
            invocation
                .key(&self.config.stream_key)
                .key(self.config.record_key(&record.id))
                .arg(&record.id);
            for (name, value) in record.to_stream_fields() {
                invocation.arg(name).arg(value);
            }

            let mut conn = self.conn.clone();
            let position: Option<String> = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(|e| self.io_error("append_log", e))?;

            Ok(match position {
                Some(_) => WriteOutcome::Applied {
                    bytes: record.stream_payload_size(),
                },
                None => WriteOutcome::Duplicate,
            })
        })
    }

    fn put_record<'a>(&'a self, record: &'a TransactionRecord) -> StoreFuture<'a, WriteOutcome> {
        Box::pin(async move {
            let json = record.to_json()?;
            self.set_nx("put_record", self.config.record_key(&record.id), json.as_bytes())
                .await
        })
    }

    fn get_record<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<TransactionRecord>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn
                .get(self.config.record_key(record_id))
                .await
                .map_err(|e| self.io_error("get_record", e))?;
            raw.map(|json| TransactionRecord::from_json(&json)).transpose()
        })
    }

    fn get_photo<'a>(&'a self, record_id: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let blob: Option<Vec<u8>> = conn
                .get(self.config.photo_key(record_id))
                .await
                .map_err(|e| self.io_error("get_photo", e))?;
            Ok(blob)
        })
    }

    fn put_photo<'a>(&'a self, record_id: &'a str, blob: &'a [u8]) -> StoreFuture<'a, WriteOutcome> {
        Box::pin(async move { self.set_nx("put_photo", self.config.photo_key(record_id), blob).await })
    }

    fn append_alert<'a>(&'a self, alert: &'a FraudAlert) -> StoreFuture<'a, WriteOutcome> {
        Box::pin(async move {
            let fields = alert.to_stream_fields()?;
            let mut invocation = self.append_alert_script.key(&self.config.alert_ids_key);
            invocation.key(&self.config.alert_stream).arg(&alert.alert_id);
            for (name, value) in &fields {
                invocation.arg(*name).arg(value);
            }

            let mut conn = self.conn.clone();
            let position: Option<String> = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(|e| self.io_error("append_alert", e))?;

            Ok(match position {
                Some(_) => WriteOutcome::Applied {
                    bytes: fields.iter().map(|(k, v)| k.len() + v.len()).sum(),
                },
                None => WriteOutcome::Duplicate,
            })
        })
    }

    fn log_len(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let len: u64 = conn
                .xlen(&self.config.stream_key)
                .await
                .map_err(|e| self.io_error("XLEN", e))?;
            Ok(len)
        })
    }

    fn latest_position(&self) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let reply: StreamRangeReply = conn
                .xrevrange_count(&self.config.stream_key, "+", "-", 1)
                .await
                .map_err(|e| self.io_error("XREVRANGE", e))?;
            Ok(reply.ids.into_iter().next().map(|id| id.id))
        })
    }
}

/// Flatten stream entry values to strings. Non-string values are dropped
/// with a warning so the entry still decodes (or is reported malformed).
fn string_fields(map: &HashMap<String, redis::Value>) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(name, value)| match value_to_string(value) {
            Some(s) => Some((name.clone(), s)),
            None => {
                warn!(field = %name, "Unexpected value type in stream entry");
                None
            }
        })
        .collect()
}

fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}
