// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for store replication.
//!
//! Errors are categorized by where they came from (store substrate, SQLite,
//! configuration) and whether retrying can help.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Redis` | Yes | Network errors, timeouts, connection failures |
//! | `StoreIo` | Yes | Store momentarily unreachable (any substrate) |
//! | `StoreUnavailable` | No | Retries exhausted, the direction halts |
//! | `CursorStore` | No | Local SQLite errors (needs operator attention) |
//! | `Config` | No | Configuration invalid |
//! | `StreamParse` | No | Malformed log entry |
//! | `Serialization` | No | Record or alert could not be (de)serialized |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Engine is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! Two conditions are deliberately absent: a duplicate write is reported as
//! [`WriteOutcome::Duplicate`](crate::store::WriteOutcome::Duplicate), and an
//! unresolvable original transaction is a fraud indicator, not a failure.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during replication and correlation.
///
/// Use [`is_retryable()`](Self::is_retryable) to check if the operation
/// should be retried with backoff.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Redis connection or command error.
    ///
    /// Typically retryable (network timeouts, connection drops).
    #[error("Redis error ({operation}): {message}")]
    Redis {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// A store's log or key/value namespace is momentarily unreachable.
    #[error("Store I/O error ({store_id}, {operation}): {message}")]
    StoreIo {
        store_id: String,
        operation: String,
        message: String,
    },

    /// Retries against a store were exhausted.
    ///
    /// Surfaced to the operator. Only the direction that hit it halts.
    #[error("Store {store_id} unavailable after {attempts} attempts: {message}")]
    StoreUnavailable {
        store_id: String,
        attempts: usize,
        message: String,
    },

    /// SQLite error during cursor persistence.
    #[error("Cursor store error: {0}")]
    CursorStore(#[from] sqlx::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Log entry has an unexpected shape.
    #[error("Stream parse error: {0}")]
    StreamParse(String),

    /// JSON encoding/decoding of a record or alert failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a Redis error from a redis::RedisError
    pub fn redis(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a Redis error without source
    pub fn redis_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient store I/O error.
    pub fn store_io(
        store_id: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StoreIo {
            store_id: store_id.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Redis { .. } => true,
            Self::StoreIo { .. } => true,
            Self::StoreUnavailable { .. } => false,
            Self::CursorStore(_) => false,
            Self::Config(_) => false,
            Self::StreamParse(_) => false,
            Self::Serialization(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label used for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Redis { .. } => "redis",
            Self::StoreIo { .. } => "store_io",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::CursorStore(_) => "cursor_store",
            Self::Config(_) => "config",
            Self::StreamParse(_) => "stream_parse",
            Self::Serialization(_) => "serialization",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<redis::RedisError> for ReplicationError {
    fn from(e: redis::RedisError) -> Self {
        Self::redis("unknown", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_redis() {
        let err = ReplicationError::redis_msg("XREAD", "connection reset");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("XREAD"));
    }

    #[test]
    fn test_is_retryable_store_io() {
        let err = ReplicationError::store_io("STORE_B", "append_log", "connection refused");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("STORE_B"));
        assert!(err.to_string().contains("append_log"));
    }

    #[test]
    fn test_not_retryable_store_unavailable() {
        let err = ReplicationError::StoreUnavailable {
            store_id: "STORE_A".to_string(),
            attempts: 5,
            message: "connection refused".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("after 5 attempts"));
        assert_eq!(err.kind(), "store_unavailable");
    }

    #[test]
    fn test_not_retryable_config() {
        let err = ReplicationError::Config("store ids must differ".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_stream_parse() {
        let err = ReplicationError::StreamParse("missing transaction_id".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_serialization_from_serde() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: ReplicationError = json_err.into();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "serialization");
    }

    #[test]
    fn test_not_retryable_invalid_state() {
        let err = ReplicationError::InvalidState {
            expected: "Running".to_string(),
            actual: "Stopped".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Running"));
        assert!(err.to_string().contains("Stopped"));
    }

    #[test]
    fn test_not_retryable_shutdown() {
        assert!(!ReplicationError::Shutdown.is_retryable());
    }

    #[test]
    fn test_redis_error_formatting() {
        let err = ReplicationError::Redis {
            operation: "XADD".to_string(),
            message: "timeout".to_string(),
            source: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("Redis error"));
        assert!(msg.contains("XADD"));
        assert!(msg.contains("timeout"));
    }
}
