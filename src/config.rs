//! Configuration for store replication.
//!
//! Configuration can be constructed programmatically or deserialized from
//! JSON. Durations are humantime strings (`"1s"`, `"250ms"`, `"7days"`) and fall
//! back to their defaults when they cannot be parsed.
//!
//! # Quick Start
//!
//! ```rust
//! use store_replication::config::{ReplicationConfig, StoreConfig};
//!
//! let config = ReplicationConfig {
//!     store_a: StoreConfig::new("STORE_A", "redis://store-a:6379"),
//!     store_b: StoreConfig::new("STORE_B", "redis://store-b:6379"),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── store_a / store_b: StoreConfig   # Redis URL, stream and key names
//! ├── settings: ReplicationSettings
//! │   ├── reader: ReaderConfig         # Bounded blocking reads + retry
//! │   ├── replication: WriteConfig     # Write retries, origin lookups
//! │   ├── correlation: CorrelationConfig # TTL, windows, scoring policy
//! │   ├── alerts: AlertConfig          # Alert threshold, subscribers
//! │   └── status: StatusConfig         # Periodic status report
//! └── cursor: CursorConfig             # SQLite cursor persistence
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "store_a": { "store_id": "STORE_A", "redis_url": "redis://localhost:6379" },
//!   "store_b": { "store_id": "STORE_B", "redis_url": "redis://localhost:6380" },
//!   "settings": {
//!     "reader": { "block_timeout": "1s" },
//!     "correlation": { "window_ttl_secs": 300, "policy": { "no_photo_weight": 40 } }
//!   },
//!   "cursor": { "sqlite_path": "/var/lib/store-replication/cursors.db" }
//! }
//! ```

use crate::correlation::ScoringPolicy;
use crate::error::{ReplicationError, Result};
use crate::resilience::{RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationEngine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// First store. Records flowing A→B are counted as `a_to_b`.
    pub store_a: StoreConfig,

    /// Second store.
    pub store_b: StoreConfig,

    #[serde(default)]
    pub settings: ReplicationSettings,

    #[serde(default)]
    pub cursor: CursorConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            store_a: StoreConfig::new("STORE_A", "redis://localhost:6379"),
            store_b: StoreConfig::new("STORE_B", "redis://localhost:6380"),
            settings: ReplicationSettings::default(),
            cursor: CursorConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing (in-memory cursors, fast timeouts).
    pub fn for_testing() -> Self {
        let mut settings = ReplicationSettings::default();
        settings.reader.block_timeout = "50ms".to_string();
        settings.reader.backoff_initial = "5ms".to_string();
        settings.reader.backoff_max = "20ms".to_string();
        settings.replication.backoff_initial = "5ms".to_string();
        settings.replication.backoff_max = "20ms".to_string();
        settings.status.enabled = false;

        Self {
            settings,
            cursor: CursorConfig::in_memory(),
            ..Default::default()
        }
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| ReplicationError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.store_a.store_id.trim().is_empty() || self.store_b.store_id.trim().is_empty() {
            return Err(ReplicationError::Config("store_id must not be empty".into()));
        }
        if self.store_a.store_id == self.store_b.store_id {
            return Err(ReplicationError::Config(format!(
                "store ids must differ (both are {})",
                self.store_a.store_id
            )));
        }
        if self.settings.correlation.window_ttl_secs <= 0 {
            return Err(ReplicationError::Config("window_ttl_secs must be positive".into()));
        }
        if self.settings.correlation.max_entries_per_window == 0 {
            return Err(ReplicationError::Config(
                "max_entries_per_window must be at least 1".into(),
            ));
        }
        self.settings.correlation.policy.validate()?;
        if self.settings.reader.max_consecutive_failures == 0 {
            return Err(ReplicationError::Config(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig: one store's substrate
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection and key layout for one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store tag, must match the `store_id` the POS writes on its records.
    pub store_id: String,

    /// Redis connection URL.
    pub redis_url: String,

    /// Transaction log stream.
    #[serde(default = "default_stream_key")]
    pub stream_key: String,

    /// Prefix for record documents (`transaction:{id}`).
    #[serde(default = "default_record_prefix")]
    pub record_prefix: String,

    /// Prefix for photo blobs (`photo:{id}`).
    #[serde(default = "default_photo_prefix")]
    pub photo_prefix: String,

    /// Alert log stream.
    #[serde(default = "default_alert_stream")]
    pub alert_stream: String,

    /// Set of record ids already appended to this store's log by replication.
    #[serde(default = "default_log_ids_key")]
    pub log_ids_key: String,

    /// Set of alert ids already appended to the alert log.
    #[serde(default = "default_alert_ids_key")]
    pub alert_ids_key: String,
}

fn default_stream_key() -> String {
    "transaction_stream".to_string()
}

fn default_record_prefix() -> String {
    "transaction:".to_string()
}

fn default_photo_prefix() -> String {
    "photo:".to_string()
}

fn default_alert_stream() -> String {
    "fraud_alerts".to_string()
}

fn default_log_ids_key() -> String {
    "replication:log_ids".to_string()
}

fn default_alert_ids_key() -> String {
    "replication:alert_ids".to_string()
}

impl StoreConfig {
    /// A store with the default key layout.
    pub fn new(store_id: impl Into<String>, redis_url: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            redis_url: redis_url.into(),
            stream_key: default_stream_key(),
            record_prefix: default_record_prefix(),
            photo_prefix: default_photo_prefix(),
            alert_stream: default_alert_stream(),
            log_ids_key: default_log_ids_key(),
            alert_ids_key: default_alert_ids_key(),
        }
    }

    /// Same layout as [`StoreConfig::new`]; for tests against throwaway instances.
    pub fn for_testing(store_id: &str, redis_url: &str) -> Self {
        Self::new(store_id, redis_url)
    }

    pub fn record_key(&self, record_id: &str) -> String {
        format!("{}{}", self.record_prefix, record_id)
    }

    pub fn photo_key(&self, record_id: &str) -> String {
        format!("{}{}", self.photo_prefix, record_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunable behaviour of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplicationSettings {
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub replication: WriteConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReaderConfig: log tailing
// ═══════════════════════════════════════════════════════════════════════════════

/// Log reader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Bounded wait before returning "no data".
    #[serde(default = "default_block_timeout")]
    pub block_timeout: String,

    /// Entries fetched per read. Records are still handed out one at a time.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Consecutive failed reads before the store is declared unavailable.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,

    #[serde(default = "default_reader_backoff_initial")]
    pub backoff_initial: String,

    #[serde(default = "default_reader_backoff_max")]
    pub backoff_max: String,

    /// Rate limit record processing (shared by both directions).
    #[serde(default)]
    pub rate_limit_enabled: bool,

    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_block_timeout() -> String {
    "1s".to_string()
}

fn default_batch_size() -> usize {
    16
}

fn default_max_consecutive_failures() -> usize {
    5
}

fn default_reader_backoff_initial() -> String {
    "200ms".to_string()
}

fn default_reader_backoff_max() -> String {
    "5s".to_string()
}

fn default_rate_limit_per_sec() -> u32 {
    1000
}

fn default_rate_limit_burst() -> u32 {
    100
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            block_timeout: default_block_timeout(),
            batch_size: default_batch_size(),
            max_consecutive_failures: default_max_consecutive_failures(),
            backoff_initial: default_reader_backoff_initial(),
            backoff_max: default_reader_backoff_max(),
            rate_limit_enabled: false,
            rate_limit_per_sec: default_rate_limit_per_sec(),
            rate_limit_burst: default_rate_limit_burst(),
        }
    }
}

impl ReaderConfig {
    /// Parse the block_timeout string to a Duration.
    pub fn block_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.block_timeout, Duration::from_secs(1))
    }

    /// Retry policy for log reads.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_consecutive_failures.max(1),
            initial_delay: parse_duration_or(&self.backoff_initial, Duration::from_millis(200)),
            max_delay: parse_duration_or(&self.backoff_max, Duration::from_secs(5)),
            ..RetryConfig::reader()
        }
    }

    /// Returns `None` if rate limiting is disabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        self.rate_limit_enabled.then(|| RateLimitConfig {
            burst_size: self.rate_limit_burst,
            refill_rate: self.rate_limit_per_sec,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WriteConfig: replication writes
// ═══════════════════════════════════════════════════════════════════════════════

/// Replication write settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Attempts per replicated unit before it is dropped.
    #[serde(default = "default_write_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_write_backoff_initial")]
    pub backoff_initial: String,

    #[serde(default = "default_write_backoff_max")]
    pub backoff_max: String,

    /// Budget for looking up an unseen original transaction in either store.
    #[serde(default = "default_origin_lookup_timeout")]
    pub origin_lookup_timeout: String,
}

fn default_write_attempts() -> usize {
    3
}

fn default_write_backoff_initial() -> String {
    "50ms".to_string()
}

fn default_write_backoff_max() -> String {
    "500ms".to_string()
}

fn default_origin_lookup_timeout() -> String {
    "250ms".to_string()
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_write_attempts(),
            backoff_initial: default_write_backoff_initial(),
            backoff_max: default_write_backoff_max(),
            origin_lookup_timeout: default_origin_lookup_timeout(),
        }
    }
}

impl WriteConfig {
    /// Retry policy for replication writes.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: parse_duration_or(&self.backoff_initial, Duration::from_millis(50)),
            max_delay: parse_duration_or(&self.backoff_max, Duration::from_millis(500)),
            ..RetryConfig::writes()
        }
    }

    pub fn origin_lookup_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.origin_lookup_timeout, Duration::from_millis(250))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CorrelationConfig: fraud windows and scoring
// ═══════════════════════════════════════════════════════════════════════════════

/// Correlation window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Returns further apart than this (seconds) never correlate.
    #[serde(default = "default_window_ttl_secs")]
    pub window_ttl_secs: i64,

    /// Capacity of one window; the oldest entry is dropped when full.
    #[serde(default = "default_max_entries_per_window")]
    pub max_entries_per_window: usize,

    /// Drop a prior return from its window once it produced a HIGH/CRITICAL match.
    #[serde(default = "default_true")]
    pub evict_on_match: bool,

    /// How long observed purchases are remembered for origin resolution.
    #[serde(default = "default_purchase_retention")]
    pub purchase_retention: String,

    /// Period of the wall-clock sweep over windows and purchases.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,

    #[serde(default)]
    pub policy: ScoringPolicy,
}

fn default_window_ttl_secs() -> i64 {
    300
}

fn default_max_entries_per_window() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_purchase_retention() -> String {
    "7days".to_string()
}

fn default_sweep_interval() -> String {
    "30s".to_string()
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_ttl_secs: default_window_ttl_secs(),
            max_entries_per_window: default_max_entries_per_window(),
            evict_on_match: true,
            purchase_retention: default_purchase_retention(),
            sweep_interval: default_sweep_interval(),
            policy: ScoringPolicy::default(),
        }
    }
}

impl CorrelationConfig {
    pub fn purchase_retention_secs(&self) -> i64 {
        parse_duration_or(&self.purchase_retention, Duration::from_secs(7 * 24 * 3600)).as_secs() as i64
    }

    pub fn sweep_interval_duration(&self) -> Duration {
        parse_duration_or(&self.sweep_interval, Duration::from_secs(30))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AlertConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Alert emission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Minimum score for a finding to become an alert (MEDIUM and up by default).
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u8,

    /// Append alerts to both stores' alert logs. When false only the store
    /// where the fraudulent return happened receives the alert.
    #[serde(default = "default_true")]
    pub publish_to_both_stores: bool,

    /// Buffer of the alert/event broadcast channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_alert_threshold() -> u8 {
    40
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alert_threshold: default_alert_threshold(),
            publish_to_both_stores: true,
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StatusConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Periodic status report (metrics snapshot + log lengths).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_status_interval")]
    pub interval: String,
}

fn default_status_interval() -> String {
    "5s".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_status_interval(),
        }
    }
}

impl StatusConfig {
    pub fn interval_duration(&self) -> Duration {
        parse_duration_or(&self.interval, Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CursorConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Cursor persistence configuration.
///
/// Cursors track the last processed position in each direction's source log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Path to SQLite database for cursor storage (`:memory:` for tests).
    pub sqlite_path: String,

    /// Period of the debounced cursor flush.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,
}

fn default_flush_interval() -> String {
    "5s".to_string()
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "replication_cursors.db".to_string(),
            flush_interval: default_flush_interval(),
        }
    }
}

impl CursorConfig {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            flush_interval: default_flush_interval(),
        }
    }

    pub fn flush_interval_duration(&self) -> Duration {
        parse_duration_or(&self.flush_interval, Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
