//! # Store Replication
//!
//! Active-active replication between two store transaction logs, with
//! cross-store return-fraud correlation.
//!
//! ## Architecture
//!
//! Each store is an append-only transaction log plus a key/value namespace
//! (Redis Streams + keys in production). One worker per direction copies new
//! records into the other store and feeds returns into a shared correlation
//! engine:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                         store-replication                                 │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────────────┐   │
//! │  │ LogReader   │───►│ Replicator   │───►│ CorrelationStore            │   │
//! │  │ (per dir.)  │    │ STREAM/RECORD│    │ (DashMap windows, scoring)  │   │
//! │  └─────────────┘    │ /PHOTO units │    └──────────────┬──────────────┘   │
//! │         │           └──────┬───────┘                   ▼                  │
//! │         ▼                  ▼                    ┌──────────────┐          │
//! │  ┌─────────────┐    ┌──────────────────┐        │ AlertEmitter │          │
//! │  │ CursorStore │    │ MetricsAggregator│◄───────│ (alert logs) │          │
//! │  │ (SQLite)    │    │ (atomics)        │        └──────────────┘          │
//! │  └─────────────┘    └──────────────────┘                                  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Idempotent writes**: replaying a record any number of times leaves one
//!   copy per unit and counts one event per unit.
//! - **At-least-once reads**: cursors only advance after a record is fully
//!   processed.
//! - **Direction isolation**: a store outage halts only the direction that
//!   reads from it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use store_replication::{ReplicationConfig, ReplicationEngine};
//!
//! #[tokio::main]
//! async fn main() -> store_replication::Result<()> {
//!     let config = ReplicationConfig::default();
//!     let mut engine = ReplicationEngine::connect(config).await?;
//!     engine.start().await?;
//!
//!     let mut alerts = engine.subscribe_alerts();
//!     while let Ok(alert) = alerts.recv().await {
//!         println!("{} {} {}", alert.alert_id, alert.risk_level, alert.score);
//!     }
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod alert;
pub mod config;
pub mod coordinator;
pub mod correlation;
pub mod cursor;
pub mod error;
pub mod log_reader;
pub mod metrics;
pub mod record;
pub mod replicator;
pub mod resilience;
pub mod store;

// Re-exports for convenience
pub use aggregator::{MetricsAggregator, MetricsSnapshot};
pub use alert::{AlertEmitter, FraudAlert};
pub use config::{ReplicationConfig, ReplicationSettings, StoreConfig};
pub use coordinator::{EngineState, HealthCheck, ReplicationEngine};
pub use correlation::{Correlation, CorrelationStore, Decision, Indicator, RiskLevel, ScoringPolicy};
pub use cursor::CursorStore;
pub use error::{ReplicationError, Result};
pub use record::{ReplicationEvent, TransactionKind, TransactionRecord, UnitKind};
pub use replicator::{Direction, ReplicationReport, Replicator};
pub use store::{MemoryStore, RedisStore, TransactionStore, WriteOutcome};
