// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! Ties together:
//! - Two direction workers (A→B and B→A), see [`worker`]
//! - The shared [`CorrelationStore`], [`AlertEmitter`] and [`MetricsAggregator`]
//! - Cursor persistence via [`CursorStore`]
//! - Background tasks: cursor flush, window sweeper, status reporter
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────── worker A→B ────────────┐
//! log(A) ───►│ read → replicate → correlate/alert │───► store B
//!            └────────────────┬───────────────────┘
//!                             ▼
//!            shared: CorrelationStore, AlertEmitter, MetricsAggregator
//!                             ▲
//!            ┌────────────────┴───────────────────┐
//! log(B) ───►│ read → replicate → correlate/alert │───► store A
//!            └──────────── worker B→A ────────────┘
//! ```
//!
//! Workers never share a lock across an await point. A worker that halts
//! leaves the other one running.

mod types;
mod worker;

pub use types::{DirectionHealth, EngineState, HealthCheck, WorkerStatus};
pub use worker::DirectionState;

use crate::aggregator::{MetricsAggregator, MetricsSnapshot};
use crate::alert::{AlertEmitter, FraudAlert};
use crate::config::ReplicationConfig;
use crate::correlation::CorrelationStore;
use crate::cursor::CursorStore;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::record::ReplicationEvent;
use crate::replicator::Direction;
use crate::resilience::{RateLimiter, RetryConfig};
use crate::store::{calculate_lag_ms, RedisStore, TransactionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long shutdown waits for each task.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The replication engine.
///
/// Generic over the store substrate so tests can run the full pipeline
/// against [`MemoryStore`](crate::store::MemoryStore).
pub struct ReplicationEngine<S: TransactionStore = RedisStore> {
    config: ReplicationConfig,

    store_a: Arc<S>,
    store_b: Arc<S>,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    correlation: Arc<CorrelationStore>,
    alerts: Arc<AlertEmitter<S>>,
    aggregator: Arc<MetricsAggregator>,
    events_tx: broadcast::Sender<ReplicationEvent>,

    /// `[A→B, B→A]`
    directions: [Arc<DirectionState>; 2],

    /// Opened by `start()`
    cursor_store: Option<Arc<CursorStore>>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    worker_handles: Vec<JoinHandle<()>>,
    task_handles: Vec<JoinHandle<()>>,
}

impl ReplicationEngine<RedisStore> {
    /// Connect to both Redis stores described by `config`.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to begin replication.
    pub async fn connect(config: ReplicationConfig) -> Result<Self> {
        config.validate()?;
        let retry = RetryConfig::startup();
        let store_a = RedisStore::connect(config.store_a.clone(), &retry).await?;
        let store_b = RedisStore::connect(config.store_b.clone(), &retry).await?;
        Ok(Self::with_stores(config, Arc::new(store_a), Arc::new(store_b)))
    }
}

impl<S: TransactionStore> ReplicationEngine<S> {
    /// Create an engine over two already-connected stores.
    pub fn with_stores(config: ReplicationConfig, store_a: Arc<S>, store_b: Arc<S>) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = &config.settings;

        let correlation = Arc::new(CorrelationStore::new(settings.correlation.clone()));
        let alerts = Arc::new(AlertEmitter::new(
            vec![Arc::clone(&store_a), Arc::clone(&store_b)],
            settings.alerts.clone(),
            settings.correlation.policy.clone(),
            settings.replication.retry_config(),
        ));
        let aggregator = Arc::new(MetricsAggregator::new(store_a.store_id(), store_b.store_id()));
        let (events_tx, _) = broadcast::channel(settings.alerts.channel_capacity.max(1));

        let directions = [
            Arc::new(DirectionState::new(Direction::new(store_a.store_id(), store_b.store_id()))),
            Arc::new(DirectionState::new(Direction::new(store_b.store_id(), store_a.store_id()))),
        ];

        Self {
            config,
            store_a,
            store_b,
            state_tx,
            state_rx,
            correlation,
            alerts,
            aggregator,
            events_tx,
            directions,
            cursor_store: None,
            shutdown_tx,
            shutdown_rx,
            worker_handles: Vec::new(),
            task_handles: Vec::new(),
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    pub fn store_a(&self) -> &Arc<S> {
        &self.store_a
    }

    pub fn store_b(&self) -> &Arc<S> {
        &self.store_b
    }

    /// Shared correlation state (read-only use: window sizes, purchases).
    pub fn correlation(&self) -> &Arc<CorrelationStore> {
        &self.correlation
    }

    /// Every replication event, as units are applied.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.events_tx.subscribe()
    }

    /// Every newly published fraud alert.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<FraudAlert> {
        self.alerts.subscribe()
    }

    /// Non-blocking copy of the running statistics.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.aggregator.snapshot()
    }

    /// Engine state plus per-direction status. Performs no I/O; lag is the
    /// value last computed by the status reporter.
    pub fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let directions: Vec<DirectionHealth> = self.directions.iter().map(|d| d.health()).collect();
        let running = directions
            .iter()
            .filter(|d| d.status == WorkerStatus::Running)
            .count();

        HealthCheck {
            state,
            ready: state == EngineState::Running && running > 0,
            healthy: state == EngineState::Running && running == directions.len(),
            directions,
        }
    }

    /// Stop one direction after its current record. The other keeps going.
    ///
    /// Returns `false` if no direction has that name (`"STORE_A->STORE_B"`).
    pub fn halt_direction(&self, name: &str) -> bool {
        match self.directions.iter().find(|d| d.direction().name() == name) {
            Some(state) => {
                info!(direction = %name, "Halting direction");
                state.request_halt();
                true
            }
            None => false,
        }
    }

    /// Start the replication engine.
    ///
    /// 1. Opens the cursor store (SQLite)
    /// 2. Spawns one worker per direction
    /// 3. Spawns cursor flush, window sweeper and status reporter tasks
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ReplicationError::InvalidState {
                expected: "Created".to_string(),
                actual: format!("{:?}", self.state()),
            });
        }
        self.config.validate()?;

        info!(
            store_a = %self.store_a.store_id(),
            store_b = %self.store_b.store_id(),
            "Starting replication engine"
        );
        self.set_state(EngineState::Connecting);

        let cursor_store = match CursorStore::open(&self.config.cursor).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                self.set_state(EngineState::Failed);
                return Err(e);
            }
        };
        info!(path = %cursor_store.path(), "Cursor store initialized");
        self.cursor_store = Some(Arc::clone(&cursor_store));

        self.spawn_workers(&cursor_store);
        self.spawn_cursor_flush_task(&cursor_store);
        self.spawn_window_sweeper();
        if self.config.settings.status.enabled {
            self.spawn_status_reporter();
        }

        self.set_state(EngineState::Running);
        info!("Replication engine running");
        Ok(())
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    fn spawn_workers(&mut self, cursor_store: &Arc<CursorStore>) {
        // Shared by both directions
        let rate_limiter: Option<Arc<RateLimiter>> = self
            .config
            .settings
            .reader
            .rate_limit_config()
            .map(|cfg| {
                info!(
                    rate_per_sec = cfg.refill_rate,
                    burst = cfg.burst_size,
                    "Rate limiting enabled"
                );
                Arc::new(RateLimiter::new(cfg))
            });

        let pairs = [
            (Arc::clone(&self.store_a), Arc::clone(&self.store_b)),
            (Arc::clone(&self.store_b), Arc::clone(&self.store_a)),
        ];
        for (state, (source, target)) in self.directions.iter().zip(pairs) {
            let ctx = worker::WorkerContext {
                source,
                target,
                state: Arc::clone(state),
                correlation: Arc::clone(&self.correlation),
                alerts: Arc::clone(&self.alerts),
                aggregator: Arc::clone(&self.aggregator),
                cursor_store: Arc::clone(cursor_store),
                events_tx: self.events_tx.clone(),
                settings: self.config.settings.clone(),
                rate_limiter: rate_limiter.clone(),
            };
            let shutdown_rx = self.shutdown_rx.clone();
            let handle = tokio::spawn(worker::run_direction(ctx, shutdown_rx));

            info!(direction = %state.direction(), "Spawned direction worker");
            self.worker_handles.push(handle);
        }
    }

    /// Periodically flushes dirty cursors to SQLite.
    fn spawn_cursor_flush_task(&mut self, cursor_store: &Arc<CursorStore>) {
        let cursor_store = Arc::clone(cursor_store);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let flush_interval = self.config.cursor.flush_interval_duration();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(flush_interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = cursor_store.flush_dirty().await {
                            warn!(error = %e, "Failed to flush cursors");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Cursor flush task stopping");
                        break;
                    }
                }
            }
        });

        debug!("Spawned cursor flush task");
        self.task_handles.push(handle);
    }

    /// Periodically drops expired correlation windows and purchases.
    fn spawn_window_sweeper(&mut self) {
        let correlation = Arc::clone(&self.correlation);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let sweep_interval = self.config.settings.correlation.sweep_interval_duration();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let evicted = correlation.evict_expired(chrono::Utc::now().timestamp());
                        if evicted > 0 {
                            debug!(evicted, "Swept expired window entries");
                        }
                        metrics::record_window_sweep(evicted);
                        metrics::set_correlation_state(
                            correlation.open_windows(),
                            correlation.tracked_purchases(),
                        );
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Window sweeper stopping");
                        break;
                    }
                }
            }
        });

        debug!("Spawned window sweeper");
        self.task_handles.push(handle);
    }

    /// Periodically logs the metrics snapshot, log lengths and lag.
    fn spawn_status_reporter(&mut self) {
        let stores = [Arc::clone(&self.store_a), Arc::clone(&self.store_b)];
        let directions = self.directions.clone();
        let aggregator = Arc::clone(&self.aggregator);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let report_interval = self.config.settings.status.interval_duration();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(report_interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        report_status(&stores, &directions, &aggregator).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Status reporter stopping");
                        break;
                    }
                }
            }
        });

        info!(interval = ?report_interval, "Spawned status reporter");
        self.task_handles.push(handle);
    }

    /// Shutdown the replication engine gracefully.
    ///
    /// 1. Signal workers and tasks to stop
    /// 2. Wait for workers to finish their current record
    /// 3. Flush and close the cursor store
    /// 4. Log the final metrics snapshot
    pub async fn shutdown(&mut self) {
        info!("Shutting down replication engine");
        self.set_state(EngineState::ShuttingDown);
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = self
            .worker_handles
            .drain(..)
            .chain(self.task_handles.drain(..))
            .collect();
        if !handles.is_empty() {
            info!(task_count = handles.len(), "Waiting for tasks to complete");
        }
        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(task = i + 1, "Task completed gracefully"),
                Ok(Err(e)) => warn!(task = i + 1, error = %e, "Task panicked during shutdown"),
                Err(_) => warn!(task = i + 1, "Task timed out during shutdown"),
            }
        }

        if let Some(cursor_store) = self.cursor_store.take() {
            match cursor_store.flush_dirty().await {
                Ok(flushed) => debug!(flushed, "Final cursor flush"),
                Err(e) => warn!(error = %e, "Final cursor flush failed"),
            }
            cursor_store.close().await;
        }

        let snapshot = self.aggregator.snapshot();
        info!(
            total_replications = snapshot.total_replications,
            a_to_b = snapshot.a_to_b_count,
            b_to_a = snapshot.b_to_a_count,
            avg_latency_ms = snapshot.avg_latency_ms,
            errors = snapshot.errors,
            fraud_detected = snapshot.fraud_detected,
            fraud_prevented = snapshot.fraud_prevented,
            value_protected = snapshot.value_protected,
            alerts = snapshot.alerts_emitted,
            "Final metrics snapshot"
        );

        self.set_state(EngineState::Stopped);
        info!("Replication engine stopped");
    }
}

async fn report_status<S: TransactionStore>(
    stores: &[Arc<S>; 2],
    directions: &[Arc<DirectionState>; 2],
    aggregator: &MetricsAggregator,
) {
    let lengths = futures::future::join_all(stores.iter().map(|s| s.log_len())).await;
    for (store, len) in stores.iter().zip(lengths) {
        match len {
            Ok(len) => metrics::set_log_length(store.store_id(), len),
            Err(e) => debug!(store_id = %store.store_id(), error = %e, "Log length unavailable"),
        }
    }

    // Source of A→B is store A, of B→A store B
    for (state, source) in directions.iter().zip(stores.iter()) {
        let lag = match source.latest_position().await {
            Ok(Some(latest)) => calculate_lag_ms(&state.cursor(), &latest),
            Ok(None) => Some(0),
            Err(_) => None,
        };
        if let Some(lag_ms) = lag {
            metrics::record_replication_lag_ms(&state.direction().name(), lag_ms);
        }
        state.set_lag(lag);
    }

    let snapshot = aggregator.snapshot();
    info!(
        total_replications = snapshot.total_replications,
        a_to_b = snapshot.a_to_b_count,
        b_to_a = snapshot.b_to_a_count,
        avg_latency_ms = snapshot.avg_latency_ms,
        data_volume_bytes = snapshot.data_volume_bytes,
        errors = snapshot.errors,
        duplicates = snapshot.duplicates_skipped,
        fraud_detected = snapshot.fraud_detected,
        fraud_prevented = snapshot.fraud_prevented,
        "Replication status"
    );
}
