// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Direction worker: reads one store's log and replicates into the other.
//!
//! For every log entry, in order:
//! 1. Skip echoes (records that originated in the target store)
//! 2. Replicate STREAM, RECORD and PHOTO units
//! 3. Correlate RETURNs (and malformed entries) and emit alerts
//! 4. Commit the position and update the cursor
//!
//! # Graceful Shutdown
//!
//! Shutdown and halt signals are only observed between entries, so the
//! record in flight is always finished and its cursor persisted.
//!
//! # Failures
//!
//! A source log that stays unreachable past the reader's retries halts this
//! worker only. The sibling direction and the shared correlation state are
//! unaffected.

use super::types::{DirectionHealth, WorkerStatus};
use crate::aggregator::MetricsAggregator;
use crate::alert::AlertEmitter;
use crate::config::ReplicationSettings;
use crate::correlation::{resolve_origin, Correlation, CorrelationStore};
use crate::cursor::CursorStore;
use crate::error::ReplicationError;
use crate::log_reader::{LogReader, ReadOutcome};
use crate::metrics;
use crate::record::{ReplicationEvent, TransactionRecord};
use crate::replicator::{Direction, Replicator};
use crate::resilience::RateLimiter;
use crate::store::{EntryBody, LogEntry, TransactionStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

#[derive(Debug)]
struct Tracked {
    status: WorkerStatus,
    last_error: Option<String>,
    cursor: String,
    lag_ms: Option<u64>,
}

/// Shared, lock-light view of one direction for health checks.
#[derive(Debug)]
pub struct DirectionState {
    direction: Direction,
    processed: AtomicU64,
    tracked: Mutex<Tracked>,
    stop_tx: watch::Sender<bool>,
}

impl DirectionState {
    pub fn new(direction: Direction) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            direction,
            processed: AtomicU64::new(0),
            tracked: Mutex::new(Tracked {
                status: WorkerStatus::Idle,
                last_error: None,
                cursor: crate::store::LOG_START.to_string(),
                lag_ms: None,
            }),
            stop_tx,
        }
    }

    pub fn direction(&self) -> &Direction {
        &self.direction
    }

    fn tracked(&self) -> std::sync::MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> WorkerStatus {
        self.tracked().status
    }

    pub fn cursor(&self) -> String {
        self.tracked().cursor.clone()
    }

    pub fn records_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub(super) fn set_status(&self, status: WorkerStatus) {
        self.tracked().status = status;
        metrics::set_direction_running(&self.direction.name(), status == WorkerStatus::Running);
    }

    fn set_error(&self, error: &ReplicationError) {
        self.tracked().last_error = Some(error.to_string());
    }

    fn advance(&self, position: &str) {
        self.tracked().cursor = position.to_string();
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn set_cursor(&self, position: &str) {
        self.tracked().cursor = position.to_string();
    }

    pub(super) fn set_lag(&self, lag_ms: Option<u64>) {
        self.tracked().lag_ms = lag_ms;
    }

    /// Ask the worker to stop after its current record.
    pub fn request_halt(&self) {
        self.stop_tx.send_replace(true);
    }

    pub(super) fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn health(&self) -> DirectionHealth {
        let tracked = self.tracked();
        DirectionHealth {
            direction: self.direction.name(),
            status: tracked.status,
            last_error: tracked.last_error.clone(),
            records_processed: self.records_processed(),
            cursor: tracked.cursor.clone(),
            lag_ms: tracked.lag_ms,
        }
    }
}

/// Everything a worker shares with the engine.
pub(super) struct WorkerContext<S: TransactionStore> {
    pub source: Arc<S>,
    pub target: Arc<S>,
    pub state: Arc<DirectionState>,
    pub correlation: Arc<CorrelationStore>,
    pub alerts: Arc<AlertEmitter<S>>,
    pub aggregator: Arc<MetricsAggregator>,
    pub cursor_store: Arc<CursorStore>,
    pub events_tx: broadcast::Sender<ReplicationEvent>,
    pub settings: ReplicationSettings,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

/// Run one direction until shutdown, a halt request, or a fatal read error.
pub(super) async fn run_direction<S: TransactionStore>(
    ctx: WorkerContext<S>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let name = ctx.state.direction().name();
    let span = info_span!("replication", direction = %name);
    run(ctx, shutdown_rx).instrument(span).await
}

async fn run<S: TransactionStore>(ctx: WorkerContext<S>, mut shutdown_rx: watch::Receiver<bool>) {
    let name = ctx.state.direction().name();
    let mut stop_rx = ctx.state.stop_receiver();

    let start = ctx.cursor_store.get_or_start(&name).await;
    info!(cursor = %start, "Starting direction worker");
    ctx.state.set_cursor(&start);

    let mut reader = LogReader::new(Arc::clone(&ctx.source), name.clone(), start, &ctx.settings.reader);
    let replicator = Replicator::new(
        Arc::clone(&ctx.source),
        Arc::clone(&ctx.target),
        ctx.settings.replication.retry_config(),
    );
    let lookup_stores = vec![Arc::clone(&ctx.source), Arc::clone(&ctx.target)];
    ctx.state.set_status(WorkerStatus::Running);

    let final_status = loop {
        if *shutdown_rx.borrow() {
            break WorkerStatus::Stopped;
        }
        if *stop_rx.borrow() {
            info!("Halt requested");
            break WorkerStatus::Halted;
        }

        let outcome = tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break WorkerStatus::Stopped;
                }
                continue;
            }
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break WorkerStatus::Halted;
                }
                continue;
            }
            result = reader.read_next() => result,
        };

        let entry = match outcome {
            Ok(ReadOutcome::Entry(entry)) => entry,
            Ok(ReadOutcome::NoData) => {
                trace!("No new log entries");
                continue;
            }
            Err(e) => {
                error!(error = %e, "Source log unavailable, halting direction");
                metrics::record_error(&name, e.kind());
                ctx.aggregator.record_error();
                ctx.state.set_error(&e);
                break WorkerStatus::Halted;
            }
        };

        if let Some(ref limiter) = ctx.rate_limiter {
            limiter.acquire().await;
        }

        process_entry(&ctx, &replicator, &lookup_stores, &entry).await;

        reader.commit(&entry.position);
        ctx.cursor_store.set(&name, &entry.position).await;
        ctx.state.advance(&entry.position);
    };

    ctx.state.set_status(final_status);
    info!(
        status = %final_status,
        cursor = %reader.committed_position(),
        processed = ctx.state.records_processed(),
        "Direction worker stopped"
    );
}

async fn process_entry<S: TransactionStore>(
    ctx: &WorkerContext<S>,
    replicator: &Replicator<S>,
    lookup_stores: &[Arc<S>],
    entry: &LogEntry,
) {
    let direction = replicator.direction();
    match &entry.body {
        EntryBody::Record(record) => {
            if direction.is_echo(record) {
                trace!(record_id = %record.id, "Skipping echo");
                metrics::record_echo_skipped(&direction.name());
                return;
            }

            let report = replicator.replicate(record).await;
            for event in report.events {
                ctx.aggregator.record_replication(&event);
                // No subscribers is fine
                let _ = ctx.events_tx.send(event);
            }
            for _ in &report.duplicates {
                ctx.aggregator.record_duplicate();
            }
            for (kind, _) in &report.dropped {
                metrics::record_error(&direction.name(), kind.as_str());
                ctx.aggregator.record_error();
            }

            if record.is_return() {
                correlate_return(ctx, lookup_stores, record).await;
            } else {
                ctx.correlation.observe_purchase(record);
            }
        }
        EntryBody::Malformed { record_id, reason } => {
            warn!(
                position = %entry.position,
                record_id = ?record_id,
                reason = %reason,
                "Malformed log entry"
            );
            metrics::record_error(&direction.name(), "stream_parse");
            let correlation =
                ctx.correlation
                    .ingest_malformed(&direction.source, record_id.as_deref(), &entry.position);
            publish(ctx, &correlation).await;
        }
    }
}

async fn correlate_return<S: TransactionStore>(
    ctx: &WorkerContext<S>,
    lookup_stores: &[Arc<S>],
    record: &TransactionRecord,
) {
    let budget = ctx.settings.replication.origin_lookup_timeout_duration();
    let origin = resolve_origin(&ctx.correlation, lookup_stores, record, budget).await;
    if let Some(correlation) = ctx.correlation.ingest(record, &origin) {
        publish(ctx, &correlation).await;
    }
}

async fn publish<S: TransactionStore>(ctx: &WorkerContext<S>, correlation: &Correlation) {
    let alerts = ctx.alerts.emit_correlation(correlation).await;
    ctx.aggregator.record_alerts(alerts.len());

    if correlation.replayed {
        debug!(record_id = %correlation.subject.record_id, "Correlation replayed, not recounted");
        return;
    }
    metrics::record_correlation(correlation.risk_level.as_str(), correlation.score);
    ctx.aggregator
        .record_correlation(correlation, ctx.alerts.threshold());
}
