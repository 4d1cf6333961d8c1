// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine and worker state types.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Connecting
//!    │                              │
//!    │ (shutdown before start)      │ (cursors loaded)
//!    ↓                              ↓
//! Stopped ←── ShuttingDown ←──── Running
//!
//! Connecting ──(cursor store fails)──→ Failed
//! ```
//!
//! - **Created**: constructed, nothing spawned.
//! - **Connecting**: `start()` called, opening the cursor store.
//! - **Running**: both direction workers and background tasks spawned.
//!   A single halted direction does not change this state.
//! - **ShuttingDown**: workers finishing their current record.
//! - **Stopped**: cursors flushed, final snapshot logged.
//! - **Failed**: startup failed.

use serde::Serialize;

/// State of the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Call [`start()`](super::ReplicationEngine::start) to begin replication.
    Created,
    Connecting,
    Running,
    ShuttingDown,
    Stopped,
    /// Startup failed. Check logs.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Connecting => write!(f, "Connecting"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of one direction worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    /// Not spawned yet.
    Idle,
    Running,
    /// Stopped on its own: source store unavailable or halted on request.
    Halted,
    /// Exited after engine shutdown.
    Stopped,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "Idle"),
            WorkerStatus::Running => write!(f, "Running"),
            WorkerStatus::Halted => write!(f, "Halted"),
            WorkerStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Health of one direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionHealth {
    /// e.g. `STORE_A->STORE_B`
    pub direction: String,
    pub status: WorkerStatus,
    pub last_error: Option<String>,
    /// Log entries fully processed (including echoes and malformed entries).
    pub records_processed: u64,
    /// Last committed log position.
    pub cursor: String,
    /// Lag behind the source log head, from stream id timestamps.
    pub lag_ms: Option<u64>,
}

/// Engine health for monitoring endpoints. Built from cached state only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub state: EngineState,
    pub directions: Vec<DirectionHealth>,
    /// Running with at least one direction running.
    pub ready: bool,
    /// Running with every direction running.
    pub healthy: bool,
}

impl HealthCheck {
    pub fn direction(&self, name: &str) -> Option<&DirectionHealth> {
        self.directions.iter().find(|d| d.direction == name)
    }
}
