//! Shared test utilities for pipeline, chaos and integration tests.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - In-memory engine construction
//! - Polling helpers for asynchronous assertions

#![allow(dead_code)]

pub mod containers;

pub use containers::*;

use std::sync::Arc;
use std::time::Duration;
use store_replication::{MemoryStore, ReplicationConfig, ReplicationEngine};

pub const A_TO_B: &str = "STORE_A->STORE_B";
pub const B_TO_A: &str = "STORE_B->STORE_A";

/// Engine over two fresh in-memory stores.
pub fn memory_engine() -> ReplicationEngine<MemoryStore> {
    memory_engine_with(ReplicationConfig::for_testing())
}

pub fn memory_engine_with(config: ReplicationConfig) -> ReplicationEngine<MemoryStore> {
    ReplicationEngine::with_stores(
        config,
        Arc::new(MemoryStore::new("STORE_A")),
        Arc::new(MemoryStore::new("STORE_B")),
    )
}

/// Current unix time in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `direction` has processed at least `n` log entries.
pub async fn wait_processed(engine: &ReplicationEngine<MemoryStore>, direction: &str, n: u64) {
    let done = eventually(Duration::from_secs(5), || {
        engine
            .health_check()
            .direction(direction)
            .map(|d| d.records_processed >= n)
            .unwrap_or(false)
    })
    .await;
    assert!(done, "{} did not process {} entries: {:?}", direction, n, engine.health_check());
}
