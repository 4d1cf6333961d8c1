// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `store-replicator`: runs the replication engine until Ctrl+C.
//!
//! ```text
//! store-replicator [config.json]
//! ```
//!
//! Without a path the default configuration (two local Redis instances) is
//! used. Log verbosity follows `RUST_LOG` (default `info`).

use store_replication::{ReplicationConfig, ReplicationEngine};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "store-replicator failed");
        std::process::exit(1);
    }
}

async fn run() -> store_replication::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "Loading configuration");
            ReplicationConfig::from_json_file(&path)?
        }
        None => ReplicationConfig::default(),
    };

    let mut engine = ReplicationEngine::connect(config).await?;
    engine.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
    }
    info!("Ctrl+C received");

    engine.shutdown().await;
    Ok(())
}
