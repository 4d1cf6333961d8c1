// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides helpers to spin up one Redis container per store.

use redis::AsyncCommands;
use store_replication::{StoreConfig, TransactionRecord};
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// One store backed by its own Redis container.
pub struct TestStore<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub store_id: String,
    pub redis_url: String,
}

impl<'a> TestStore<'a> {
    pub fn new(docker: &'a Cli, store_id: &str) -> Self {
        let container = redis_container(docker);
        let redis_url = redis_url(&container);
        Self {
            container,
            store_id: store_id.to_string(),
            redis_url,
        }
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig::for_testing(&self.store_id, &self.redis_url)
    }

    async fn conn(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        client.get_multiplexed_async_connection().await
    }

    /// Write a transaction the way a point of sale does: log entry plus
    /// record document. Returns the stream id.
    pub async fn pos_append(&self, record: &TransactionRecord) -> redis::RedisResult<String> {
        let mut conn = self.conn().await?;
        let json = record
            .to_json()
            .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "encode", e.to_string())))?;
        conn.set::<_, _, ()>(format!("transaction:{}", record.id), json)
            .await?;

        let fields = record.to_stream_fields();
        conn.xadd("transaction_stream", "*", &fields).await
    }

    /// Append raw fields to the transaction log.
    pub async fn pos_append_raw(&self, fields: &[(&str, &str)]) -> redis::RedisResult<String> {
        let mut conn = self.conn().await?;
        conn.xadd("transaction_stream", "*", fields).await
    }

    pub async fn put_photo(&self, record_id: &str, blob: &[u8]) -> redis::RedisResult<()> {
        let mut conn = self.conn().await?;
        conn.set(format!("photo:{}", record_id), blob).await
    }

    pub async fn stream_len(&self) -> redis::RedisResult<usize> {
        let mut conn = self.conn().await?;
        conn.xlen("transaction_stream").await
    }

    pub async fn alert_len(&self) -> redis::RedisResult<usize> {
        let mut conn = self.conn().await?;
        conn.xlen("fraud_alerts").await
    }

    pub async fn get_photo(&self, record_id: &str) -> redis::RedisResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get(format!("photo:{}", record_id)).await
    }

    pub async fn has_record(&self, record_id: &str) -> redis::RedisResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(format!("transaction:{}", record_id)).await
    }
}
