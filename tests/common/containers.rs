// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! The passive node's inbound channel is a Redis stream; these helpers spin
//! one up and read back what the active node wrote.

use redis::AsyncCommands;
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

/// A passive node backed by a Redis container.
pub struct TestPassiveNode<'a> {
    container: Container<'a, GenericImage>,
    pub redis_url: String,
}

impl<'a> TestPassiveNode<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let redis_url = redis_url(&container);
        Self { container, redis_url }
    }

    /// Stop the container, so later connects are refused.
    pub fn stop(&self) {
        self.container.stop();
    }

    /// Length of the stream for `stream_key`.
    pub async fn stream_len(&self, stream_key: &str) -> redis::RedisResult<usize> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        conn.xlen(stream_key).await
    }

    /// Every `payload` field written to `stream_key`, oldest first.
    pub async fn payloads(&self, stream_key: &str) -> redis::RedisResult<Vec<Vec<u8>>> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let reply: redis::streams::StreamRangeReply = conn.xrange_all(stream_key).await?;
        let mut payloads = Vec::with_capacity(reply.ids.len());
        for entry in reply.ids {
            if let Some(bytes) = entry.get::<Vec<u8>>("payload") {
                payloads.push(bytes);
            }
        }
        Ok(payloads)
    }
}
