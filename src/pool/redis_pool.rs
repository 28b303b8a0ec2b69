//! Redis-backed connection pool to the passive node.
//!
//! Each pool key maps to one passive-node endpoint. Borrowed connections are
//! `MultiplexedConnection`s; idle ones are cached per key up to `max_idle`,
//! and a [`Bulkhead`] caps concurrent borrows at `max_active`.
//!
//! A message sent on channel `c` is appended to the Redis stream
//! `{stream_prefix}{c}` as a single binary `payload` field, which the
//! passive node tails and feeds to
//! [`HaCoordinator::on_replicated_message()`](crate::coordinator::HaCoordinator::on_replicated_message).
//!
//! # Connection Lifecycle
//!
//! ```text
//! borrow() ──▶ idle? ──yes──▶ reuse
//!                │
//!                no ──▶ connect (connect_timeout)
//!                          │
//!          refused ◀───────┴───────▶ ConnectionRefused / Connect
//!
//! send() ──▶ XADD (send_timeout) ──error / elapsed──▶ mark broken
//!
//! release() ──▶ broken? ──yes──▶ drop
//!                  │
//!                  no ──▶ idle (if < max_idle) else drop
//! ```
//!
//! A passive node that accepts connections but stops answering therefore
//! costs each replication attempt at most `send_timeout`.

use super::{BoxFuture, ConnectionPool, PeerConnection};
use crate::config::TransportConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::resilience::Bulkhead;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// One configured endpoint.
struct Endpoint {
    client: Client,
    idle: Mutex<Vec<MultiplexedConnection>>,
    bulkhead: Bulkhead,
}

/// Keyed pool of Redis connections to the passive node.
pub struct RedisPeerPool {
    endpoints: DashMap<String, Arc<Endpoint>>,
    config: Arc<TransportConfig>,
    borrow_timeout: Duration,
    connect_timeout: Duration,
    send_timeout: Duration,
    closed: AtomicBool,
}

impl RedisPeerPool {
    /// Create an empty pool. Add endpoints with [`add_endpoint()`](Self::add_endpoint).
    pub fn new(config: TransportConfig) -> Self {
        Self {
            endpoints: DashMap::new(),
            borrow_timeout: config.borrow_timeout_duration(),
            connect_timeout: config.connect_timeout_duration(),
            send_timeout: config.send_timeout_duration(),
            config: Arc::new(config),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a pool with the configured passive node registered under `key`.
    pub fn from_config(config: TransportConfig, key: &str) -> Result<Self> {
        let url = config.passive_node_url.clone();
        let pool = Self::new(config);
        pool.add_endpoint(key, &url)?;
        Ok(pool)
    }

    /// Register (or replace) the endpoint for `key`.
    ///
    /// Replacing drops cached idle connections of the old endpoint.
    pub fn add_endpoint(&self, key: &str, redis_url: &str) -> Result<()> {
        let client = Client::open(redis_url).map_err(|e| {
            ReplicationError::Config(format!("invalid passive node URL {:?}: {}", redis_url, e))
        })?;

        let endpoint = Endpoint {
            client,
            idle: Mutex::new(Vec::new()),
            bulkhead: Bulkhead::new(self.config.max_active),
        };
        if let Some(old) = self.endpoints.insert(key.to_string(), Arc::new(endpoint)) {
            old.bulkhead.close();
        }
        info!(key, url = %redis_url, "Registered passive node endpoint");
        Ok(())
    }

    /// Remove the endpoint for `key`. Outstanding connections fail on release.
    pub fn remove_endpoint(&self, key: &str) {
        if let Some((_, endpoint)) = self.endpoints.remove(key) {
            endpoint.bulkhead.close();
        }
    }

    /// Number of idle connections cached for `key`.
    pub fn idle_count(&self, key: &str) -> usize {
        let Some(endpoint) = self.endpoints.get(key).map(|e| Arc::clone(e.value())) else {
            return 0;
        };
        let count = endpoint.idle.lock().map(|idle| idle.len()).unwrap_or(0);
        count
    }

    /// Close the pool: further borrows fail and releases are rejected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for endpoint in self.endpoints.iter() {
            endpoint.bulkhead.close();
            if let Ok(mut idle) = endpoint.idle.lock() {
                idle.clear();
            }
        }
        info!("Passive node connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn borrow_inner(&self, key: &str) -> Result<RedisPeerConnection> {
        if self.is_closed() {
            return Err(ReplicationError::connect_msg(key, "connection pool is closed"));
        }

        let endpoint = self
            .endpoints
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ReplicationError::connect_msg(key, "no passive node endpoint configured"))?;

        let permit = endpoint
            .bulkhead
            .acquire_timeout(self.borrow_timeout)
            .await
            .map_err(|_| {
                metrics::record_pool_borrow(key, "exhausted");
                ReplicationError::PoolExhausted {
                    key: key.to_string(),
                }
            })?;

        let cached = endpoint.idle.lock().ok().and_then(|mut idle| idle.pop());
        let conn = match cached {
            Some(conn) => {
                metrics::record_pool_borrow(key, "reused");
                conn
            }
            None => {
                let conn = match timeout(
                    self.connect_timeout,
                    endpoint.client.get_multiplexed_async_connection(),
                )
                .await
                {
                    Ok(Ok(conn)) => conn,
                    Ok(Err(e)) => {
                        metrics::record_pool_borrow(key, "failed");
                        return Err(ReplicationError::connect(key, e));
                    }
                    Err(_) => {
                        metrics::record_pool_borrow(key, "failed");
                        return Err(ReplicationError::connect_msg(
                            key,
                            format!("connect timed out after {}ms", self.connect_timeout.as_millis()),
                        ));
                    }
                };
                metrics::record_pool_borrow(key, "created");
                debug!(key, "Opened new connection to passive node");
                conn
            }
        };

        trace!(key, free_slots = endpoint.bulkhead.available(), "Borrowed passive node connection");
        Ok(RedisPeerConnection {
            key: key.to_string(),
            conn,
            config: Arc::clone(&self.config),
            send_timeout: self.send_timeout,
            broken: false,
            _permit: permit,
        })
    }
}

impl ConnectionPool for RedisPeerPool {
    type Connection = RedisPeerConnection;

    fn borrow<'a>(&'a self, key: &'a str) -> BoxFuture<'a, RedisPeerConnection> {
        Box::pin(self.borrow_inner(key))
    }

    fn release(&self, key: &str, connection: RedisPeerConnection) -> Result<()> {
        if self.is_closed() {
            return Err(ReplicationError::PoolReturn {
                key: key.to_string(),
                message: "connection pool is closed".to_string(),
            });
        }
        if connection.key != key {
            return Err(ReplicationError::PoolReturn {
                key: key.to_string(),
                message: format!("connection was borrowed under key {:?}", connection.key),
            });
        }

        let endpoint = self
            .endpoints
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ReplicationError::PoolReturn {
                key: key.to_string(),
                message: "endpoint no longer registered".to_string(),
            })?;

        if connection.broken {
            debug!(key, "Discarding broken passive node connection");
            return Ok(());
        }

        let mut idle = endpoint.idle.lock().map_err(|_| ReplicationError::PoolReturn {
            key: key.to_string(),
            message: "idle list lock poisoned".to_string(),
        })?;
        if idle.len() < self.config.max_idle {
            idle.push(connection.conn);
        }
        metrics::set_pool_idle(key, idle.len());
        Ok(())
    }
}

/// A borrowed Redis connection to the passive node.
///
/// Holds a bulkhead slot until dropped or released.
pub struct RedisPeerConnection {
    key: String,
    conn: MultiplexedConnection,
    config: Arc<TransportConfig>,
    send_timeout: Duration,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl RedisPeerConnection {
    async fn send_inner(&mut self, channel_id: &str, payload: &[u8]) -> Result<()> {
        let stream_key = self.config.stream_key(channel_id);
        let start = Instant::now();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&stream_key)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.stream_max_len)
            .arg("*")
            .arg("payload")
            .arg(payload);

        let result = timeout(
            self.send_timeout,
            cmd.query_async::<_, String>(&mut self.conn),
        )
        .await;

        match result {
            Ok(Ok(_id)) => {
                metrics::record_message_sent(channel_id, payload.len(), start.elapsed());
                Ok(())
            }
            Ok(Err(e)) => {
                self.broken = true;
                warn!(key = %self.key, channel = channel_id, error = %e, "Send to passive node failed");
                Err(ReplicationError::send(&self.key, channel_id, e))
            }
            Err(_) => {
                // A late reply could still arrive on this connection
                self.broken = true;
                warn!(
                    key = %self.key,
                    channel = channel_id,
                    timeout = ?self.send_timeout,
                    "Send to passive node timed out"
                );
                Err(ReplicationError::ConnectionUnavailable {
                    channel: channel_id.to_string(),
                    message: format!("send timed out after {}ms", self.send_timeout.as_millis()),
                })
            }
        }
    }
}

impl PeerConnection for RedisPeerConnection {
    fn send<'a>(&'a mut self, channel_id: &'a str, payload: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(self.send_inner(channel_id, payload))
    }
}
