// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication core.
//!
//! Errors are categorized by where they occur on the replication path
//! (encoding, pool, transport) and carry the pool key or channel involved.
//!
//! # Error Categories
//!
//! | Error Type | Triggers backoff | Description |
//! |------------|------------------|-------------|
//! | `Encoding` | No | Payload could not be serialized |
//! | `Decoding` | No | Received buffer is malformed (passive side) |
//! | `PoolExhausted` | No | No connection could be borrowed in time |
//! | `Connect` | No | Connection could not be established |
//! | `ConnectionRefused` | Yes | Passive node actively refused the connection |
//! | `ConnectionUnavailable` | No | Send over a borrowed connection failed |
//! | `PoolReturn` | No | Returning a connection to the pool failed |
//! | `Processing` | No | Local event processing rejected the event |
//! | `Config` | No | Configuration invalid |
//!
//! # Propagation
//!
//! Every variant except `Processing` and `Config` is terminal inside the
//! source handler: it is logged, counted, and swallowed. Local event
//! processing is never failed by a replication problem.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while replicating events to the passive node.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// An event payload could not be serialized (e.g. an opaque object attribute).
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A replicated message could not be decoded.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// No connection could be borrowed for the given pool key.
    #[error("Connection pool exhausted ({key})")]
    PoolExhausted { key: String },

    /// Connection establishment failed for a reason other than refusal.
    #[error("Connect error ({key}): {message}")]
    Connect {
        key: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// The passive node refused the connection.
    ///
    /// This is the only condition that moves the backoff policy to suppressed.
    #[error("Connection refused ({key}): {message}")]
    ConnectionRefused { key: String, message: String },

    /// Sending over an already-borrowed connection failed.
    #[error("Connection unavailable on channel {channel}: {message}")]
    ConnectionUnavailable { channel: String, message: String },

    /// The connection could not be handed back to the pool.
    #[error("Failed to return connection to pool ({key}): {message}")]
    PoolReturn { key: String, message: String },

    /// Local processing of an accepted event failed.
    #[error("Event processing error: {0}")]
    Processing(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReplicationError {
    /// Classify a Redis error raised while connecting under `key`.
    pub fn connect(key: impl Into<String>, source: redis::RedisError) -> Self {
        let key = key.into();
        if source.is_connection_refusal() {
            Self::ConnectionRefused {
                key,
                message: source.to_string(),
            }
        } else {
            Self::Connect {
                key,
                message: source.to_string(),
                source: Some(source),
            }
        }
    }

    /// Connect error without an underlying Redis error (timeouts, bad URLs).
    pub fn connect_msg(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            key: key.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Classify a Redis error raised while sending on `channel` to peer `key`.
    pub fn send(key: &str, channel: &str, source: redis::RedisError) -> Self {
        if source.is_connection_refusal() {
            Self::ConnectionRefused {
                key: key.to_string(),
                message: source.to_string(),
            }
        } else {
            Self::ConnectionUnavailable {
                channel: channel.to_string(),
                message: source.to_string(),
            }
        }
    }

    /// Whether this error means the passive node refused the connection.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::ConnectionRefused { .. })
    }

    /// Short label used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Encoding(_) => "encoding",
            Self::Decoding(_) => "decoding",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::Connect { .. } => "connect",
            Self::ConnectionRefused { .. } => "connection_refused",
            Self::ConnectionUnavailable { .. } => "connection_unavailable",
            Self::PoolReturn { .. } => "pool_return",
            Self::Processing(_) => "processing",
            Self::Config(_) => "config",
        }
    }
}
