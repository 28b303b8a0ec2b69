// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection pool abstraction for the active → passive channel.
//!
//! The source handler only needs borrow / send / release semantics; sizing
//! and eviction are the pool implementation's business. Pools are shared by
//! every source handler of a process and must be safe to use concurrently.
//!
//! # Example
//!
//! ```rust,no_run
//! use ha_event_replication::pool::{BoxFuture, ConnectionPool, PeerConnection};
//! use ha_event_replication::error::Result;
//!
//! struct Discard;
//!
//! impl PeerConnection for Discard {
//!     fn send<'a>(&'a mut self, _channel_id: &'a str, _payload: &'a [u8]) -> BoxFuture<'a, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//!
//! struct DiscardPool;
//!
//! impl ConnectionPool for DiscardPool {
//!     type Connection = Discard;
//!
//!     fn borrow<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Discard> {
//!         Box::pin(async { Ok(Discard) })
//!     }
//!
//!     fn release(&self, _key: &str, _connection: Discard) -> Result<()> {
//!         Ok(())
//!     }
//! }
//! ```

mod redis_pool;

pub use redis_pool::{RedisPeerConnection, RedisPeerPool};

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;

/// Pool key of the active-node → passive-node channel.
pub const ACTIVE_NODE_POOL_KEY: &str = "ActiveNode";

/// Channel replicated event messages are sent on.
pub const EVENT_CHANNEL_ID: &str = "eventMessage";

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A borrowed connection to the passive node.
pub trait PeerConnection: Send + 'static {
    /// Send one message on a logical channel.
    ///
    /// Fails with `ConnectionUnavailable`, or `ConnectionRefused` if the
    /// peer refused the underlying connection.
    fn send<'a>(&'a mut self, channel_id: &'a str, payload: &'a [u8]) -> BoxFuture<'a, ()>;
}

/// Keyed pool of reusable connections to the passive node.
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: PeerConnection;

    /// Borrow a connection for `key`.
    ///
    /// Fails with `PoolExhausted`, `Connect`, or `ConnectionRefused`.
    fn borrow<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Self::Connection>;

    /// Hand a borrowed connection back. Fails with `PoolReturn`.
    fn release(&self, key: &str, connection: Self::Connection) -> Result<()>;
}
