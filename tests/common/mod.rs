//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Redis testcontainer setup (passive node)
//! - Recording connection pool with failure injection
//! - Recording input handler and resume cursor
//! - A passive node that stalls on send
//! - Event helpers

#![allow(dead_code)]

pub mod containers;
pub mod mock_pool;
pub mod stalled_peer;

pub use containers::*;
pub use mock_pool::*;
pub use stalled_peer::*;

use ha_event_replication::backoff::ManualClock;
use ha_event_replication::{
    Attribute, Event, ReplicationContext, ReplicationSettings, SourceHandler,
};
use std::sync::Arc;

/// Build an event with a stock-quote-like payload.
pub fn event(timestamp: i64) -> Event {
    Event::new(
        timestamp,
        vec![Attribute::from("WSO2"), Attribute::from(55.6f64), Attribute::from(100i64)],
    )
}

/// Everything a source handler test needs, wired together.
pub struct Harness {
    pub pool: Arc<MockPool>,
    pub clock: Arc<ManualClock>,
    pub input: Arc<RecordingInputHandler>,
    pub context: ReplicationContext<MockPool>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_pool(MockPool::new())
    }

    pub fn with_pool(pool: MockPool) -> Self {
        let pool = Arc::new(pool);
        let clock = Arc::new(ManualClock::new(1_000_000));
        let context = ReplicationContext::new(Arc::clone(&pool), ReplicationSettings::default())
            .with_clock(clock.clone());
        Self {
            pool,
            clock,
            input: Arc::new(RecordingInputHandler::new()),
            context,
        }
    }

    /// A handler of source type `kafka` for app `StockApp`.
    pub fn handler(&self, id: &str) -> SourceHandler<MockPool> {
        self.handler_of_type(id, "kafka")
    }

    pub fn handler_of_type(&self, id: &str, source_type: &str) -> SourceHandler<MockPool> {
        SourceHandler::new(id, "StockApp", source_type, &self.context, self.input.clone())
    }

    /// A handler that is Active with the passive node attached.
    pub async fn replicating_handler(&self, id: &str) -> SourceHandler<MockPool> {
        let handler = self.handler(id);
        handler.set_as_active();
        handler.set_replication_target_attached(true).await;
        handler
    }
}
