//! # HA Event Replication
//!
//! The event replication core of a two-node active/passive stream processor.
//!
//! ## Architecture
//!
//! Every input source of the active node is fronted by a [`SourceHandler`].
//! Accepted events update the handler's checkpoint, are mirrored to the
//! passive node over a pooled connection, and are then forwarded to local
//! processing:
//!
//! ```text
//! ┌───────────────────────────── active node ─────────────────────────────┐
//! │                                                                       │
//! │  input source ──► SourceHandler ──────────────────► InputHandler      │
//! │                    │  role gate, checkpoint                           │
//! │                    │                                                  │
//! │                    ▼                                                  │
//! │   ReplicationBackoff ─► ConnectionPool ─► codec::encode ─► send       │
//! │   (refusal cooldown)    ("ActiveNode")    (SequenceGenerator)  │      │
//! └────────────────────────────────────────────────────────────────┼──────┘
//!                                                                  ▼
//! ┌───────────────────────────── passive node ────────────────────────────┐
//! │  HaCoordinator::on_replicated_message ─► resume markers ─► cursor     │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Replication is best effort: no replication failure ever fails local
//! processing. A refused connection suppresses further attempts for a
//! cooldown (5 s by default) so a dead passive node costs nothing on the
//! hot path.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ha_event_replication::{Event, HaConfig, HaCoordinator, InputHandler};
//! use ha_event_replication::pool::BoxFuture;
//! use std::sync::Arc;
//!
//! struct Print;
//!
//! impl InputHandler for Print {
//!     fn send(&self, event: Event) -> BoxFuture<'_, ()> {
//!         println!("{:?}", event);
//!         Box::pin(async { Ok(()) })
//!     }
//!
//!     fn send_batch(&self, events: Vec<Event>) -> BoxFuture<'_, ()> {
//!         println!("{} events", events.len());
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> ha_event_replication::Result<()> {
//!     let coordinator = HaCoordinator::connect(HaConfig::for_testing("node-a"))?;
//!     let source = coordinator
//!         .create_source_handler("StockApp:stream-in", "StockApp", "kafka", Arc::new(Print))
//!         .await?;
//!
//!     coordinator.set_as_active();
//!     coordinator.set_passive_node_added(true).await;
//!
//!     source.on_single_event(Event::new(100, vec!["WSO2".into()]), None).await?;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pool;
pub mod resilience;
pub mod sequence;
pub mod source_handler;

// Re-exports for convenience
pub use backoff::{BackoffState, Clock, ManualClock, ReplicationBackoff, SystemClock};
pub use checkpoint::{CheckpointSnapshot, CheckpointState};
pub use config::{HaConfig, ReplicationSettings, TransportConfig};
pub use coordinator::{HaCoordinator, HealthCheck, SourceHealth};
pub use error::{ReplicationError, Result};
pub use event::{Attribute, Event, QueuedEvent};
pub use pool::{ConnectionPool, PeerConnection, RedisPeerPool};
pub use sequence::SequenceGenerator;
pub use source_handler::{InputHandler, NodeRole, ReplicationContext, ResumeCursor, SourceHandler};
