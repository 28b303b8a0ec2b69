// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HA coordinator.
//!
//! Owns the process-wide pieces shared by every source handler and fans out
//! node-level state changes to them:
//! - Shared [`SequenceGenerator`] and connection pool via [`ReplicationContext`]
//! - Handler registry keyed by source handler id
//! - Role, passive-node attachment, and playback fan-out
//! - Checkpoint snapshots for the persistence layer
//! - The passive-side receive path for replicated messages
//!
//! # Role Changes
//!
//! ```text
//!          set_as_active()
//! Passive ─────────────────▶ Active
//!    ▲                         │
//!    └─────────────────────────┘
//!          set_as_passive()
//! ```
//!
//! Handlers registered later inherit the node's current role, attachment, and
//! playback flags. Role changes are broadcast on a watch channel.
//!
//! # Passive Receive Path
//!
//! On the passive node replicated events are not processed; only their resume
//! markers are routed to the owning handler so that, after failover, each
//! source resumes from where the active node last was.

mod types;

pub use types::{HealthCheck, SourceHealth};

use crate::checkpoint::CheckpointSnapshot;
use crate::codec;
use crate::config::HaConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::pool::{ConnectionPool, RedisPeerPool};
use crate::sequence::SequenceGenerator;
use crate::source_handler::{InputHandler, NodeRole, ReplicationContext, SourceHandler};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Node-level coordinator for all source handlers of one process.
pub struct HaCoordinator<P: ConnectionPool = RedisPeerPool> {
    node_id: String,
    context: ReplicationContext<P>,
    handlers: DashMap<String, Arc<SourceHandler<P>>>,
    role_tx: watch::Sender<NodeRole>,
    role_rx: watch::Receiver<NodeRole>,
    passive_node_added: AtomicBool,
    playback: AtomicBool,
    last_received_sequence: AtomicU64,
}

impl HaCoordinator<RedisPeerPool> {
    /// Validate `config` and build a coordinator on the Redis transport.
    ///
    /// No connection is opened until the first replication attempt.
    pub fn connect(config: HaConfig) -> Result<Self> {
        config.validate()?;
        let pool = RedisPeerPool::from_config(config.transport.clone(), &config.replication.pool_key)?;
        Ok(Self::with_pool(config, Arc::new(pool)))
    }
}

impl<P: ConnectionPool> HaCoordinator<P> {
    /// Create a coordinator over an existing pool, with a fresh sequence
    /// generator and the system clock.
    pub fn with_pool(config: HaConfig, pool: Arc<P>) -> Self {
        let context = ReplicationContext::new(pool, config.replication.clone());
        Self::with_context(config.node_id, context)
    }

    /// Create a coordinator over fully specified shared dependencies.
    pub fn with_context(node_id: impl Into<String>, context: ReplicationContext<P>) -> Self {
        let (role_tx, role_rx) = watch::channel(NodeRole::Passive);
        Self {
            node_id: node_id.into(),
            context,
            handlers: DashMap::new(),
            role_tx,
            role_rx,
            passive_node_added: AtomicBool::new(false),
            playback: AtomicBool::new(false),
            last_received_sequence: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn role(&self) -> NodeRole {
        *self.role_rx.borrow()
    }

    /// Get a receiver to watch role changes.
    pub fn role_receiver(&self) -> watch::Receiver<NodeRole> {
        self.role_rx.clone()
    }

    pub fn sequence(&self) -> &Arc<SequenceGenerator> {
        &self.context.sequence
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.context.pool
    }

    pub fn is_passive_node_added(&self) -> bool {
        self.passive_node_added.load(Ordering::Acquire)
    }

    /// Highest sequence number seen on the receive path.
    pub fn last_received_sequence(&self) -> u64 {
        self.last_received_sequence.load(Ordering::Acquire)
    }

    // =========================================================================
    // Handler registry
    // =========================================================================

    /// Create and register the handler for one input source.
    ///
    /// `source_handler_id` must be stable across both nodes of the pair; it
    /// is how replicated resume markers find their handler on the passive
    /// node. Fails with `Config` if the id is already registered.
    pub async fn create_source_handler(
        &self,
        source_handler_id: &str,
        app_name: &str,
        source_type: &str,
        input_handler: Arc<dyn InputHandler>,
    ) -> Result<Arc<SourceHandler<P>>> {
        let handler = match self.handlers.entry(source_handler_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ReplicationError::Config(format!(
                    "source handler {:?} already registered",
                    source_handler_id
                )));
            }
            Entry::Vacant(slot) => {
                let handler = Arc::new(SourceHandler::new(
                    source_handler_id,
                    app_name,
                    source_type,
                    &self.context,
                    input_handler,
                ));
                slot.insert(Arc::clone(&handler));
                handler
            }
        };

        self.inherit_node_state(&handler).await;
        debug!(
            source = source_handler_id,
            app = app_name,
            source_type,
            role = %handler.role(),
            "Source handler registered"
        );
        Ok(handler)
    }

    /// Copy the node's playback, attachment, and role onto a registered handler.
    ///
    /// Fan-outs store the node value before visiting handlers, so once a
    /// re-read after writing matches what was written, no concurrent change
    /// can be missed.
    async fn inherit_node_state(&self, handler: &SourceHandler<P>) {
        loop {
            let playback = self.playback.load(Ordering::Acquire);
            let attached = self.is_passive_node_added();
            let role = self.role();

            handler.set_playback(playback);
            handler.set_replication_target_attached(attached).await;
            handler.set_role(role);

            if playback == self.playback.load(Ordering::Acquire)
                && attached == self.is_passive_node_added()
                && role == self.role()
            {
                return;
            }
        }
    }

    pub fn source_handler(&self, source_handler_id: &str) -> Option<Arc<SourceHandler<P>>> {
        self.handlers
            .get(source_handler_id)
            .map(|h| Arc::clone(h.value()))
    }

    /// All handlers registered for `app_name`.
    pub fn source_handlers_for_app(&self, app_name: &str) -> Vec<Arc<SourceHandler<P>>> {
        self.handlers
            .iter()
            .filter(|h| h.app_name() == app_name)
            .map(|h| Arc::clone(h.value()))
            .collect()
    }

    pub fn remove_source_handler(&self, source_handler_id: &str) -> Option<Arc<SourceHandler<P>>> {
        self.handlers.remove(source_handler_id).map(|(_, h)| h)
    }

    /// Unregister every handler of `app_name`. Returns how many were removed.
    pub fn remove_app(&self, app_name: &str) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|_, h| h.app_name() != app_name);
        let removed = before.saturating_sub(self.handlers.len());
        if removed > 0 {
            info!(app = app_name, removed, "Removed source handlers for app");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn all(&self) -> Vec<Arc<SourceHandler<P>>> {
        self.handlers.iter().map(|h| Arc::clone(h.value())).collect()
    }

    // =========================================================================
    // Node-level fan-out
    // =========================================================================

    pub fn set_role(&self, role: NodeRole) {
        let previous = self.role_tx.send_replace(role);
        for handler in self.all() {
            handler.set_role(role);
        }
        if previous != role {
            info!(node_id = %self.node_id, from = %previous, to = %role, "Node role changed");
        }
    }

    pub fn set_as_active(&self) {
        self.set_role(NodeRole::Active);
    }

    pub fn set_as_passive(&self) {
        self.set_role(NodeRole::Passive);
    }

    /// Record whether the passive node has joined the pair.
    pub async fn set_passive_node_added(&self, added: bool) {
        self.passive_node_added.store(added, Ordering::Release);
        for handler in self.all() {
            handler.set_replication_target_attached(added).await;
        }
        info!(node_id = %self.node_id, added, "Passive node attachment changed");
    }

    pub fn set_playback(&self, playback: bool) {
        self.playback.store(playback, Ordering::Release);
        for handler in self.all() {
            handler.set_playback(playback);
        }
    }

    /// Checkpoint snapshots of every registered handler, keyed by handler id.
    pub fn snapshot_all(&self) -> HashMap<String, CheckpointSnapshot> {
        self.handlers
            .iter()
            .map(|h| (h.key().clone(), h.snapshot()))
            .collect()
    }

    // =========================================================================
    // Receive path
    // =========================================================================

    /// Handle one replicated message received from the active node.
    ///
    /// Returns the number of events in the message. Malformed buffers fail
    /// with `Decoding`. On an active node the message is counted and
    /// otherwise ignored.
    pub async fn on_replicated_message(&self, bytes: &[u8]) -> Result<usize> {
        let events = match codec::decode(bytes) {
            Ok(events) => events,
            Err(e) => {
                metrics::record_message_received(0, false);
                warn!(error = %e, len = bytes.len(), "Discarding malformed replicated message");
                return Err(e);
            }
        };
        metrics::record_message_received(events.len(), true);

        if let Some(max) = events.iter().map(|e| e.sequence_id).max() {
            self.last_received_sequence.fetch_max(max, Ordering::AcqRel);
        }

        if self.role() == NodeRole::Active {
            debug!(count = events.len(), "Active node received replicated message, ignoring");
            return Ok(events.len());
        }

        for queued in &events {
            let Some(markers) = queued.resume_markers.as_deref() else {
                continue;
            };
            match self.source_handler(&queued.source_handler_id) {
                Some(handler) if handler.app_name() == queued.app_name => {
                    handler.notify_resume_markers_changed(markers).await;
                }
                Some(handler) => {
                    warn!(
                        source = %queued.source_handler_id,
                        expected_app = %handler.app_name(),
                        app = %queued.app_name,
                        "Replicated markers belong to a different app, ignoring"
                    );
                }
                None => {
                    debug!(source = %queued.source_handler_id, "No handler for replicated markers");
                }
            }
        }

        Ok(events.len())
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Health snapshot for monitoring endpoints. Performs no network I/O.
    pub async fn health_check(&self) -> HealthCheck {
        let handlers = self.all();
        let mut sources = Vec::with_capacity(handlers.len());
        let mut sources_suppressed = 0;

        for handler in handlers {
            let suppressed = handler.backoff().is_suppressed().await;
            if suppressed {
                sources_suppressed += 1;
            }
            sources.push(SourceHealth {
                source_handler_id: handler.id().to_string(),
                app_name: handler.app_name().to_string(),
                source_type: handler.source_type().to_string(),
                role: handler.role(),
                replication_target_attached: handler.is_replication_target_attached(),
                suppressed,
                last_processed_event_timestamp: handler.checkpoint().last_processed_event_timestamp(),
            });
        }
        sources.sort_by(|a, b| a.source_handler_id.cmp(&b.source_handler_id));

        let role = self.role();
        let passive_node_added = self.is_passive_node_added();
        let healthy = !(role == NodeRole::Active && passive_node_added && sources_suppressed > 0);

        HealthCheck {
            node_id: self.node_id.clone(),
            role,
            passive_node_added,
            playback: self.playback.load(Ordering::Acquire),
            sources_total: sources.len(),
            sources_suppressed,
            last_sequence_id: self.context.sequence.current(),
            last_received_sequence_id: self.last_received_sequence(),
            sources,
            healthy,
        }
    }
}
