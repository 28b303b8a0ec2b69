//! Coordinator health types.
//!
//! Collected from cached in-memory state only; building a [`HealthCheck`]
//! performs no network I/O.

use crate::source_handler::NodeRole;

/// Health of one registered source handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHealth {
    pub source_handler_id: String,
    pub app_name: String,
    pub source_type: String,
    pub role: NodeRole,
    pub replication_target_attached: bool,
    /// Backoff policy is suppressing attempts after a refusal.
    pub suppressed: bool,
    pub last_processed_event_timestamp: i64,
}

/// Point-in-time health of the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub node_id: String,
    pub role: NodeRole,
    pub passive_node_added: bool,
    pub playback: bool,
    pub sources_total: usize,
    pub sources_suppressed: usize,
    /// Last sequence number handed out on this node.
    pub last_sequence_id: u64,
    /// Highest sequence number seen in received replicated messages.
    pub last_received_sequence_id: u64,
    pub sources: Vec<SourceHealth>,
    /// False only when this node should be replicating and some source is
    /// currently suppressed.
    pub healthy: bool,
}

impl HealthCheck {
    /// Whether this node is expected to be mirroring events right now.
    pub fn is_replicating(&self) -> bool {
        self.role == NodeRole::Active && self.passive_node_added
    }
}
