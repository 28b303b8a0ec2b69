//! Per-source checkpoint state.
//!
//! Tracks the timestamp of the last event accepted while Active. The external
//! persistence coordinator snapshots it at times outside our control; restore
//! deliberately discards its input because replication progress is rebuilt
//! during failover resynchronization, not from the snapshot.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Snapshot key under which the last processed timestamp is stored.
pub const ACTIVE_PROCESSED_LAST_TIMESTAMP: &str = "activeProcessedLastTimestamp";

/// Serialized form of [`CheckpointState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    #[serde(rename = "activeProcessedLastTimestamp")]
    pub last_processed_event_timestamp: i64,
}

impl CheckpointSnapshot {
    /// Render as the key/value map handed to the persistence coordinator.
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert(
            ACTIVE_PROCESSED_LAST_TIMESTAMP.to_string(),
            serde_json::Value::from(self.last_processed_event_timestamp),
        );
        map
    }
}

/// Replication progress of one source handler.
#[derive(Debug, Default)]
pub struct CheckpointState {
    last_processed_event_timestamp: AtomicI64,
}

impl CheckpointState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the timestamp of an accepted event (or last event of a batch).
    pub fn update(&self, timestamp: i64) {
        self.last_processed_event_timestamp
            .store(timestamp, Ordering::Release);
    }

    pub fn last_processed_event_timestamp(&self) -> i64 {
        self.last_processed_event_timestamp.load(Ordering::Acquire)
    }

    /// Checkpoint state lives as long as its source; it is never pruned on its own.
    pub fn can_destroy(&self) -> bool {
        false
    }

    pub fn snapshot(&self) -> CheckpointSnapshot {
        CheckpointSnapshot {
            last_processed_event_timestamp: self.last_processed_event_timestamp(),
        }
    }

    /// Intentionally a no-op.
    pub fn restore(&self, _snapshot: &CheckpointSnapshot) {}
}
