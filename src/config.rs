//! Configuration for the replication core.
//!
//! Configuration can be constructed programmatically or deserialized from
//! YAML/JSON. Durations are humantime strings (`"5s"`, `"250ms"`).
//!
//! # Configuration Structure
//!
//! ```text
//! HaConfig
//! ├── node_id: String                 # This node's unique ID
//! ├── replication: ReplicationSettings
//! │   ├── backoff_cooldown            # Suppression window after a refusal
//! │   ├── ignored_source_types        # Source kinds never replicated
//! │   ├── pool_key                    # Logical active→passive pool key
//! │   └── channel_id                  # Channel replicated events are sent on
//! └── transport: TransportConfig      # Redis transport to the passive node
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! node_id: "si-node-1"
//!
//! replication:
//!   backoff_cooldown: "5s"
//!   ignored_source_types: ["inMemory"]
//!
//! transport:
//!   passive_node_url: "redis://si-node-2:6379"
//!   max_active: 8
//!   borrow_timeout: "200ms"
//!   send_timeout: "500ms"
//! ```

use crate::backoff::DEFAULT_COOLDOWN;
use crate::error::{ReplicationError, Result};
use crate::pool::{ACTIVE_NODE_POOL_KEY, EVENT_CHANNEL_ID};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object for one HA node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    /// The identity of the local node.
    pub node_id: String,

    /// Replication behavior of the source handlers.
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Transport used to reach the passive node.
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            node_id: "local.dev.node.default".to_string(),
            replication: ReplicationSettings::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl HaConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            replication: ReplicationSettings::default(),
            transport: TransportConfig::for_testing("redis://127.0.0.1:6379"),
        }
    }

    /// Check that all duration strings parse and limits are sane.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(ReplicationError::Config("node_id must not be empty".to_string()));
        }
        parse_duration("replication.backoff_cooldown", &self.replication.backoff_cooldown)?;
        parse_duration("transport.borrow_timeout", &self.transport.borrow_timeout)?;
        parse_duration("transport.connect_timeout", &self.transport.connect_timeout)?;
        let send_timeout = parse_duration("transport.send_timeout", &self.transport.send_timeout)?;
        if send_timeout.is_zero() {
            return Err(ReplicationError::Config(
                "transport.send_timeout must be greater than zero".to_string(),
            ));
        }
        if self.transport.max_active == 0 {
            return Err(ReplicationError::Config(
                "transport.max_active must be at least 1".to_string(),
            ));
        }
        if self.replication.channel_id.is_empty() || self.replication.pool_key.is_empty() {
            return Err(ReplicationError::Config(
                "replication.channel_id and replication.pool_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ReplicationError::Config(format!("{}: invalid duration {:?}: {}", field, value, e)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Source-handler replication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// How long to skip replication after the passive node refused a
    /// connection, as a duration string.
    #[serde(default = "default_backoff_cooldown")]
    pub backoff_cooldown: String,

    /// Source types that are never replicated (compared case-insensitively).
    /// In-memory sources are fed locally on both nodes.
    #[serde(default = "default_ignored_source_types")]
    pub ignored_source_types: Vec<String>,

    /// Pool key of the active-node → passive-node channel.
    #[serde(default = "default_pool_key")]
    pub pool_key: String,

    /// Channel replicated event messages are sent on.
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
}

fn default_backoff_cooldown() -> String {
    "5s".to_string()
}

fn default_ignored_source_types() -> Vec<String> {
    vec!["inMemory".to_string()]
}

fn default_pool_key() -> String {
    ACTIVE_NODE_POOL_KEY.to_string()
}

fn default_channel_id() -> String {
    EVENT_CHANNEL_ID.to_string()
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            backoff_cooldown: default_backoff_cooldown(),
            ignored_source_types: default_ignored_source_types(),
            pool_key: default_pool_key(),
            channel_id: default_channel_id(),
        }
    }
}

impl ReplicationSettings {
    /// Parse the backoff cooldown, falling back to 5 seconds.
    pub fn backoff_cooldown_duration(&self) -> Duration {
        humantime::parse_duration(&self.backoff_cooldown).unwrap_or(DEFAULT_COOLDOWN)
    }

    /// Whether events from this source type are excluded from replication.
    pub fn is_ignored_source_type(&self, source_type: &str) -> bool {
        self.ignored_source_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(source_type))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TransportConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Redis transport to the passive node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Redis URL of the passive node.
    /// Example: `"redis://si-node-2:6379"`
    #[serde(default = "default_passive_node_url")]
    pub passive_node_url: String,

    /// Maximum connections borrowed at once per pool key.
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Maximum idle connections kept per pool key.
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// How long a borrow waits for a free slot before failing.
    #[serde(default = "default_borrow_timeout")]
    pub borrow_timeout: String,

    /// Timeout for establishing a new connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Upper bound on one send to the passive node. A send that takes
    /// longer is abandoned and its connection discarded.
    #[serde(default = "default_send_timeout")]
    pub send_timeout: String,

    /// Prefix of the Redis stream a channel maps to.
    #[serde(default = "default_stream_prefix")]
    pub stream_prefix: String,

    /// Approximate cap on replicated-message stream length (`MAXLEN ~`).
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,
}

fn default_passive_node_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_max_active() -> usize {
    10
}

fn default_max_idle() -> usize {
    10
}

fn default_borrow_timeout() -> String {
    "1s".to_string()
}

fn default_connect_timeout() -> String {
    "5s".to_string()
}

fn default_send_timeout() -> String {
    "1s".to_string()
}

fn default_stream_prefix() -> String {
    "ha:".to_string()
}

fn default_stream_max_len() -> usize {
    100_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            passive_node_url: default_passive_node_url(),
            max_active: default_max_active(),
            max_idle: default_max_idle(),
            borrow_timeout: default_borrow_timeout(),
            connect_timeout: default_connect_timeout(),
            send_timeout: default_send_timeout(),
            stream_prefix: default_stream_prefix(),
            stream_max_len: default_stream_max_len(),
        }
    }
}

impl TransportConfig {
    /// Fast-fail transport config for tests.
    pub fn for_testing(passive_node_url: &str) -> Self {
        Self {
            passive_node_url: passive_node_url.to_string(),
            max_active: 2,
            max_idle: 2,
            borrow_timeout: "100ms".to_string(),
            connect_timeout: "500ms".to_string(),
            send_timeout: "200ms".to_string(),
            stream_prefix: "ha-test:".to_string(),
            stream_max_len: 1_000,
        }
    }

    pub fn borrow_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.borrow_timeout).unwrap_or(Duration::from_secs(1))
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn send_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.send_timeout).unwrap_or(Duration::from_secs(1))
    }

    /// Redis stream key a channel's messages are appended to.
    pub fn stream_key(&self, channel_id: &str) -> String {
        format!("{}{}", self.stream_prefix, channel_id)
    }
}
