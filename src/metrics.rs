//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Events replicated to the passive node
//! - Replication errors by kind
//! - Backoff suppression and transitions
//! - Connection pool borrow outcomes
//! - Node role and checkpoint progress per source
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `ha_replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No recorder is installed here; without one every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record events included in a successfully sent replication message.
pub fn record_events_replicated(source: &str, count: usize) {
    counter!("ha_replication_events_replicated_total", "source" => source.to_string())
        .increment(count as u64);
}

/// Record a replication message written to the passive node.
pub fn record_message_sent(channel: &str, bytes: usize, duration: Duration) {
    counter!("ha_replication_messages_sent_total", "channel" => channel.to_string()).increment(1);
    histogram!("ha_replication_message_bytes", "channel" => channel.to_string()).record(bytes as f64);
    histogram!("ha_replication_send_duration_seconds", "channel" => channel.to_string())
        .record(duration.as_secs_f64());
}

/// Record a swallowed replication error by kind.
pub fn record_replication_error(source: &str, kind: &str) {
    counter!(
        "ha_replication_errors_total",
        "source" => source.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an attempt skipped because the backoff policy is suppressed.
pub fn record_attempt_suppressed(source: &str) {
    counter!("ha_replication_attempts_suppressed_total", "source" => source.to_string()).increment(1);
}

/// Record a backoff state transition ("open" / "suppressed").
pub fn record_backoff_transition(source: &str, state: &str) {
    counter!(
        "ha_replication_backoff_transitions_total",
        "source" => source.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a connection pool borrow outcome ("reused", "created", "exhausted", "failed").
pub fn record_pool_borrow(key: &str, outcome: &str) {
    counter!(
        "ha_replication_pool_borrows_total",
        "key" => key.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Gauge for idle connections held for a pool key.
pub fn set_pool_idle(key: &str, idle: usize) {
    gauge!("ha_replication_pool_idle_connections", "key" => key.to_string()).set(idle as f64);
}

/// Set the role gauge for a source (1 = active, 0 = passive).
pub fn set_source_role(source: &str, role: &str) {
    let value = match role {
        "active" => 1.0,
        "passive" => 0.0,
        _ => -1.0,
    };
    gauge!("ha_replication_source_role", "source" => source.to_string()).set(value);
}

/// Set the last processed event timestamp for a source.
pub fn set_checkpoint_timestamp(source: &str, timestamp: i64) {
    gauge!("ha_replication_checkpoint_timestamp_ms", "source" => source.to_string()).set(timestamp as f64);
}

/// Record events forwarded to local processing.
pub fn record_events_forwarded(source: &str, count: usize) {
    counter!("ha_replication_events_forwarded_total", "source" => source.to_string())
        .increment(count as u64);
}

/// Record a replicated message received on the passive side.
pub fn record_message_received(events: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("ha_replication_messages_received_total", "status" => status).increment(1);
    if success {
        counter!("ha_replication_events_received_total").increment(events as u64);
    }
}
