//! Refusal-aware backoff for replication attempts.
//!
//! # States
//!
//! ```text
//!            refusal (records timestamp)
//!   Open ─────────────────────────────────▶ Suppressed
//!    ▲                                         │
//!    │  now - last_refusal >= cooldown         │
//!    │  (checked lazily on next attempt)       │
//!    └─────────────────────────────────────────┘
//!    ▲
//!    └── reopen() on replication target (re)attached
//! ```
//!
//! There is no timer: staleness is only checked on the natural call path,
//! at the start of the next attempt. Failures other than a refusal never
//! change the state.

use crate::metrics;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default suppression window after a refused connection.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(5000);

/// Source of wall-clock milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

/// Clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        epoch_millis()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Snapshot of the backoff fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    pub is_suppressed: bool,
    /// Epoch millis of the refusal that suppressed attempts, -1 if never refused.
    pub last_refusal_timestamp_ms: i64,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self {
            is_suppressed: false,
            last_refusal_timestamp_ms: -1,
        }
    }
}

/// Per-source-handler backoff policy.
pub struct ReplicationBackoff {
    name: String,
    state: Mutex<BackoffState>,
    cooldown_ms: i64,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ReplicationBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationBackoff")
            .field("name", &self.name)
            .field("cooldown_ms", &self.cooldown_ms)
            .finish()
    }
}

impl ReplicationBackoff {
    /// Create a policy in the Open state.
    ///
    /// `name` identifies the owning source handler in logs and metrics.
    pub fn new(name: impl Into<String>, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(BackoffState::default()),
            cooldown_ms: duration_millis(cooldown),
            clock,
        }
    }

    /// Decide whether a replication attempt may proceed.
    ///
    /// Reopens the policy if the cooldown since the last refusal has elapsed.
    pub async fn try_begin_attempt(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.is_suppressed {
            return true;
        }

        let now = self.clock.now_millis();
        if now.saturating_sub(state.last_refusal_timestamp_ms) >= self.cooldown_ms {
            state.is_suppressed = false;
            debug!(source = %self.name, "Replication backoff window elapsed, retrying passive node");
            metrics::record_backoff_transition(&self.name, "open");
            return true;
        }

        metrics::record_attempt_suppressed(&self.name);
        false
    }

    /// Record that the passive node refused a connection.
    ///
    /// Only the first refusal while Open records a timestamp; refusals from
    /// attempts already racing while suppressed do not extend the window.
    pub async fn record_refusal(&self, reason: &str) {
        let mut state = self.state.lock().await;
        if state.is_suppressed {
            return;
        }

        state.is_suppressed = true;
        state.last_refusal_timestamp_ms = self.clock.now_millis();
        warn!(
            source = %self.name,
            cooldown_ms = self.cooldown_ms,
            reason,
            "Passive node refused connection, event syncing will retry after cooldown"
        );
        metrics::record_backoff_transition(&self.name, "suppressed");
    }

    /// Force the policy back to Open regardless of elapsed time.
    pub async fn reopen(&self) {
        let mut state = self.state.lock().await;
        if state.is_suppressed {
            state.is_suppressed = false;
            metrics::record_backoff_transition(&self.name, "open");
        }
    }

    /// Whether attempts are currently suppressed (without lazy reopening).
    pub async fn is_suppressed(&self) -> bool {
        self.state.lock().await.is_suppressed
    }

    /// Copy of the current state.
    pub async fn state(&self) -> BackoffState {
        *self.state.lock().await
    }

    /// Configured cooldown.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms.unsigned_abs())
    }
}

/// Whole milliseconds in `d`, saturating at `i64::MAX`.
fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Get current epoch milliseconds.
pub(crate) fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
