//! Process-wide sequence numbers for replicated events.
//!
//! One [`SequenceGenerator`] is created at startup and handed to every
//! source handler through an `Arc`. The passive node uses the numbers to
//! globally order replicated events regardless of which handler or app
//! produced them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter shared across all source handlers of a process.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: AtomicU64,
}

impl SequenceGenerator {
    /// Create a generator whose first issued value is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose next issued value is `last + 1`.
    pub fn starting_at(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Issue the next sequence number.
    ///
    /// Strictly greater than every value previously returned by this generator.
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The last issued value (0 if none).
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}
