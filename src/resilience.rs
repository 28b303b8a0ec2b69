//! Concurrency limiting for the passive-node transport.
//!
//! [`Bulkhead`] caps how many connections may be borrowed from one pool key
//! at the same time, so a slow passive node cannot make the active node pile
//! up sockets.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), ha_event_replication::resilience::BulkheadFull> {
//! use ha_event_replication::resilience::Bulkhead;
//! use std::time::Duration;
//!
//! let bulkhead = Bulkhead::new(8);
//! let _permit = bulkhead.acquire_timeout(Duration::from_millis(100)).await?;
//! // permit dropped = slot released
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error when the bulkhead is full.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead full: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

/// Limits concurrent operations with a semaphore.
///
/// When the bulkhead is full, new operations wait up to a timeout.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a new bulkhead with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Acquire a permit, waiting if necessary.
    ///
    /// Fails only if the bulkhead was closed.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.full())
    }

    /// Acquire a permit, giving up after `wait`.
    pub async fn acquire_timeout(&self, wait: Duration) -> Result<OwnedSemaphorePermit, BulkheadFull> {
        match tokio::time::timeout(wait, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(self.full()),
        }
    }

    /// Stop handing out permits; pending and future acquires fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Get the number of available permits.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn full(&self) -> BulkheadFull {
        BulkheadFull {
            max_concurrent: self.max_concurrent,
        }
    }
}
