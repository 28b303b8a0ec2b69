//! Recording connection pool and collaborators for testing.
//!
//! [`MockPool`] records every borrow, release, and sent payload, and can be
//! told to fail at any step of the replication path. [`RecordingInputHandler`]
//! and [`RecordingCursor`] record what the source handler hands downstream.

use ha_event_replication::codec;
use ha_event_replication::pool::{BoxFuture, ConnectionPool, PeerConnection};
use ha_event_replication::{Event, InputHandler, QueuedEvent, ReplicationError, Result, ResumeCursor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Where the mock pool should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    /// `borrow` fails with `ConnectionRefused`.
    BorrowRefused,
    /// `borrow` fails with `PoolExhausted`.
    BorrowExhausted,
    /// `borrow` fails with a non-refusal `Connect`.
    BorrowConnect,
    /// `send` fails with `ConnectionUnavailable`.
    SendUnavailable,
    /// `send` fails with `ConnectionRefused`.
    SendRefused,
    /// `release` fails with `PoolReturn`.
    Release,
}

/// A payload written to the mock passive node.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel_id: String,
    pub payload: Vec<u8>,
}

impl SentMessage {
    pub fn decode(&self) -> Vec<QueuedEvent> {
        codec::decode(&self.payload).expect("mock pool received an undecodable payload")
    }
}

#[derive(Default)]
struct Shared {
    sent: Mutex<Vec<SentMessage>>,
    send_delay: Mutex<Option<Duration>>,
}

/// Mock pool that records every call.
///
/// # Example
/// ```rust,ignore
/// let pool = MockPool::new();
/// pool.fail_with(Failure::BorrowRefused);
///
/// // drive a source handler...
///
/// assert_eq!(pool.borrow_count(), 1);
/// assert!(pool.sent().is_empty());
/// ```
pub struct MockPool {
    shared: Arc<Shared>,
    failure: Mutex<Failure>,
    borrows: AtomicUsize,
    releases: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl MockPool {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            failure: Mutex::new(Failure::None),
            borrows: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }

    /// Start failing at the given step. `Failure::None` heals the pool.
    pub fn fail_with(&self, failure: Failure) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Delay every send, to widen race windows in concurrency tests.
    pub fn set_send_delay(&self, delay: Duration) {
        *self.shared.send_delay.lock().unwrap() = Some(delay);
    }

    fn failure(&self) -> Failure {
        *self.failure.lock().unwrap()
    }

    pub fn borrow_count(&self) -> usize {
        self.borrows.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Pool keys borrowed under, in call order.
    pub fn borrowed_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.shared.sent.lock().unwrap().clone()
    }

    /// Every replicated event across all sent messages, in send order.
    pub fn replicated_events(&self) -> Vec<QueuedEvent> {
        self.sent().iter().flat_map(|m| m.decode()).collect()
    }
}

impl Default for MockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool for MockPool {
    type Connection = MockConnection;

    fn borrow<'a>(&'a self, key: &'a str) -> BoxFuture<'a, MockConnection> {
        Box::pin(async move {
            self.borrows.fetch_add(1, Ordering::SeqCst);
            self.keys.lock().unwrap().push(key.to_string());

            match self.failure() {
                Failure::BorrowRefused => Err(ReplicationError::ConnectionRefused {
                    key: key.to_string(),
                    message: "Connection refused".to_string(),
                }),
                Failure::BorrowExhausted => Err(ReplicationError::PoolExhausted {
                    key: key.to_string(),
                }),
                Failure::BorrowConnect => {
                    Err(ReplicationError::connect_msg(key, "connection reset by peer"))
                }
                failure => Ok(MockConnection {
                    shared: Arc::clone(&self.shared),
                    failure,
                }),
            }
        })
    }

    fn release(&self, key: &str, _connection: MockConnection) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.failure() == Failure::Release {
            return Err(ReplicationError::PoolReturn {
                key: key.to_string(),
                message: "pool rejected the connection".to_string(),
            });
        }
        Ok(())
    }
}

/// Connection handed out by [`MockPool`].
pub struct MockConnection {
    shared: Arc<Shared>,
    failure: Failure,
}

impl PeerConnection for MockConnection {
    fn send<'a>(&'a mut self, channel_id: &'a str, payload: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let delay = *self.shared.send_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match self.failure {
                Failure::SendUnavailable => Err(ReplicationError::ConnectionUnavailable {
                    channel: channel_id.to_string(),
                    message: "broken pipe".to_string(),
                }),
                Failure::SendRefused => Err(ReplicationError::ConnectionRefused {
                    key: "ActiveNode".to_string(),
                    message: "Connection refused".to_string(),
                }),
                _ => {
                    self.shared.sent.lock().unwrap().push(SentMessage {
                        channel_id: channel_id.to_string(),
                        payload: payload.to_vec(),
                    });
                    Ok(())
                }
            }
        })
    }
}

/// One call into local processing.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Single(Event),
    Batch(Vec<Event>),
}

/// Input handler that records deliveries, optionally failing them.
pub struct RecordingInputHandler {
    deliveries: Mutex<Vec<Delivery>>,
    failing: Mutex<bool>,
}

impl RecordingInputHandler {
    pub fn new() -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Timestamps of every delivered event, flattened in delivery order.
    pub fn timestamps(&self) -> Vec<i64> {
        self.deliveries()
            .into_iter()
            .flat_map(|d| match d {
                Delivery::Single(e) => vec![e.timestamp],
                Delivery::Batch(events) => events.into_iter().map(|e| e.timestamp).collect(),
            })
            .collect()
    }

    fn record(&self, delivery: Delivery) -> Result<()> {
        if *self.failing.lock().unwrap() {
            return Err(ReplicationError::Processing("downstream rejected event".to_string()));
        }
        self.deliveries.lock().unwrap().push(delivery);
        Ok(())
    }
}

impl Default for RecordingInputHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHandler for RecordingInputHandler {
    fn send(&self, event: Event) -> BoxFuture<'_, ()> {
        let result = self.record(Delivery::Single(event));
        Box::pin(async move { result })
    }

    fn send_batch(&self, events: Vec<Event>) -> BoxFuture<'_, ()> {
        let result = self.record(Delivery::Batch(events));
        Box::pin(async move { result })
    }
}

/// Resume cursor that records every marker update.
#[derive(Default)]
pub struct RecordingCursor {
    updates: Mutex<Vec<Vec<String>>>,
}

impl RecordingCursor {
    pub fn updates(&self) -> Vec<Vec<String>> {
        self.updates.lock().unwrap().clone()
    }
}

impl ResumeCursor for RecordingCursor {
    fn update(&self, markers: &[String]) {
        self.updates.lock().unwrap().push(markers.to_vec());
    }
}
