// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Role-gated source handler.
//!
//! One [`SourceHandler`] sits between each input source and local
//! processing. On the active node it records checkpoint progress, mirrors
//! every accepted event to the passive node, and forwards the event to
//! local processing. On the passive node it drops events.
//!
//! # Event Path
//!
//! ```text
//! on_single_event / on_event_batch
//!        │
//!        ▼
//!   role == Passive? ──yes──▶ drop
//!        │ no
//!        ▼
//!   checkpoint.update(timestamp)
//!        │
//!        ▼
//!   replication enabled? ──no──────────────────────────┐
//!        │ yes                                         │
//!        ▼                                             │
//!   backoff open? ──no─────────────────────────────────┤
//!        │ yes                                         │
//!        ▼                                             │
//!   borrow ─▶ sequence + encode ─▶ send ─▶ release     │
//!        │ (errors logged and swallowed)               │
//!        ▼                                             ▼
//!   InputHandler::send / send_batch  ◀─────────────────┘
//! ```
//!
//! # Failure Isolation
//!
//! Replication is best effort. Encoding, pool, and transport failures are
//! logged and counted but never returned to the caller; the event is still
//! forwarded. Only a refused connection suppresses further attempts, for
//! the backoff cooldown (see [`crate::backoff`]).
//!
//! # Ordering
//!
//! Sequence numbers are taken from the shared generator when the message is
//! built, i.e. in the order attempts are made. Delivery order over the
//! transport is not guaranteed; receivers sort on `sequence_id` if they need
//! global order.

use crate::backoff::{Clock, ReplicationBackoff, SystemClock};
use crate::checkpoint::{CheckpointSnapshot, CheckpointState};
use crate::codec;
use crate::config::ReplicationSettings;
use crate::error::{ReplicationError, Result};
use crate::event::{Event, QueuedEvent};
use crate::metrics;
use crate::pool::{BoxFuture, ConnectionPool, PeerConnection, RedisPeerPool};
use crate::sequence::SequenceGenerator;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, trace};

/// Role of this node in the HA pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Performs real processing and replicates to the passive node.
    Active,
    /// Standby; receives the mirrored stream.
    Passive,
}

impl NodeRole {
    fn as_u8(self) -> u8 {
        match self {
            NodeRole::Active => 1,
            NodeRole::Passive => 0,
        }
    }

    fn from_u8(value: u8) -> Self {
        if value == 1 {
            NodeRole::Active
        } else {
            NodeRole::Passive
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Active => write!(f, "active"),
            NodeRole::Passive => write!(f, "passive"),
        }
    }
}

/// Local event processing, fed by the source handler on the active node.
///
/// Called exactly once per accepted event or batch, with the original payload.
pub trait InputHandler: Send + Sync + 'static {
    fn send(&self, event: Event) -> BoxFuture<'_, ()>;

    fn send_batch(&self, events: Vec<Event>) -> BoxFuture<'_, ()>;
}

/// Owner of an input source's replay cursor.
pub trait ResumeCursor: Send + Sync + 'static {
    /// Advance the replay point to the given transport resume markers.
    fn update(&self, markers: &[String]);
}

/// Dependencies shared by every source handler of a process.
pub struct ReplicationContext<P: ConnectionPool = RedisPeerPool> {
    pub sequence: Arc<SequenceGenerator>,
    pub pool: Arc<P>,
    pub settings: ReplicationSettings,
    pub clock: Arc<dyn Clock>,
}

impl<P: ConnectionPool> Clone for ReplicationContext<P> {
    fn clone(&self) -> Self {
        Self {
            sequence: Arc::clone(&self.sequence),
            pool: Arc::clone(&self.pool),
            settings: self.settings.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<P: ConnectionPool> ReplicationContext<P> {
    /// Context with a fresh sequence generator and the system clock.
    pub fn new(pool: Arc<P>, settings: ReplicationSettings) -> Self {
        Self {
            sequence: Arc::new(SequenceGenerator::new()),
            pool,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used by backoff policies.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Per-source role gate and replication driver.
pub struct SourceHandler<P: ConnectionPool = RedisPeerPool> {
    id: String,
    app_name: String,
    source_type: String,
    source_excluded: bool,
    role: AtomicU8,
    target_attached: AtomicBool,
    playback: AtomicBool,
    sequence: Arc<SequenceGenerator>,
    pool: Arc<P>,
    pool_key: String,
    channel_id: String,
    backoff: ReplicationBackoff,
    checkpoint: CheckpointState,
    input_handler: Arc<dyn InputHandler>,
    resume_cursor: RwLock<Option<Arc<dyn ResumeCursor>>>,
}

impl<P: ConnectionPool> SourceHandler<P> {
    /// Create a handler for one source of `app_name`.
    ///
    /// The handler starts Passive, with no replication target attached and
    /// a fresh checkpoint.
    pub fn new(
        id: impl Into<String>,
        app_name: impl Into<String>,
        source_type: impl Into<String>,
        context: &ReplicationContext<P>,
        input_handler: Arc<dyn InputHandler>,
    ) -> Self {
        let id = id.into();
        let source_type = source_type.into();
        let source_excluded = context.settings.is_ignored_source_type(&source_type);
        let backoff = ReplicationBackoff::new(
            id.clone(),
            context.settings.backoff_cooldown_duration(),
            Arc::clone(&context.clock),
        );

        Self {
            id,
            app_name: app_name.into(),
            source_type,
            source_excluded,
            role: AtomicU8::new(NodeRole::Passive.as_u8()),
            target_attached: AtomicBool::new(false),
            playback: AtomicBool::new(false),
            sequence: Arc::clone(&context.sequence),
            pool: Arc::clone(&context.pool),
            pool_key: context.settings.pool_key.clone(),
            channel_id: context.settings.channel_id.clone(),
            backoff,
            checkpoint: CheckpointState::new(),
            input_handler,
            resume_cursor: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn role(&self) -> NodeRole {
        NodeRole::from_u8(self.role.load(Ordering::Acquire))
    }

    pub fn is_replication_target_attached(&self) -> bool {
        self.target_attached.load(Ordering::Acquire)
    }

    pub fn is_playback(&self) -> bool {
        self.playback.load(Ordering::Acquire)
    }

    pub fn backoff(&self) -> &ReplicationBackoff {
        &self.backoff
    }

    pub fn checkpoint(&self) -> &CheckpointState {
        &self.checkpoint
    }

    // =========================================================================
    // Event path
    // =========================================================================

    /// Accept one event from the input source.
    ///
    /// Returns an error only if local processing fails; replication
    /// problems are never surfaced.
    pub async fn on_single_event(&self, event: Event, resume_markers: Option<Vec<String>>) -> Result<()> {
        let role = self.role();
        if role == NodeRole::Passive {
            trace!(source = %self.id, "Passive node, dropping event");
            return Ok(());
        }

        self.record_checkpoint(event.timestamp);

        if self.replication_enabled(role, false) {
            self.replicate(std::slice::from_ref(&event), resume_markers).await;
        }

        self.input_handler.send(event).await?;
        metrics::record_events_forwarded(&self.id, 1);
        Ok(())
    }

    /// Accept an ordered batch from the input source.
    ///
    /// The checkpoint takes the timestamp of the last event; replication
    /// sends the batch as one message. The playback flag is not consulted
    /// for batches.
    pub async fn on_event_batch(&self, events: Vec<Event>, resume_markers: Option<Vec<String>>) -> Result<()> {
        let role = self.role();
        if role == NodeRole::Passive {
            trace!(source = %self.id, count = events.len(), "Passive node, dropping batch");
            return Ok(());
        }

        let Some(last) = events.last() else {
            debug!(source = %self.id, "Ignoring empty batch");
            return Ok(());
        };
        self.record_checkpoint(last.timestamp);

        if self.replication_enabled(role, true) {
            self.replicate(&events, resume_markers).await;
        }

        let count = events.len();
        self.input_handler.send_batch(events).await?;
        metrics::record_events_forwarded(&self.id, count);
        Ok(())
    }

    fn record_checkpoint(&self, timestamp: i64) {
        self.checkpoint.update(timestamp);
        metrics::set_checkpoint_timestamp(&self.id, timestamp);
    }

    fn replication_enabled(&self, role: NodeRole, batch: bool) -> bool {
        role == NodeRole::Active
            && self.is_replication_target_attached()
            && !self.source_excluded
            && (batch || !self.is_playback())
    }

    /// One replication attempt: backoff gate, borrow, encode, send, release.
    #[instrument(skip_all, fields(source = %self.id, count = events.len()))]
    async fn replicate(&self, events: &[Event], resume_markers: Option<Vec<String>>) {
        if !self.backoff.try_begin_attempt().await {
            trace!("Passive node presumed unreachable, skipping replication");
            return;
        }

        let mut connection = match self.pool.borrow(&self.pool_key).await {
            Ok(connection) => connection,
            Err(e) => {
                self.handle_failure(e).await;
                return;
            }
        };

        match self.encode_and_send(&mut connection, events, resume_markers).await {
            Ok(()) => metrics::record_events_replicated(&self.id, events.len()),
            Err(e) => self.handle_failure(e).await,
        }

        if let Err(e) = self.pool.release(&self.pool_key, connection) {
            error!(error = %e, "Error returning passive node connection to the pool");
            metrics::record_replication_error(&self.id, e.kind());
        }
    }

    async fn encode_and_send(
        &self,
        connection: &mut P::Connection,
        events: &[Event],
        resume_markers: Option<Vec<String>>,
    ) -> Result<()> {
        let mut markers = resume_markers;
        let queued: Vec<QueuedEvent> = events
            .iter()
            .map(|event| QueuedEvent {
                app_name: self.app_name.clone(),
                source_handler_id: self.id.clone(),
                sequence_id: self.sequence.next(),
                event: event.clone(),
                // Only the first event describes where the batch originated
                resume_markers: markers.take(),
            })
            .collect();

        let payload = codec::encode(&queued)?;
        connection.send(&self.channel_id, &payload).await
    }

    async fn handle_failure(&self, e: ReplicationError) {
        metrics::record_replication_error(&self.id, e.kind());
        if e.is_connection_refused() {
            self.backoff.record_refusal(&e.to_string()).await;
            return;
        }
        match &e {
            ReplicationError::Encoding(_) => {
                error!(error = %e, "Error converting events to binary message, not sending to passive node");
            }
            ReplicationError::ConnectionUnavailable { .. } => {
                error!(error = %e, "Connection unavailable while sending events to passive node");
            }
            _ => {
                error!(error = %e, kind = e.kind(), "Error sending events to passive node, dropping them");
            }
        }
    }

    // =========================================================================
    // Role / attachment
    // =========================================================================

    /// Set the node role. Idempotent; never triggers replication.
    pub fn set_role(&self, role: NodeRole) {
        let previous = NodeRole::from_u8(self.role.swap(role.as_u8(), Ordering::AcqRel));
        if previous != role {
            debug!(source = %self.id, app = %self.app_name, from = %previous, to = %role, "Source handler role changed");
            metrics::set_source_role(&self.id, &role.to_string());
        }
    }

    pub fn set_as_active(&self) {
        self.set_role(NodeRole::Active);
    }

    pub fn set_as_passive(&self) {
        self.set_role(NodeRole::Passive);
    }

    /// Record whether a passive peer is currently known to exist.
    ///
    /// Attaching also reopens the backoff policy as an optimistic retry.
    pub async fn set_replication_target_attached(&self, attached: bool) {
        let previous = self.target_attached.swap(attached, Ordering::AcqRel);
        if attached {
            self.backoff.reopen().await;
        }
        if previous != attached {
            info!(source = %self.id, attached, "Replication target attachment changed");
        }
    }

    /// Enter or leave initial playback/recovery mode.
    pub fn set_playback(&self, playback: bool) {
        self.playback.store(playback, Ordering::Release);
    }

    // =========================================================================
    // Checkpoint / resume markers
    // =========================================================================

    pub fn snapshot(&self) -> CheckpointSnapshot {
        let snapshot = self.checkpoint.snapshot();
        debug!(
            source = %self.id,
            timestamp = snapshot.last_processed_event_timestamp,
            "Active node: saving source handler state"
        );
        snapshot
    }

    /// Accepts a snapshot but does not apply it.
    pub fn restore(&self, snapshot: &CheckpointSnapshot) {
        self.checkpoint.restore(snapshot);
        trace!(source = %self.id, "Ignoring checkpoint restore");
    }

    /// Attach the owner of this source's replay cursor.
    pub async fn set_resume_cursor(&self, cursor: Arc<dyn ResumeCursor>) {
        *self.resume_cursor.write().await = Some(cursor);
    }

    /// Forward updated resume markers to the replay cursor owner, if any.
    pub async fn notify_resume_markers_changed(&self, markers: &[String]) {
        match self.resume_cursor.read().await.as_ref() {
            Some(cursor) => cursor.update(markers),
            None => trace!(source = %self.id, "No resume cursor attached, ignoring markers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Vec<u8>>>,
        borrows: AtomicUsize,
        refuse: AtomicBool,
    }

    struct TestConn(Arc<Recorder>);

    impl PeerConnection for TestConn {
        fn send<'a>(&'a mut self, _channel_id: &'a str, payload: &'a [u8]) -> BoxFuture<'a, ()> {
            let recorder = Arc::clone(&self.0);
            Box::pin(async move {
                recorder.sent.lock().unwrap().push(payload.to_vec());
                Ok(())
            })
        }
    }

    struct TestPool(Arc<Recorder>);

    impl ConnectionPool for TestPool {
        type Connection = TestConn;

        fn borrow<'a>(&'a self, key: &'a str) -> BoxFuture<'a, TestConn> {
            Box::pin(async move {
                self.0.borrows.fetch_add(1, Ordering::SeqCst);
                if self.0.refuse.load(Ordering::SeqCst) {
                    return Err(ReplicationError::ConnectionRefused {
                        key: key.to_string(),
                        message: "Connection refused".to_string(),
                    });
                }
                Ok(TestConn(Arc::clone(&self.0)))
            })
        }

        fn release(&self, _key: &str, _connection: TestConn) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Processed(Mutex<Vec<Event>>);

    impl InputHandler for Processed {
        fn send(&self, event: Event) -> BoxFuture<'_, ()> {
            self.0.lock().unwrap().push(event);
            Box::pin(async { Ok(()) })
        }

        fn send_batch(&self, events: Vec<Event>) -> BoxFuture<'_, ()> {
            self.0.lock().unwrap().extend(events);
            Box::pin(async { Ok(()) })
        }
    }

    fn handler(source_type: &str) -> (SourceHandler<TestPool>, Arc<Recorder>, Arc<Processed>) {
        let recorder = Arc::new(Recorder::default());
        let processed = Arc::new(Processed::default());
        let context = ReplicationContext::new(Arc::new(TestPool(Arc::clone(&recorder))), ReplicationSettings::default())
            .with_clock(Arc::new(ManualClock::new(1_000)));
        let handler = SourceHandler::new("src-1", "StockApp", source_type, &context, processed.clone());
        (handler, recorder, processed)
    }

    fn event(ts: i64) -> Event {
        Event::new(ts, vec!["WSO2".into(), 55.6f64.into()])
    }

    #[tokio::test]
    async fn test_new_handler_is_passive_and_detached() {
        let (handler, _, _) = handler("kafka");
        assert_eq!(handler.role(), NodeRole::Passive);
        assert!(!handler.is_replication_target_attached());
        assert!(!handler.is_playback());
        assert_eq!(handler.snapshot().last_processed_event_timestamp, 0);
    }

    #[tokio::test]
    async fn test_passive_drops_events() {
        let (handler, recorder, processed) = handler("kafka");
        handler.set_replication_target_attached(true).await;

        handler.on_single_event(event(100), None).await.unwrap();
        handler.on_event_batch(vec![event(200)], None).await.unwrap();

        assert!(processed.0.lock().unwrap().is_empty());
        assert_eq!(recorder.borrows.load(Ordering::SeqCst), 0);
        assert_eq!(handler.snapshot().last_processed_event_timestamp, 0);
    }

    #[tokio::test]
    async fn test_active_without_target_forwards_only() {
        let (handler, recorder, processed) = handler("kafka");
        handler.set_as_active();

        handler.on_single_event(event(100), None).await.unwrap();

        assert_eq!(processed.0.lock().unwrap().len(), 1);
        assert_eq!(recorder.borrows.load(Ordering::SeqCst), 0);
        assert_eq!(handler.snapshot().last_processed_event_timestamp, 100);
    }

    #[tokio::test]
    async fn test_active_with_target_replicates() {
        let (handler, recorder, processed) = handler("kafka");
        handler.set_as_active();
        handler.set_replication_target_attached(true).await;

        handler.on_single_event(event(100), Some(vec!["offset:1".into()])).await.unwrap();

        let sent = recorder.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let decoded = codec::decode(&sent[0]).unwrap();
        assert_eq!(decoded[0].app_name, "StockApp");
        assert_eq!(decoded[0].source_handler_id, "src-1");
        assert_eq!(decoded[0].sequence_id, 1);
        assert_eq!(decoded[0].resume_markers, Some(vec!["offset:1".to_string()]));
        assert_eq!(processed.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_source_is_never_replicated() {
        let (handler, recorder, processed) = handler("InMemory");
        handler.set_as_active();
        handler.set_replication_target_attached(true).await;

        handler.on_single_event(event(1), None).await.unwrap();
        handler.on_event_batch(vec![event(2), event(3)], None).await.unwrap();

        assert_eq!(recorder.borrows.load(Ordering::SeqCst), 0);
        assert_eq!(processed.0.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_playback_gates_single_events_but_not_batches() {
        let (handler, recorder, _) = handler("kafka");
        handler.set_as_active();
        handler.set_replication_target_attached(true).await;
        handler.set_playback(true);

        handler.on_single_event(event(1), None).await.unwrap();
        assert_eq!(recorder.borrows.load(Ordering::SeqCst), 0);

        handler.on_event_batch(vec![event(2)], None).await.unwrap();
        assert_eq!(recorder.borrows.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_ignored() {
        let (handler, recorder, processed) = handler("kafka");
        handler.set_as_active();
        handler.set_replication_target_attached(true).await;

        handler.on_event_batch(Vec::new(), None).await.unwrap();

        assert_eq!(recorder.borrows.load(Ordering::SeqCst), 0);
        assert!(processed.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refusal_suppresses_and_attach_reopens() {
        let (handler, recorder, processed) = handler("kafka");
        handler.set_as_active();
        handler.set_replication_target_attached(true).await;
        recorder.refuse.store(true, Ordering::SeqCst);

        handler.on_single_event(event(1), None).await.unwrap();
        assert!(handler.backoff().is_suppressed().await);

        handler.on_single_event(event(2), None).await.unwrap();
        assert_eq!(recorder.borrows.load(Ordering::SeqCst), 1);

        handler.set_replication_target_attached(true).await;
        assert!(!handler.backoff().is_suppressed().await);
        assert_eq!(processed.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_set_role_is_idempotent() {
        let (handler, recorder, _) = handler("kafka");
        handler.set_replication_target_attached(true).await;
        handler.set_as_active();
        handler.set_as_active();
        assert_eq!(handler.role(), NodeRole::Active);
        handler.set_as_passive();
        handler.set_as_passive();
        assert_eq!(handler.role(), NodeRole::Passive);
        assert_eq!(recorder.borrows.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resume_markers_forwarded_to_cursor() {
        #[derive(Default)]
        struct Cursor(Mutex<Vec<Vec<String>>>);
        impl ResumeCursor for Cursor {
            fn update(&self, markers: &[String]) {
                self.0.lock().unwrap().push(markers.to_vec());
            }
        }

        let (handler, _, _) = handler("kafka");
        // No cursor yet: ignored
        handler.notify_resume_markers_changed(&["m0".to_string()]).await;

        let cursor = Arc::new(Cursor::default());
        handler.set_resume_cursor(cursor.clone()).await;
        handler.notify_resume_markers_changed(&["m1".to_string()]).await;

        assert_eq!(*cursor.0.lock().unwrap(), vec![vec!["m1".to_string()]]);
    }

    #[test]
    fn test_node_role_display() {
        assert_eq!(NodeRole::Active.to_string(), "active");
        assert_eq!(NodeRole::Passive.to_string(), "passive");
        assert_eq!(NodeRole::from_u8(NodeRole::Active.as_u8()), NodeRole::Active);
    }
}
