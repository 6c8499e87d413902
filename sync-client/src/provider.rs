//! SyncProvider - binds a CRDT document to one document log on the relay.
//!
//! The provider lifecycle is the pure state machine from sync-core. This
//! module owns the I/O: a driver task interprets the machine's actions
//! against a [`LogTransport`], a [`CryptoPipeline`] and a [`CrdtDocument`].
//!
//! ```text
//! local edits ─▶ seal ─▶ outbound queue ─▶ add_update ─▶ relay
//!                                                         │
//! document ◀─ apply ◀─ dedup ◀─ unseal ◀─ subscription ◀──┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sealed_sync_client::{CryptoConfig, EncryptionKey, MemoryDocument, MockTransport};
//! use sealed_sync_client::{ProviderConfig, SyncProvider};
//! use sealed_sync_types::DocId;
//!
//! let provider = SyncProvider::spawn(
//!     MockTransport::new(),
//!     MemoryDocument::new(1),
//!     CryptoConfig::new(EncryptionKey::random()),
//!     ProviderConfig::new(DocId::new("notes")).with_merge_initial_state(true),
//! )?;
//! provider.wait_for_live().await?;
//! provider.document().lock().await.insert("title", "hello");
//! provider.disconnect().await;
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use sealed_sync_core::{
    Action, Event, NackOutcome, OutboundQueue, ProviderEvent, ProviderState, QueuedUpdate,
    ReconnectBackoff, RowTracker, SeenUpdates, SnapshotPolicy, TaggedUpdate,
};
use sealed_sync_types::{ClientMessage, DocId, LogEntry, RowId, UpdateId};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::document::{CrdtDocument, DocumentError};
use crate::error::PipelineError;
use crate::pipeline::{CryptoConfig, CryptoPipeline};
use crate::transport::{LinkStatus, LogTransport, SubscriptionId, TransportError};

/// Capacity of the provider event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Provider errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Configuration rejected before starting.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Sealing or unsealing failed.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Transport request failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Document rejected an update.
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// The initial connect failed; create a new provider to retry.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The provider was disconnected.
    #[error("provider closed")]
    Closed,
}

/// Configuration for a [`SyncProvider`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Remote document to bind to.
    pub doc_id: DocId,
    /// Push local-only state upward after the first hydration.
    pub merge_initial_state: bool,
    /// When to compact the log.
    pub snapshot: SnapshotPolicy,
    /// Attempts per local update before it is dropped.
    pub max_append_attempts: u32,
    /// Delay between append retries.
    pub retry_interval: Duration,
    /// Maximum number of local updates waiting to be appended.
    pub outbound_capacity: usize,
    /// Number of recent update ids remembered for deduplication.
    pub seen_window: usize,
    /// Delays between reconnect attempts.
    pub reconnect: ReconnectBackoff,
}

impl ProviderConfig {
    /// Create a configuration for `doc_id` with default settings.
    pub fn new(doc_id: DocId) -> Self {
        Self {
            doc_id,
            merge_initial_state: false,
            snapshot: SnapshotPolicy::default(),
            max_append_attempts: 5,
            retry_interval: Duration::from_secs(2),
            outbound_capacity: 1_000,
            seen_window: 4_096,
            reconnect: ReconnectBackoff::default(),
        }
    }

    /// Push local-only state upward after the first hydration.
    pub fn with_merge_initial_state(mut self, merge: bool) -> Self {
        self.merge_initial_state = merge;
        self
    }

    /// Set the snapshot policy.
    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot = policy;
        self
    }

    /// Set append retry attempts and the delay between them.
    pub fn with_append_retry(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_append_attempts = max_attempts;
        self.retry_interval = interval;
        self
    }

    /// Set the outbound queue capacity.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Set the deduplication window.
    pub fn with_seen_window(mut self, window: usize) -> Self {
        self.seen_window = window;
        self
    }

    /// Set the reconnect backoff.
    pub fn with_reconnect_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.reconnect = backoff;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ProviderError> {
        let invalid = |reason: &str| Err(ProviderError::InvalidConfig(reason.to_string()));
        if self.doc_id.is_empty() {
            return invalid("document id is empty");
        }
        if self.snapshot.check_interval.is_zero() {
            return invalid("snapshot check interval is zero");
        }
        if self.retry_interval.is_zero() {
            return invalid("append retry interval is zero");
        }
        if self.max_append_attempts == 0 {
            return invalid("max append attempts is zero");
        }
        if self.outbound_capacity == 0 {
            return invalid("outbound capacity is zero");
        }
        Ok(())
    }
}

/// Progress of one provider against its document log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSession {
    /// Highest row reflected in the local document.
    pub highest_row_id_seen: RowId,
    /// Highest row replaced by this client's last snapshot.
    pub last_snapshot_row_id: RowId,
    /// Rows seen since that snapshot.
    pub updates_since_snapshot: u32,
    /// Local updates waiting to be appended.
    pub queued_updates: usize,
}

/// State shared between the handle and the driver task.
struct Shared<T> {
    transport: T,
    state: watch::Sender<ProviderState>,
    session: watch::Sender<SyncSession>,
    events: broadcast::Sender<ProviderEvent>,
    subscription: StdMutex<Option<SubscriptionId>>,
}

impl<T: LogTransport> Shared<T> {
    fn emit(&self, event: ProviderEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn set_subscription(&self, id: SubscriptionId) {
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(id);
        if let Some(previous) = previous {
            self.transport.unsubscribe(previous);
        }
    }

    fn unsubscribe(&self) {
        let id = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.transport.unsubscribe(id);
        }
    }
}

/// Keeps a [`CrdtDocument`] in sync with one document log.
///
/// Dropping the provider stops the driver task without telling the relay;
/// call [`SyncProvider::disconnect`] for an orderly shutdown.
pub struct SyncProvider<T: LogTransport, D: CrdtDocument> {
    doc_id: DocId,
    shared: Arc<Shared<T>>,
    document: Arc<Mutex<D>>,
    pipeline: Arc<CryptoPipeline>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl<T: LogTransport, D: CrdtDocument> SyncProvider<T, D> {
    /// Start syncing `document` with the log `config.doc_id`.
    ///
    /// Must be called from within a tokio runtime. Connection failures are
    /// reported through [`SyncProvider::wait_for_live`] and events, not here.
    pub fn spawn(
        transport: T,
        document: D,
        crypto: CryptoConfig,
        config: ProviderConfig,
    ) -> Result<Self, ProviderError> {
        let pipeline = Arc::new(CryptoPipeline::new(crypto)?);
        Self::spawn_with_pipeline(transport, document, pipeline, config)
    }

    /// Like [`SyncProvider::spawn`], sharing an existing pipeline.
    pub fn spawn_with_pipeline(
        transport: T,
        mut document: D,
        pipeline: Arc<CryptoPipeline>,
        config: ProviderConfig,
    ) -> Result<Self, ProviderError> {
        config.validate()?;

        let local_rx = document.subscribe_local_updates();
        let link_rx = transport.link_status();
        let (state, _) = watch::channel(ProviderState::new());
        let (session, _) = watch::channel(SyncSession::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            transport,
            state,
            session,
            events,
            subscription: StdMutex::new(None),
        });
        let document = Arc::new(Mutex::new(document));

        let mut retry_timer = tokio::time::interval(config.retry_interval);
        retry_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let driver = Driver {
            shared: Arc::clone(&shared),
            document: Arc::clone(&document),
            pipeline: Arc::clone(&pipeline),
            state: ProviderState::new(),
            local_rx,
            remote_rx: None,
            link_rx,
            link_open: true,
            tracker: RowTracker::new(),
            seen: SeenUpdates::new(config.seen_window),
            rejected: HashSet::new(),
            outbound: OutboundQueue::new(config.outbound_capacity, config.max_append_attempts),
            snapshot_threshold: config.snapshot.draw_threshold(),
            snapshot_timer: None,
            retry_timer,
            reconnect_at: None,
            config: config.clone(),
        };

        tracing::info!(doc = %config.doc_id, "starting sync provider");
        let task = tokio::spawn(driver.run());

        Ok(Self {
            doc_id: config.doc_id,
            shared,
            document,
            pipeline,
            task: StdMutex::new(Some(task)),
        })
    }

    /// Document id this provider is bound to.
    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProviderState {
        self.shared.state.borrow().clone()
    }

    /// Watch lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<ProviderState> {
        self.shared.state.subscribe()
    }

    /// Receive provider events from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.shared.events.subscribe()
    }

    /// Current session progress.
    pub fn session(&self) -> SyncSession {
        *self.shared.session.borrow()
    }

    /// Watch session progress.
    pub fn watch_session(&self) -> watch::Receiver<SyncSession> {
        self.shared.session.subscribe()
    }

    /// The synced document. Edits made through it are sent to the relay.
    pub fn document(&self) -> Arc<Mutex<D>> {
        Arc::clone(&self.document)
    }

    /// The pipeline sealing this provider's updates.
    pub fn pipeline(&self) -> &Arc<CryptoPipeline> {
        &self.pipeline
    }

    /// Replace the crypto configuration, e.g. to rotate keys.
    ///
    /// Updates already sealed keep the configuration they were sealed with.
    pub fn change_config(&self, config: CryptoConfig) -> Result<(), ProviderError> {
        self.pipeline.change_config(config)?;
        tracing::info!(doc = %self.doc_id, "crypto config changed");
        Ok(())
    }

    /// Wait until the provider is live.
    ///
    /// Fails if the initial connect fails or the provider is closed first.
    pub async fn wait_for_live(&self) -> Result<(), ProviderError> {
        let mut state_rx = self.shared.state.subscribe();
        loop {
            let state = state_rx.borrow_and_update().clone();
            match state {
                ProviderState::Live => return Ok(()),
                ProviderState::ConnectFailed { error } => {
                    return Err(ProviderError::ConnectFailed(error))
                }
                ProviderState::Closed => return Err(ProviderError::Closed),
                _ => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(ProviderError::Closed);
            }
        }
    }

    /// Stop syncing.
    ///
    /// Safe in any state. Any request still in flight is abandoned and its
    /// result discarded. Once this returns, no remote update reaches the
    /// document and no local edit is sent.
    pub async fn disconnect(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            // Cancellation is the expected outcome
            let _ = task.await;
        }

        let state = self.shared.state.borrow().clone();
        let (next, actions) = state.on_event(Event::DisconnectRequested);
        for action in actions {
            match action {
                Action::Unsubscribe => self.shared.unsubscribe(),
                Action::Disconnect => {
                    if let Err(err) = self.shared.transport.disconnect().await {
                        tracing::warn!(doc = %self.doc_id, error = %err, "transport disconnect failed");
                    }
                }
                Action::EmitEvent(event) => self.shared.emit(event),
                // Timers died with the driver task
                _ => {}
            }
        }
        // The subscription may have been opened while hydration was cut short
        self.shared.unsubscribe();
        self.shared.state.send_replace(next);
        tracing::info!(doc = %self.doc_id, "sync provider disconnected");
    }
}

impl<T: LogTransport, D: CrdtDocument> Drop for SyncProvider<T, D> {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// The driver task: owns all mutable sync state.
struct Driver<T: LogTransport, D: CrdtDocument> {
    shared: Arc<Shared<T>>,
    document: Arc<Mutex<D>>,
    pipeline: Arc<CryptoPipeline>,
    config: ProviderConfig,
    state: ProviderState,
    local_rx: mpsc::UnboundedReceiver<ClientMessage>,
    remote_rx: Option<mpsc::UnboundedReceiver<LogEntry>>,
    link_rx: watch::Receiver<LinkStatus>,
    link_open: bool,
    tracker: RowTracker,
    seen: SeenUpdates,
    rejected: HashSet<UpdateId>,
    outbound: OutboundQueue,
    snapshot_threshold: u32,
    snapshot_timer: Option<Interval>,
    retry_timer: Interval,
    reconnect_at: Option<Instant>,
}

impl<T: LogTransport, D: CrdtDocument> Driver<T, D> {
    async fn run(mut self) {
        self.dispatch(Event::StartRequested {
            merge_initial_state: self.config.merge_initial_state,
        })
        .await;

        while !self.state.is_terminal() {
            let retry_due = self.state.is_live() && !self.outbound.is_empty();
            tokio::select! {
                Some(first) = self.local_rx.recv() => self.on_local(first).await,
                row = next_row(&mut self.remote_rx), if self.remote_rx.is_some() => match row {
                    Some(entry) => self.on_remote(entry).await,
                    None => {
                        self.remote_rx = None;
                        self.dispatch(Event::ConnectionLost {
                            reason: "subscription closed".into(),
                        })
                        .await;
                    }
                },
                _ = tick(&mut self.snapshot_timer), if self.snapshot_timer.is_some() => {
                    self.maybe_snapshot().await;
                }
                _ = self.retry_timer.tick(), if retry_due => self.flush_outbound().await,
                _ = sleep_until(self.reconnect_at), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.dispatch(Event::ReconnectTimer).await;
                }
                changed = self.link_rx.changed(), if self.link_open => match changed {
                    Ok(()) => {
                        let status = *self.link_rx.borrow_and_update();
                        if status == LinkStatus::Down && self.state.is_connected() {
                            self.dispatch(Event::ConnectionLost {
                                reason: "link down".into(),
                            })
                            .await;
                        }
                    }
                    Err(_) => self.link_open = false,
                },
                else => break,
            }
        }
        tracing::debug!(doc = %self.config.doc_id, state = self.state.name(), "driver stopped");
    }

    /// Feed an event to the state machine and execute the resulting actions,
    /// including any events those actions produce.
    async fn dispatch(&mut self, event: Event) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            let from = self.state.name();
            let (next, actions) = std::mem::take(&mut self.state).on_event(event);
            self.state = next;
            if from != self.state.name() {
                tracing::debug!(doc = %self.config.doc_id, from, to = self.state.name(), "provider state changed");
            }
            self.shared.state.send_replace(self.state.clone());

            for action in actions {
                if let Some(follow_up) = self.execute(action).await {
                    events.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Connect => match self.shared.transport.connect().await {
                Ok(()) => {
                    tracing::info!(doc = %self.config.doc_id, "connected to relay");
                    Some(Event::ConnectSucceeded)
                }
                Err(err) => {
                    tracing::warn!(doc = %self.config.doc_id, error = %err, "connect failed");
                    Some(Event::ConnectFailed {
                        error: err.to_string(),
                    })
                }
            },
            Action::Hydrate { merge } => match self.hydrate(merge).await {
                Ok(()) => Some(Event::HydrationCompleted),
                Err(err) => {
                    tracing::warn!(doc = %self.config.doc_id, error = %err, "hydration failed");
                    Some(Event::HydrationFailed {
                        error: err.to_string(),
                    })
                }
            },
            Action::StartSnapshotTimer => {
                let period = self.config.snapshot.check_interval;
                let mut timer = tokio::time::interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.snapshot_timer = Some(timer);
                None
            }
            Action::StopSnapshotTimer => {
                self.snapshot_timer = None;
                None
            }
            Action::FlushOutbound => {
                self.flush_outbound().await;
                None
            }
            Action::Unsubscribe => {
                self.remote_rx = None;
                self.shared.unsubscribe();
                // The reconnect merge pushes whatever these carried
                let discarded = self.outbound.clear();
                if discarded > 0 {
                    tracing::debug!(doc = %self.config.doc_id, discarded, "outbound queue cleared");
                }
                self.publish_session();
                None
            }
            Action::Disconnect => {
                if let Err(err) = self.shared.transport.disconnect().await {
                    tracing::warn!(doc = %self.config.doc_id, error = %err, "transport disconnect failed");
                }
                None
            }
            Action::ScheduleReconnect { attempt } => {
                let delay = self.config.reconnect.delay_for(attempt);
                tracing::info!(doc = %self.config.doc_id, attempt, ?delay, "reconnect scheduled");
                self.reconnect_at = Some(Instant::now() + delay);
                self.shared
                    .emit(ProviderEvent::ReconnectScheduled { attempt, delay });
                None
            }
            Action::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            Action::EmitEvent(event) => {
                self.shared.emit(event);
                None
            }
        }
    }

    /// Subscribe, fetch the whole log, apply what is new and optionally push
    /// the local diff.
    ///
    /// Subscribing first means no row committed during the fetch is missed;
    /// rows that show up in both are skipped by the tracker.
    async fn hydrate(&mut self, merge: bool) -> Result<(), ProviderError> {
        let doc_id = self.config.doc_id.clone();
        let subscription = self.shared.transport.subscribe(&doc_id).await?;
        self.shared.set_subscription(subscription.id);
        self.remote_rx = Some(subscription.updates);

        let rows = self.shared.transport.get_remote_update_list(&doc_id).await?;
        tracing::debug!(doc = %doc_id, rows = rows.len(), "fetched remote log");

        let mut opened = Vec::with_capacity(rows.len());
        for entry in rows {
            let is_new = self.tracker.observe(entry.row_id);
            match self.open_row(&entry) {
                Ok((update_id, messages)) => {
                    let fresh = is_new && self.seen.insert(update_id);
                    opened.push((entry.row_id, update_id, fresh, messages));
                }
                Err(err) if is_new => self.skip_row(entry.row_id, &err),
                Err(_) => {}
            }
        }

        let document = Arc::clone(&self.document);
        let mut document = document.lock().await;
        // Only content the document accepted counts as remote for the merge
        let mut remote = Vec::new();
        let mut applied = 0usize;
        for (row_id, update_id, fresh, messages) in opened {
            if fresh {
                if let Err(err) = document.apply_remote_updates(&messages) {
                    self.reject_row(row_id, update_id, &err);
                    continue;
                }
                applied += 1;
            } else if self.rejected.contains(&update_id) {
                continue;
            }
            remote.extend(messages);
        }
        let diff = if merge {
            match document.diff_against(&remote) {
                Ok(diff) => diff,
                Err(err) => {
                    tracing::warn!(doc = %doc_id, error = %err, "local diff not computed, merge skipped");
                    None
                }
            }
        } else {
            None
        };
        drop(document);
        tracing::debug!(doc = %doc_id, applied, "remote log applied");

        if let Some(diff) = diff {
            let update = self.seal(&[diff])?;
            tracing::debug!(doc = %doc_id, update = %update.update_id, "queued local diff");
            if let Err(err) = self.outbound.enqueue(update) {
                tracing::warn!(doc = %doc_id, error = %err, "local diff not queued");
            }
        }
        self.publish_session();
        Ok(())
    }

    /// Decode and unseal one log row.
    fn open_row(&self, entry: &LogEntry) -> Result<(UpdateId, Vec<ClientMessage>), PipelineError> {
        let tagged = TaggedUpdate::from_bytes(&entry.operation)?;
        let messages = self.pipeline.unseal(&tagged.sealed)?;
        Ok((tagged.update_id, messages))
    }

    fn skip_row(&mut self, row_id: RowId, err: &PipelineError) {
        self.tracker.mark_unreadable(row_id);
        let access_failure = err.is_access_failure();
        tracing::warn!(doc = %self.config.doc_id, row = %row_id, error = %err, access_failure, "skipping unreadable row");
        self.shared.emit(ProviderEvent::UpdateSkipped {
            row_id,
            reason: err.to_string(),
            access_failure,
        });
    }

    /// Record an update the document refused to apply.
    ///
    /// Its content is left out of later merge diffs.
    fn reject_row(&mut self, row_id: RowId, update_id: UpdateId, err: &DocumentError) {
        self.tracker.mark_unreadable(row_id);
        self.rejected.insert(update_id);
        tracing::warn!(doc = %self.config.doc_id, row = %row_id, error = %err, "document rejected update");
        self.shared.emit(ProviderEvent::UpdateSkipped {
            row_id,
            reason: err.to_string(),
            access_failure: false,
        });
    }

    /// Seal messages into a tagged update ready for the outbound queue.
    ///
    /// The id is recorded as seen so the echo of our own append is skipped.
    fn seal(&mut self, messages: &[ClientMessage]) -> Result<QueuedUpdate, PipelineError> {
        let tagged = TaggedUpdate::new(self.pipeline.seal(messages)?);
        let bytes = tagged.to_bytes()?;
        self.seen.insert(tagged.update_id);
        Ok(QueuedUpdate::new(tagged.update_id, bytes))
    }

    async fn on_local(&mut self, first: ClientMessage) {
        let mut batch = vec![first];
        while let Ok(next) = self.local_rx.try_recv() {
            batch.push(next);
        }
        if !self.state.is_live() {
            tracing::trace!(doc = %self.config.doc_id, count = batch.len(), "offline, local updates left to the next merge");
            return;
        }

        let updates = match self.seal(&batch) {
            Ok(update) => vec![update],
            // Too large together; try one by one
            Err(err) if batch.len() > 1 => {
                tracing::debug!(doc = %self.config.doc_id, error = %err, "batch seal failed, sealing separately");
                batch
                    .iter()
                    .filter_map(|message| match self.seal(std::slice::from_ref(message)) {
                        Ok(update) => Some(update),
                        Err(err) => {
                            tracing::error!(doc = %self.config.doc_id, error = %err, "local update not sent");
                            None
                        }
                    })
                    .collect()
            }
            Err(err) => {
                tracing::error!(doc = %self.config.doc_id, error = %err, "local update not sent");
                Vec::new()
            }
        };

        for update in updates {
            if let Err(err) = self.outbound.enqueue(update) {
                tracing::warn!(doc = %self.config.doc_id, error = %err, "local update dropped");
            }
        }
        self.flush_outbound().await;
    }

    /// Append queued updates until the queue is empty or an append fails.
    async fn flush_outbound(&mut self) {
        while self.state.is_live() {
            let Some(update) = self.outbound.dequeue() else {
                break;
            };
            let result = self
                .shared
                .transport
                .add_update(&self.config.doc_id, update.operation.clone())
                .await;
            match result {
                Ok(row_id) => {
                    self.outbound.ack(&update.update_id);
                    tracing::debug!(doc = %self.config.doc_id, update = %update.update_id, row = %row_id, "appended");
                    self.shared.emit(ProviderEvent::Appended {
                        update_id: update.update_id,
                        row_id,
                    });
                }
                Err(err) => {
                    tracing::warn!(doc = %self.config.doc_id, update = %update.update_id, attempt = update.attempts, error = %err, "append failed");
                    if let NackOutcome::Dropped(dropped) = self.outbound.nack(&update.update_id) {
                        tracing::warn!(doc = %self.config.doc_id, update = %dropped.update_id, attempts = dropped.attempts, "giving up on update");
                        self.shared.emit(ProviderEvent::AppendDropped {
                            update_id: dropped.update_id,
                            attempts: dropped.attempts,
                        });
                    }
                    break;
                }
            }
        }
        self.publish_session();
    }

    async fn on_remote(&mut self, entry: LogEntry) {
        if !self.tracker.observe(entry.row_id) {
            tracing::trace!(doc = %self.config.doc_id, row = %entry.row_id, "row already covered");
            return;
        }
        match self.open_row(&entry) {
            Ok((update_id, messages)) => {
                if !self.seen.insert(update_id) {
                    tracing::trace!(doc = %self.config.doc_id, update = %update_id, "update already applied");
                } else {
                    let result = self.document.lock().await.apply_remote_updates(&messages);
                    if let Err(err) = result {
                        self.reject_row(entry.row_id, update_id, &err);
                    }
                }
            }
            Err(err) => self.skip_row(entry.row_id, &err),
        }
        self.publish_session();
    }

    /// Replace the log prefix this client has fully seen with one snapshot.
    async fn maybe_snapshot(&mut self) {
        if !self.state.is_live() {
            return;
        }
        let Some(target) = self.tracker.snapshot_target(self.snapshot_threshold) else {
            return;
        };
        let covered = self.tracker.updates_since_snapshot();

        let snapshot = self.document.lock().await.encode_snapshot();
        let operation = match snapshot
            .map_err(ProviderError::from)
            .and_then(|messages| Ok(self.seal(&messages)?))
        {
            Ok(update) => update.operation,
            Err(err) => {
                tracing::warn!(doc = %self.config.doc_id, error = %err, "snapshot not built");
                self.shared.emit(ProviderEvent::SnapshotFailed {
                    error: err.to_string(),
                });
                return;
            }
        };

        match self
            .shared
            .transport
            .apply_snapshot(&self.config.doc_id, operation, target)
            .await
        {
            Ok(_) => {
                self.tracker.record_snapshot(target, covered);
                self.snapshot_threshold = self.config.snapshot.draw_threshold();
                tracing::info!(doc = %self.config.doc_id, last_row = %target, covered, "log compacted");
                self.shared
                    .emit(ProviderEvent::Snapshotted { last_row_id: target });
            }
            Err(err) => {
                tracing::warn!(doc = %self.config.doc_id, error = %err, "snapshot rejected");
                self.shared.emit(ProviderEvent::SnapshotFailed {
                    error: err.to_string(),
                });
            }
        }
        self.publish_session();
    }

    fn publish_session(&self) {
        self.shared.session.send_replace(SyncSession {
            highest_row_id_seen: self.tracker.highest_seen(),
            last_snapshot_row_id: self.tracker.last_snapshot(),
            updates_since_snapshot: self.tracker.updates_since_snapshot(),
            queued_updates: self.outbound.total_count(),
        });
    }
}

async fn next_row(rx: &mut Option<mpsc::UnboundedReceiver<LogEntry>>) -> Option<LogEntry> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
