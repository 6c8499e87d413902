//! Main SyncRelay server coordination.
//!
//! SyncRelay owns storage, the listener registry and the accept loop. Every
//! append to a document is committed and pushed to that document's
//! listeners while holding the document's lock, so each listener receives
//! rows in commit order. The appending session is a listener like any other
//! and receives its own row too.

use crate::config::Config;
use crate::error::{RelayError, StorageError};
use crate::limits::RateLimits;
use crate::session::Session;
use crate::storage::{LogStorage, SqliteStorage};
use dashmap::DashMap;
use sealed_sync_types::{DocId, Frame, LogEntry, Message, NewUpdate, RowId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Sessions accepted.
    pub sessions_total: AtomicU64,
    /// Operations appended.
    pub appends_total: AtomicU64,
    /// Snapshots applied.
    pub snapshots_total: AtomicU64,
    /// Full document fetches served.
    pub fetches_total: AtomicU64,
    /// Operation bytes received (appends and snapshots).
    pub bytes_received: AtomicU64,
    /// Operation bytes sent in fetch responses.
    pub bytes_sent: AtomicU64,
    /// NewUpdate pushes queued to listeners.
    pub updates_pushed: AtomicU64,
    /// Requests refused by a rate limit.
    pub rate_limit_hits: AtomicU64,
    /// Writes refused by a size limit or an invalid snapshot.
    pub rejections_total: AtomicU64,
    /// Storage and protocol failures.
    pub errors_total: AtomicU64,
}

/// Outbound frame queue of one session.
pub type FrameSender = mpsc::UnboundedSender<Frame>;

/// Main relay server.
pub struct SyncRelay {
    config: Config,
    storage: Arc<SqliteStorage>,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
    /// Listeners per document, keyed by session id.
    listeners: DashMap<DocId, HashMap<u64, FrameSender>>,
    /// Serializes commit + push per document.
    doc_locks: DashMap<DocId, Arc<Mutex<()>>>,
    next_session_id: AtomicU64,
    active_sessions: AtomicUsize,
}

impl std::fmt::Debug for SyncRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("documents_listened", &self.listeners.len())
            .field("active_sessions", &self.total_sessions())
            .finish_non_exhaustive()
    }
}

impl SyncRelay {
    /// Create a new SyncRelay with the given config and storage.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            storage: Arc::new(storage),
            rate_limits,
            metrics: RelayMetrics::default(),
            listeners: DashMap::new(),
            doc_locks: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            active_sessions: AtomicUsize::new(0),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), RelayError> {
        tracing::info!(addr = ?listener.local_addr().ok(), "relay listening");
        loop {
            let (stream, peer) = listener.accept().await?;

            let max_sessions = self.config.limits.max_concurrent_sessions;
            if self.total_sessions() >= max_sessions {
                tracing::warn!(%peer, max_sessions, "session limit reached, rejecting connection");
                continue;
            }
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
            }

            let session = Session::new(Arc::clone(&self), peer.to_string());
            // Don't block the accept loop
            tokio::spawn(session.run(stream));
        }
    }

    /// Register a new session and return its id.
    pub fn open_session(&self) -> u64 {
        self.metrics.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Forget a session and every document it listens to.
    pub fn close_session(&self, session_id: u64) {
        self.listeners.retain(|_, sessions| {
            sessions.remove(&session_id);
            !sessions.is_empty()
        });
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Number of open sessions.
    pub fn total_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Start pushing new rows of `doc_id` to a session.
    ///
    /// Returns `false` if the document has the maximum number of listeners.
    pub fn listen(&self, doc_id: &DocId, session_id: u64, sender: FrameSender) -> bool {
        let max = self.config.limits.max_subscribers_per_document;
        let mut sessions = self.listeners.entry(doc_id.clone()).or_default();
        if !sessions.contains_key(&session_id) && sessions.len() >= max {
            return false;
        }
        sessions.insert(session_id, sender);
        tracing::debug!(doc = %doc_id, session_id, listeners = sessions.len(), "listening");
        true
    }

    /// Stop pushing rows of `doc_id` to a session.
    pub fn stop_listening(&self, doc_id: &DocId, session_id: u64) {
        self.listeners.remove_if_mut(doc_id, |_, sessions| {
            sessions.remove(&session_id);
            sessions.is_empty()
        });
    }

    /// Number of sessions listening to a document.
    pub fn listener_count(&self, doc_id: &DocId) -> usize {
        self.listeners.get(doc_id).map_or(0, |sessions| sessions.len())
    }

    fn doc_lock(&self, doc_id: &DocId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.doc_locks
                .entry(doc_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn check_operation_size(&self, operation: &[u8]) -> Result<(), StorageError> {
        let limit = self.config.storage.max_operation_size;
        if operation.len() > limit {
            return Err(StorageError::OperationTooLarge {
                size: operation.len(),
                limit,
            });
        }
        Ok(())
    }

    /// Append an operation and push it to every listener of the document.
    pub async fn append(&self, doc_id: &DocId, operation: Vec<u8>) -> Result<RowId, StorageError> {
        self.check_operation_size(&operation)?;

        let lock = self.doc_lock(doc_id);
        let _guard = lock.lock().await;

        let limit = self.config.storage.max_document_size;
        let current = self.storage.document_size(doc_id).await?;
        if current as usize + operation.len() > limit {
            return Err(StorageError::DocumentTooLarge {
                doc_id: doc_id.to_string(),
                limit,
            });
        }

        let row_id = self.storage.append(doc_id, &operation).await?;
        self.metrics.appends_total.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .bytes_received
            .fetch_add(operation.len() as u64, Ordering::Relaxed);
        tracing::debug!(doc = %doc_id, row = %row_id, bytes = operation.len(), "appended");

        self.push_update(doc_id, row_id, operation);
        Ok(row_id)
    }

    fn push_update(&self, doc_id: &DocId, row_id: RowId, operation: Vec<u8>) {
        let Some(mut sessions) = self.listeners.get_mut(doc_id) else {
            return;
        };
        let frame = Frame::push(Message::NewUpdate(NewUpdate {
            doc_id: doc_id.clone(),
            row_id,
            operation,
        }));
        // Drop listeners whose session is gone
        sessions.retain(|_, sender| sender.send(frame.clone()).is_ok());
        self.metrics
            .updates_pushed
            .fetch_add(sessions.len() as u64, Ordering::Relaxed);
    }

    /// Replace rows `<= last_row_id` of a document with one snapshot row.
    ///
    /// Snapshots are not pushed to listeners.
    pub async fn apply_snapshot(
        &self,
        doc_id: &DocId,
        operation: Vec<u8>,
        last_row_id: RowId,
    ) -> Result<RowId, StorageError> {
        self.check_operation_size(&operation)?;

        let lock = self.doc_lock(doc_id);
        let _guard = lock.lock().await;

        let row_id = self
            .storage
            .apply_snapshot(doc_id, &operation, last_row_id)
            .await?;
        self.metrics.snapshots_total.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .bytes_received
            .fetch_add(operation.len() as u64, Ordering::Relaxed);
        tracing::info!(doc = %doc_id, last_row = %last_row_id, "snapshot applied");
        Ok(row_id)
    }

    /// Every row of a document.
    pub async fn get_doc(&self, doc_id: &DocId) -> Result<Vec<LogEntry>, StorageError> {
        let rows = self.storage.get_rows(doc_id).await?;
        let bytes: u64 = rows.iter().map(|r| r.operation.len() as u64).sum();
        self.metrics.fetches_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        tracing::debug!(doc = %doc_id, rows = rows.len(), bytes, "served document");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;

    async fn relay_with(config: Config) -> SyncRelay {
        SyncRelay::new(config, SqliteStorage::in_memory().await.unwrap())
    }

    async fn relay() -> SyncRelay {
        relay_with(Config::default()).await
    }

    fn doc() -> DocId {
        DocId::new("doc-1")
    }

    fn pushed_row(frame: Frame) -> u64 {
        assert!(frame.is_push());
        match frame.message {
            Message::NewUpdate(update) => update.row_id.value(),
            other => panic!("expected NewUpdate, got {}", other.kind()),
        }
    }

    // ===========================================
    // Listener Registry Tests
    // ===========================================

    #[tokio::test]
    async fn listen_and_stop() {
        let relay = relay().await;
        let session = relay.open_session();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(relay.listen(&doc(), session, tx));
        assert_eq!(relay.listener_count(&doc()), 1);

        relay.stop_listening(&doc(), session);
        assert_eq!(relay.listener_count(&doc()), 0);
    }

    #[tokio::test]
    async fn listener_limit_is_enforced() {
        let config = Config {
            limits: LimitsConfig {
                max_subscribers_per_document: 1,
                ..LimitsConfig::default()
            },
            ..Config::default()
        };
        let relay = relay_with(config).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(relay.listen(&doc(), 1, tx.clone()));
        assert!(!relay.listen(&doc(), 2, tx.clone()));
        // Re-listening from the same session is fine
        assert!(relay.listen(&doc(), 1, tx));
    }

    #[tokio::test]
    async fn close_session_removes_all_listeners() {
        let relay = relay().await;
        let session = relay.open_session();
        let (tx, _rx) = mpsc::unbounded_channel();
        relay.listen(&DocId::new("a"), session, tx.clone());
        relay.listen(&DocId::new("b"), session, tx);
        assert_eq!(relay.total_sessions(), 1);

        relay.close_session(session);
        assert_eq!(relay.listener_count(&DocId::new("a")), 0);
        assert_eq!(relay.listener_count(&DocId::new("b")), 0);
        assert_eq!(relay.total_sessions(), 0);
    }

    // ===========================================
    // Append + Push Tests
    // ===========================================

    #[tokio::test]
    async fn append_pushes_to_every_listener_including_sender() {
        let relay = relay().await;
        let (sender_tx, mut sender_rx) = mpsc::unbounded_channel();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        relay.listen(&doc(), 1, sender_tx);
        relay.listen(&doc(), 2, other_tx);

        let row = relay.append(&doc(), vec![1, 2, 3]).await.unwrap();

        assert_eq!(pushed_row(sender_rx.try_recv().unwrap()), row.value());
        assert_eq!(pushed_row(other_rx.try_recv().unwrap()), row.value());
        assert_eq!(relay.metrics().updates_pushed.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn pushes_arrive_in_commit_order() {
        let relay = Arc::new(relay().await);
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.listen(&doc(), 1, tx);

        let mut tasks = Vec::new();
        for i in 0..20u8 {
            let relay = Arc::clone(&relay);
            tasks.push(tokio::spawn(async move {
                relay.append(&doc(), vec![i]).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            seen.push(pushed_row(frame));
        }
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        assert_eq!(seen.len(), 20);
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn other_documents_are_not_pushed() {
        let relay = relay().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.listen(&doc(), 1, tx);

        relay.append(&DocId::new("other"), vec![1]).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_listener_is_dropped_on_push() {
        let relay = relay().await;
        let (tx, rx) = mpsc::unbounded_channel();
        relay.listen(&doc(), 1, tx);
        drop(rx);

        relay.append(&doc(), vec![1]).await.unwrap();
        assert_eq!(relay.listener_count(&doc()), 0);
    }

    #[tokio::test]
    async fn oversized_operation_is_rejected() {
        let mut config = Config::default();
        config.storage.max_operation_size = 4;
        let relay = relay_with(config).await;

        let err = relay.append(&doc(), vec![0; 5]).await.unwrap_err();
        assert!(matches!(err, StorageError::OperationTooLarge { size: 5, limit: 4 }));
        assert!(relay.get_doc(&doc()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn document_size_limit_is_enforced() {
        let mut config = Config::default();
        config.storage.max_document_size = 10;
        let relay = relay_with(config).await;

        relay.append(&doc(), vec![0; 6]).await.unwrap();
        let err = relay.append(&doc(), vec![0; 6]).await.unwrap_err();
        assert!(matches!(err, StorageError::DocumentTooLarge { .. }));
    }

    // ===========================================
    // Snapshot Tests
    // ===========================================

    #[tokio::test]
    async fn snapshot_is_not_pushed() {
        let relay = relay().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let row = relay.append(&doc(), vec![1]).await.unwrap();
        relay.listen(&doc(), 1, tx);

        relay.apply_snapshot(&doc(), vec![9], row).await.unwrap();

        assert!(rx.try_recv().is_err());
        let rows = relay.get_doc(&doc()).await.unwrap();
        assert_eq!(rows, vec![LogEntry::new(row, vec![9])]);
        assert_eq!(relay.metrics().snapshots_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn concurrent_append_survives_snapshot() {
        let relay = Arc::new(relay().await);
        for i in 1..=3u8 {
            relay.append(&doc(), vec![i]).await.unwrap();
        }

        let snap = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.apply_snapshot(&doc(), vec![0xAA], RowId::new(3)).await })
        };
        let append = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.append(&doc(), vec![4]).await })
        };
        snap.await.unwrap().unwrap();
        let appended = append.await.unwrap().unwrap();

        let ids: Vec<u64> = relay
            .get_doc(&doc())
            .await
            .unwrap()
            .iter()
            .map(|r| r.row_id.value())
            .collect();
        assert_eq!(ids, vec![3, appended.value()]);
    }
}
