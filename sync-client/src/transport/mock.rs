//! Mock transport for testing.
//!
//! [`MockRelay`] is an in-memory document log shared by any number of
//! [`MockTransport`] clients. Each client can be told to fail its next
//! request or to lose its link, so provider behaviour under failure can be
//! tested without a network.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sealed_sync_types::{DocId, LogEntry, RowId};
use tokio::sync::{mpsc, watch};

use super::{LinkStatus, LogTransport, Subscription, SubscriptionId, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct RelayState {
    /// Row ids are shared across documents, like an autoincrement column.
    last_row: u64,
    next_client: u64,
    next_subscription: u64,
    docs: HashMap<DocId, Vec<LogEntry>>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

#[derive(Debug)]
struct Subscriber {
    client: u64,
    doc_id: DocId,
    sender: mpsc::UnboundedSender<LogEntry>,
}

impl RelayState {
    fn append(&mut self, doc_id: &DocId, operation: Vec<u8>) -> RowId {
        self.last_row += 1;
        let entry = LogEntry::new(RowId::new(self.last_row), operation);
        self.docs
            .entry(doc_id.clone())
            .or_default()
            .push(entry.clone());

        // Deliver under the lock so every subscriber sees commit order
        self.subscribers.retain(|_, sub| {
            sub.doc_id != *doc_id || sub.sender.send(entry.clone()).is_ok()
        });
        entry.row_id
    }

    fn apply_snapshot(
        &mut self,
        doc_id: &DocId,
        operation: Vec<u8>,
        last_row_id: RowId,
    ) -> Result<RowId, String> {
        let rows = self
            .docs
            .get_mut(doc_id)
            .ok_or_else(|| format!("unknown document {doc_id}"))?;
        if !rows.iter().any(|r| r.row_id == last_row_id) {
            return Err(format!("row {last_row_id} is not in the log"));
        }
        rows.retain(|r| r.row_id > last_row_id);
        rows.insert(0, LogEntry::new(last_row_id, operation));
        Ok(last_row_id)
    }

    fn drop_client_subscriptions(&mut self, client: u64) {
        self.subscribers.retain(|_, sub| sub.client != client);
    }
}

/// Shared in-memory relay log.
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MockRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new client attached to this relay.
    pub fn client(&self) -> MockTransport {
        let client_id = {
            let mut state = lock(&self.state);
            state.next_client += 1;
            state.next_client
        };
        let (status, _) = watch::channel(LinkStatus::Down);
        MockTransport {
            relay: self.clone(),
            client_id,
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            status: Arc::new(status),
        }
    }

    /// Append on behalf of some other writer. Delivered to subscribers.
    pub fn append(&self, doc_id: &DocId, operation: Vec<u8>) -> RowId {
        lock(&self.state).append(doc_id, operation)
    }

    /// Current rows of a document, oldest first.
    pub fn rows(&self, doc_id: &DocId) -> Vec<LogEntry> {
        lock(&self.state)
            .docs
            .get(doc_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Row ids of a document, oldest first.
    pub fn row_ids(&self, doc_id: &DocId) -> Vec<RowId> {
        self.rows(doc_id).iter().map(|r| r.row_id).collect()
    }

    /// Number of live subscriptions to a document.
    pub fn subscriber_count(&self, doc_id: &DocId) -> usize {
        lock(&self.state)
            .subscribers
            .values()
            .filter(|sub| sub.doc_id == *doc_id && !sub.sender.is_closed())
            .count()
    }
}

/// One client of a [`MockRelay`].
///
/// Clones share connection state, so a test can keep a handle while the
/// provider owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    relay: MockRelay,
    client_id: u64,
    inner: Arc<Mutex<MockTransportInner>>,
    status: Arc<watch::Sender<LinkStatus>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connect_count: u32,
    subscriptions: HashSet<SubscriptionId>,
    fail_next_connect: Option<String>,
    fail_next_append: Option<String>,
    fail_next_fetch: Option<String>,
    fail_next_snapshot: Option<String>,
    lose_next_append_ack: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a client on its own fresh relay.
    pub fn new() -> Self {
        MockRelay::new().client()
    }

    /// The relay this client talks to.
    pub fn relay(&self) -> &MockRelay {
        &self.relay
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        lock(&self.inner).fail_next_connect = Some(error.to_string());
    }

    /// Cause the next add_update() to be rejected.
    pub fn fail_next_append(&self, error: &str) {
        lock(&self.inner).fail_next_append = Some(error.to_string());
    }

    /// Cause the next get_remote_update_list() to fail.
    pub fn fail_next_fetch(&self, error: &str) {
        lock(&self.inner).fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next apply_snapshot() to be rejected.
    pub fn fail_next_snapshot(&self, error: &str) {
        lock(&self.inner).fail_next_snapshot = Some(error.to_string());
    }

    /// Let the next append land but report it as failed, as if the
    /// response was lost.
    pub fn lose_next_append_ack(&self) {
        lock(&self.inner).lose_next_append_ack = true;
    }

    /// Simulate the connection dropping: subscriptions end and the link
    /// status goes down.
    pub fn drop_link(&self) {
        self.close();
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> u32 {
        lock(&self.inner).connect_count
    }

    /// Number of subscriptions this client holds.
    pub fn subscription_count(&self) -> usize {
        lock(&self.inner).subscriptions.len()
    }

    fn close(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.connected = false;
            inner.subscriptions.clear();
        }
        lock(&self.relay.state).drop_client_subscriptions(self.client_id);
        self.status.send_replace(LinkStatus::Down);
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if lock(&self.inner).connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl LogTransport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        {
            let mut inner = lock(&self.inner);
            if let Some(error) = inner.fail_next_connect.take() {
                return Err(TransportError::ConnectionError(error));
            }
            inner.connected = true;
            inner.connect_count += 1;
        }
        self.status.send_replace(LinkStatus::Up);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.close();
        Ok(())
    }

    async fn add_update(
        &self,
        doc_id: &DocId,
        operation: Vec<u8>,
    ) -> Result<RowId, TransportError> {
        self.ensure_connected()?;
        let lose_ack = {
            let mut inner = lock(&self.inner);
            if let Some(error) = inner.fail_next_append.take() {
                return Err(TransportError::AppendRejected(error));
            }
            std::mem::take(&mut inner.lose_next_append_ack)
        };

        let row_id = lock(&self.relay.state).append(doc_id, operation);
        if lose_ack {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(row_id)
    }

    async fn get_remote_update_list(
        &self,
        doc_id: &DocId,
    ) -> Result<Vec<LogEntry>, TransportError> {
        self.ensure_connected()?;
        if let Some(error) = lock(&self.inner).fail_next_fetch.take() {
            return Err(TransportError::RequestFailed(error));
        }
        Ok(self.relay.rows(doc_id))
    }

    async fn subscribe(&self, doc_id: &DocId) -> Result<Subscription, TransportError> {
        self.ensure_connected()?;
        let (sender, updates) = mpsc::unbounded_channel();
        let id = {
            let mut state = lock(&self.relay.state);
            state.next_subscription += 1;
            let id = SubscriptionId(state.next_subscription);
            state.subscribers.insert(
                id,
                Subscriber {
                    client: self.client_id,
                    doc_id: doc_id.clone(),
                    sender,
                },
            );
            id
        };
        lock(&self.inner).subscriptions.insert(id);
        Ok(Subscription { id, updates })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if lock(&self.inner).subscriptions.remove(&id) {
            lock(&self.relay.state).subscribers.remove(&id);
        }
    }

    async fn apply_snapshot(
        &self,
        doc_id: &DocId,
        operation: Vec<u8>,
        last_row_id: RowId,
    ) -> Result<RowId, TransportError> {
        self.ensure_connected()?;
        if let Some(error) = lock(&self.inner).fail_next_snapshot.take() {
            return Err(TransportError::SnapshotRejected(error));
        }
        lock(&self.relay.state)
            .apply_snapshot(doc_id, operation, last_row_id)
            .map_err(TransportError::SnapshotRejected)
    }

    fn link_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }
}
