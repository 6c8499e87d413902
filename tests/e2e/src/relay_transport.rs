//! Framed TCP client for the relay.
//!
//! [`RelayTransport`] implements [`LogTransport`] over one TCP connection per
//! link. Requests carry a fresh request id and are matched to responses by a
//! pending map; push frames are routed to the local subscriptions of their
//! document. Losing the connection fails pending requests, ends every
//! subscription and flips the link status to [`LinkStatus::Down`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sync_client::transport::{
    LinkStatus, LogTransport, Subscription, SubscriptionId, TransportError,
};
use sync_relay::protocol::{read_frame, write_frame};
use sync_types::{
    AddUpdate, ApplySnapshot, DocId, Frame, GetDoc, LogEntry, Message, RowId, StartListening,
    StopListening,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LocalSubscription {
    doc_id: DocId,
    sender: mpsc::UnboundedSender<LogEntry>,
}

/// One TCP connection and everything routed over it.
struct Link {
    outbound: mpsc::UnboundedSender<Frame>,
    closed: AtomicBool,
    next_request: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    subscriptions: Mutex<HashMap<SubscriptionId, LocalSubscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Link {
    fn new(outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            outbound,
            closed: AtomicBool::new(false),
            next_request: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Fail pending requests, end subscriptions and stop the I/O tasks.
    fn shut_down(&self) {
        {
            let mut pending = lock(&self.pending);
            self.closed.store(true, Ordering::SeqCst);
            pending.clear();
        }
        lock(&self.subscriptions).clear();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    fn route(&self, frame: Frame) {
        if frame.is_push() {
            let update = match frame.message {
                Message::NewUpdate(update) => update,
                other => {
                    tracing::debug!(kind = other.kind(), "ignoring unexpected push");
                    return;
                }
            };
            let entry = LogEntry::new(update.row_id, update.operation);
            lock(&self.subscriptions).retain(|_, sub| {
                sub.doc_id != update.doc_id || sub.sender.send(entry.clone()).is_ok()
            });
        } else if let Some(waiter) = lock(&self.pending).remove(&frame.request_id) {
            let _ = waiter.send(frame.message);
        }
    }

    async fn request(&self, message: Message) -> Result<Message, TransportError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionClosed);
            }
            pending.insert(request_id, tx);
        }
        if self.outbound.send(Frame::new(request_id, message)).is_err() {
            lock(&self.pending).remove(&request_id);
            return Err(TransportError::ConnectionClosed);
        }
        rx.await.map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a request whose response nobody waits for.
    fn notify(&self, message: Message) {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let _ = self.outbound.send(Frame::new(request_id, message));
    }
}

struct TransportInner {
    addr: SocketAddr,
    link: Mutex<Option<Arc<Link>>>,
    next_subscription: AtomicU64,
    status: watch::Sender<LinkStatus>,
}

impl TransportInner {
    /// Drop `link` if it is still the current one.
    fn retire(&self, link: &Arc<Link>) {
        let mut current = lock(&self.link);
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, link)) {
            *current = None;
            drop(current);
            link.shut_down();
            self.status.send_replace(LinkStatus::Down);
        }
    }
}

/// [`LogTransport`] over the relay's framed TCP protocol.
///
/// Cloning shares the connection.
#[derive(Clone)]
pub struct RelayTransport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for RelayTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayTransport")
            .field("addr", &self.inner.addr)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

impl RelayTransport {
    /// Transport for the relay listening on `addr`. Call
    /// [`connect`](LogTransport::connect) before use.
    pub fn new(addr: SocketAddr) -> Self {
        let (status, _) = watch::channel(LinkStatus::Down);
        Self {
            inner: Arc::new(TransportInner {
                addr,
                link: Mutex::new(None),
                next_subscription: AtomicU64::new(1),
                status,
            }),
        }
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.link).is_some()
    }

    /// Close the TCP connection as if the network dropped it.
    pub fn sever(&self) {
        let link = lock(&self.inner.link).clone();
        if let Some(link) = link {
            self.inner.retire(&link);
        }
    }

    fn link(&self) -> Result<Arc<Link>, TransportError> {
        lock(&self.inner.link)
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

fn unexpected(message: Message) -> TransportError {
    TransportError::RequestFailed(format!("unexpected response: {}", message.kind()))
}

#[async_trait]
impl LogTransport for RelayTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        let stream = TcpStream::connect(self.inner.addr)
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;
        let (mut reader, mut writer) = stream.into_split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let link = Arc::new(Link::new(outbound));
        *lock(&self.inner.link) = Some(Arc::clone(&link));
        self.inner.status.send_replace(LinkStatus::Up);

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    tracing::debug!(error = %e, "relay write failed");
                    break;
                }
            }
        });

        let reader_task = {
            let inner = Arc::clone(&self.inner);
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                loop {
                    match read_frame(&mut reader).await {
                        Ok(Some(frame)) => link.route(frame),
                        Ok(None) => {
                            tracing::debug!("relay closed the connection");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "relay read failed");
                            break;
                        }
                    }
                }
                inner.retire(&link);
            })
        };
        lock(&link.tasks).extend([writer_task, reader_task]);
        if link.closed.load(Ordering::SeqCst) {
            // Dropped before the tasks were registered
            link.shut_down();
            return Err(TransportError::ConnectionClosed);
        }
        tracing::debug!(addr = %self.inner.addr, "connected to relay");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.sever();
        Ok(())
    }

    async fn add_update(&self, doc_id: &DocId, operation: Vec<u8>) -> Result<RowId, TransportError> {
        let response = self
            .link()?
            .request(Message::AddUpdate(AddUpdate {
                doc_id: doc_id.clone(),
                operation,
            }))
            .await?;
        match response {
            Message::Appended(appended) => Ok(appended.row_id),
            Message::Rejected(rejected) => {
                Err(TransportError::AppendRejected(rejected.error_message))
            }
            other => Err(unexpected(other)),
        }
    }

    async fn get_remote_update_list(&self, doc_id: &DocId) -> Result<Vec<LogEntry>, TransportError> {
        let response = self
            .link()?
            .request(Message::GetDoc(GetDoc {
                doc_id: doc_id.clone(),
            }))
            .await?;
        match response {
            Message::DocRows(rows) => Ok(rows.rows),
            Message::Rejected(rejected) => Err(TransportError::RequestFailed(rejected.error_message)),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(&self, doc_id: &DocId) -> Result<Subscription, TransportError> {
        let link = self.link()?;
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (sender, updates) = mpsc::unbounded_channel();

        // Pushes can beat the acknowledgement, so route before asking
        lock(&link.subscriptions).insert(
            id,
            LocalSubscription {
                doc_id: doc_id.clone(),
                sender,
            },
        );

        let response = link
            .request(Message::StartListening(StartListening {
                doc_id: doc_id.clone(),
            }))
            .await;
        let failure = match response {
            Ok(Message::Listening(listening)) if listening.active => None,
            Ok(Message::Rejected(rejected)) => {
                Some(TransportError::RequestFailed(rejected.error_message))
            }
            Ok(other) => Some(unexpected(other)),
            Err(e) => Some(e),
        };
        if let Some(error) = failure {
            lock(&link.subscriptions).remove(&id);
            return Err(error);
        }
        Ok(Subscription { id, updates })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let Ok(link) = self.link() else {
            return;
        };
        let mut subscriptions = lock(&link.subscriptions);
        let Some(removed) = subscriptions.remove(&id) else {
            return;
        };
        let still_listening = subscriptions
            .values()
            .any(|sub| sub.doc_id == removed.doc_id);
        drop(subscriptions);

        if !still_listening {
            link.notify(Message::StopListening(StopListening {
                doc_id: removed.doc_id,
            }));
        }
    }

    async fn apply_snapshot(
        &self,
        doc_id: &DocId,
        operation: Vec<u8>,
        last_row_id: RowId,
    ) -> Result<RowId, TransportError> {
        let response = self
            .link()?
            .request(Message::ApplySnapshot(ApplySnapshot {
                doc_id: doc_id.clone(),
                operation,
                last_row_id,
            }))
            .await?;
        match response {
            Message::Appended(appended) => Ok(appended.row_id),
            Message::Rejected(rejected) => {
                Err(TransportError::SnapshotRejected(rejected.error_message))
            }
            other => Err(unexpected(other)),
        }
    }

    fn link_status(&self) -> watch::Receiver<LinkStatus> {
        self.inner.status.subscribe()
    }
}
