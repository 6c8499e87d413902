//! Server-log transport abstraction for sealed-sync.
//!
//! This module provides the contract between the sync provider and whatever
//! carries its requests to the relay (the framed relay connection in the e2e
//! harness, the in-memory mock for testing).
//!
//! # Contract
//!
//! - `add_update` appends one row and returns its id.
//! - `get_remote_update_list` returns every row of a document in commit
//!   order.
//! - `subscribe` delivers rows appended after it returns, in commit order,
//!   to every subscriber of the document including the appending client.
//!   A client that subscribes and then fetches misses nothing; rows may
//!   show up in both.
//! - `apply_snapshot` atomically deletes rows `<= last_row_id` and stores the
//!   snapshot as row `last_row_id`, which must be a row of the document.
//!   Rows appended concurrently with a higher id survive. Snapshots are not
//!   delivered to subscribers.
//! - `unsubscribe` is synchronous: no row is delivered for that
//!   subscription once it returns.
//!
//! No timeout is imposed by the caller; a transport surfaces a stalled link
//! as an error or as [`LinkStatus::Down`].

mod mock;

pub use mock::{MockRelay, MockTransport};

use async_trait::async_trait;
use sealed_sync_types::{DocId, LogEntry, RowId};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed while a request was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// The relay refused an append.
    #[error("append rejected: {0}")]
    AppendRejected(String),

    /// The relay refused a snapshot.
    #[error("snapshot rejected: {0}")]
    SnapshotRejected(String),

    /// Any other failed request.
    #[error("request failed: {0}")]
    RequestFailed(String),
}

/// Whether the link to the relay is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Connected.
    Up,
    /// Not connected, or the connection dropped.
    Down,
}

/// Identifies one subscription for [`LogTransport::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A live stream of rows for one document.
///
/// The stream ends (`recv` returns `None`) when the subscription is
/// cancelled or the link drops.
#[derive(Debug)]
pub struct Subscription {
    /// Handle for unsubscribing.
    pub id: SubscriptionId,
    /// Rows in commit order.
    pub updates: mpsc::UnboundedReceiver<LogEntry>,
}

/// Client side of the relay's per-document append-only log.
#[async_trait]
pub trait LogTransport: Send + Sync + 'static {
    /// Connect to the relay.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the connection. Ends every subscription.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Append one operation to a document's log.
    async fn add_update(&self, doc_id: &DocId, operation: Vec<u8>)
        -> Result<RowId, TransportError>;

    /// Every row of a document, oldest first.
    async fn get_remote_update_list(&self, doc_id: &DocId) -> Result<Vec<LogEntry>, TransportError>;

    /// Start receiving rows appended to a document.
    async fn subscribe(&self, doc_id: &DocId) -> Result<Subscription, TransportError>;

    /// Stop a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Replace rows `<= last_row_id` with one snapshot row.
    async fn apply_snapshot(
        &self,
        doc_id: &DocId,
        operation: Vec<u8>,
        last_row_id: RowId,
    ) -> Result<RowId, TransportError>;

    /// Watch the link status.
    fn link_status(&self) -> watch::Receiver<LinkStatus>;
}
