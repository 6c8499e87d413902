//! The CRDT document seen from the sync provider.
//!
//! The provider never interprets update bytes. It only needs a document
//! that can apply remote updates, describe its full state, compute what it
//! has that a set of remote updates lacks, and report local edits.

mod memory;

pub use memory::MemoryDocument;

use sealed_sync_types::ClientMessage;
use thiserror::Error;
use tokio::sync::mpsc;

/// Document errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// An update could not be decoded or applied.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// The document state could not be encoded.
    #[error("encoding failed: {0}")]
    EncodingFailed(String),
}

/// A CRDT document bound to one sync provider.
///
/// Merging must be commutative and idempotent: the provider may apply an
/// update the document already contains.
pub trait CrdtDocument: Send + 'static {
    /// Merge updates from the remote log.
    ///
    /// These must not come back out of the local update stream.
    fn apply_remote_updates(&mut self, updates: &[ClientMessage]) -> Result<(), DocumentError>;

    /// The full persistent state as updates, for a snapshot.
    fn encode_snapshot(&self) -> Result<Vec<ClientMessage>, DocumentError>;

    /// One update holding the local changes missing from `remote`, or `None`
    /// if the remote updates already cover everything.
    fn diff_against(&self, remote: &[ClientMessage])
        -> Result<Option<ClientMessage>, DocumentError>;

    /// Start streaming updates produced by local edits.
    ///
    /// Replaces any previous stream.
    fn subscribe_local_updates(&mut self) -> mpsc::UnboundedReceiver<ClientMessage>;
}
