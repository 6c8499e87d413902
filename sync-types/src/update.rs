//! Update payloads: what the CRDT produces and what the relay stores.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{RowId, SyncError};

/// Channel an update belongs to.
///
/// `Doc` updates are persistent document mutations and end up in snapshots.
/// `Awareness` updates carry ephemeral presence state (cursor position,
/// online status) and travel through the same pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Bucket {
    /// Persistent document content.
    Doc = 0,
    /// Ephemeral presence state.
    Awareness = 1,
}

impl Bucket {
    /// Whether updates in this bucket are folded into snapshots.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Bucket::Doc)
    }
}

impl TryFrom<u8> for Bucket {
    type Error = SyncError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Bucket::Doc),
            1 => Ok(Bucket::Awareness),
            _ => Err(SyncError::InvalidBucket(value)),
        }
    }
}

/// One CRDT update operation tagged with its bucket.
///
/// Encoded on the inside of the sealed message as `[bucket tag][operation]`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientMessage {
    /// Which channel this update belongs to.
    pub bucket: Bucket,
    /// Opaque CRDT update bytes.
    pub operation: Vec<u8>,
}

impl ClientMessage {
    /// Create a new message.
    pub fn new(bucket: Bucket, operation: Vec<u8>) -> Self {
        Self { bucket, operation }
    }

    /// Create a persistent document update.
    pub fn doc(operation: Vec<u8>) -> Self {
        Self::new(Bucket::Doc, operation)
    }

    /// Create an ephemeral awareness update.
    pub fn awareness(operation: Vec<u8>) -> Self {
        Self::new(Bucket::Awareness, operation)
    }

    /// Encode as `[bucket tag][operation]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.operation.len());
        out.push(self.bucket as u8);
        out.extend_from_slice(&self.operation);
        out
    }

    /// Decode from `[bucket tag][operation]`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        let (tag, operation) = bytes
            .split_first()
            .ok_or_else(|| SyncError::InvalidData("client message is empty".into()))?;
        Ok(Self {
            bucket: Bucket::try_from(*tag)?,
            operation: operation.to_vec(),
        })
    }
}

impl fmt::Debug for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientMessage")
            .field("bucket", &self.bucket)
            .field(
                "operation",
                &format!("[{} bytes REDACTED]", self.operation.len()),
            )
            .finish()
    }
}

/// The fully sealed form of one or more client messages.
///
/// This is the only representation handed to the relay. The length is
/// always a padding checkpoint plus fixed overhead.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage(Vec<u8>);

impl SealedMessage {
    /// Wrap raw sealed bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the sealed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the sealed bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty (never produced by sealing).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SealedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedMessage([{} bytes])", self.0.len())
    }
}

/// One row of a document's update log as handed back to clients.
///
/// `operation` is opaque to the relay.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Relay-assigned row id.
    pub row_id: RowId,
    /// Opaque stored operation.
    pub operation: Vec<u8>,
}

impl LogEntry {
    /// Create a new log entry.
    pub fn new(row_id: RowId, operation: Vec<u8>) -> Self {
        Self { row_id, operation }
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogEntry")
            .field("row_id", &self.row_id)
            .field("operation", &format!("[{} bytes]", self.operation.len()))
            .finish()
    }
}
