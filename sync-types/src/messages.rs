//! Relay RPC messages for sealed-sync.
//!
//! Clients and the relay exchange these inside a [`Frame`](crate::Frame).
//! Every payload the relay handles is opaque to it.

use serde::{Deserialize, Serialize};

use crate::{DocId, LogEntry, RowId, SyncError};

/// All relay protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Subscribe to new rows of a document
    StartListening(StartListening),
    /// Unsubscribe from a document
    StopListening(StopListening),
    /// Append one update to a document log
    AddUpdate(AddUpdate),
    /// Replace a log prefix with a snapshot
    ApplySnapshot(ApplySnapshot),
    /// Fetch the full log of a document
    GetDoc(GetDoc),
    /// Subscription state acknowledgement
    Listening(Listening),
    /// A row was written (append or snapshot)
    Appended(Appended),
    /// The relay refused a write
    Rejected(Rejected),
    /// Full log of a document
    DocRows(DocRows),
    /// Server push: a new row is available
    NewUpdate(NewUpdate),
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StartListening(_) => "StartListening",
            Message::StopListening(_) => "StopListening",
            Message::AddUpdate(_) => "AddUpdate",
            Message::ApplySnapshot(_) => "ApplySnapshot",
            Message::GetDoc(_) => "GetDoc",
            Message::Listening(_) => "Listening",
            Message::Appended(_) => "Appended",
            Message::Rejected(_) => "Rejected",
            Message::DocRows(_) => "DocRows",
            Message::NewUpdate(_) => "NewUpdate",
        }
    }
}

/// Start receiving `NewUpdate` pushes for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartListening {
    /// Target document
    pub doc_id: DocId,
}

/// Stop receiving pushes for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopListening {
    /// Target document
    pub doc_id: DocId,
}

/// Append an opaque operation to a document log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddUpdate {
    /// Target document
    pub doc_id: DocId,
    /// Opaque operation bytes
    pub operation: Vec<u8>,
}

/// Atomically delete rows `<= last_row_id` and insert `operation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySnapshot {
    /// Target document
    pub doc_id: DocId,
    /// Opaque snapshot operation bytes
    pub operation: Vec<u8>,
    /// Highest row the snapshot replaces
    pub last_row_id: RowId,
}

/// Request the full log of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDoc {
    /// Target document
    pub doc_id: DocId,
}

/// Acknowledges StartListening / StopListening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listening {
    /// Document the acknowledgement is for
    pub doc_id: DocId,
    /// Whether the session is now subscribed
    pub active: bool,
}

/// Successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appended {
    /// Row id assigned to the written operation
    pub row_id: RowId,
}

/// Refused request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejected {
    /// Human-readable reason
    pub error_message: String,
}

/// Response to GetDoc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRows {
    /// Document the rows belong to
    pub doc_id: DocId,
    /// Rows ordered by row id
    pub rows: Vec<LogEntry>,
}

/// Server push for a newly appended row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUpdate {
    /// Document the row belongs to
    pub doc_id: DocId,
    /// Row id of the new row
    pub row_id: RowId,
    /// Opaque operation bytes
    pub operation: Vec<u8>,
}
