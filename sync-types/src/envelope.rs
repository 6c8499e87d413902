//! Frame - the wire wrapper for relay RPC messages.

use serde::{Deserialize, Serialize};

use crate::{Message, SyncError};

/// Current relay protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Request id reserved for server-initiated pushes.
pub const PUSH_REQUEST_ID: u64 = 0;

/// A message plus the metadata needed to run RPC over a message transport.
///
/// Responses echo the `request_id` of the request they answer. Pushes from
/// the relay (`NewUpdate`) use [`PUSH_REQUEST_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Correlates a response with its request
    pub request_id: u64,
    /// The carried message
    pub message: Message,
}

impl Frame {
    /// Create a request or response frame.
    pub fn new(request_id: u64, message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id,
            message,
        }
    }

    /// Create a server push frame.
    pub fn push(message: Message) -> Self {
        Self::new(PUSH_REQUEST_ID, message)
    }

    /// Whether this frame is a server push rather than a response.
    pub fn is_push(&self) -> bool {
        self.request_id == PUSH_REQUEST_ID
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes, rejecting unknown versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        let frame: Self = rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)?;
        if frame.version != PROTOCOL_VERSION {
            return Err(SyncError::UnsupportedVersion(frame.version));
        }
        Ok(frame)
    }
}
