//! Update id envelope around a sealed message.
//!
//! This is the `operation` blob the relay stores:
//! `encode_typed_list([STRING update_id, BINARY sealed])`. The id is visible
//! to the relay; it reveals nothing about the content.

use sealed_sync_types::{SealedMessage, UpdateId};

use crate::codec::{decode_typed_list, encode_typed_list, ListItem};
use crate::error::WireError;

/// A sealed message tagged with the client-generated id of the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedUpdate {
    /// Id shared by every append attempt of this update.
    pub update_id: UpdateId,
    /// The sealed payload.
    pub sealed: SealedMessage,
}

impl TaggedUpdate {
    /// Tag a sealed message with a fresh id.
    pub fn new(sealed: SealedMessage) -> Self {
        Self {
            update_id: UpdateId::new(),
            sealed,
        }
    }

    /// Encode to relay operation bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode_typed_list(&[
            ListItem::String(self.update_id.to_string()),
            ListItem::Binary(self.sealed.as_bytes().to_vec()),
        ])
    }

    /// Decode relay operation bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut items = decode_typed_list(bytes)?.into_iter();
        match (items.next(), items.next(), items.next()) {
            (Some(ListItem::String(id)), Some(ListItem::Binary(sealed)), None) => {
                let update_id = UpdateId::parse(&id)
                    .ok_or_else(|| WireError::malformed(format!("invalid update id {id:?}")))?;
                Ok(Self {
                    update_id,
                    sealed: SealedMessage::from_bytes(sealed),
                })
            }
            _ => Err(WireError::malformed(
                "expected [string update id, binary sealed message]",
            )),
        }
    }
}
