//! # sync-types
//!
//! Wire format types for sealed-sync, end-to-end encrypted collaborative
//! document sync over an untrusted relay.
//!
//! This crate provides the foundational types used across all sealed-sync crates:
//! - [`DocId`], [`RowId`], [`UpdateId`] - Identity and ordering types
//! - [`ClientMessage`], [`Bucket`], [`SealedMessage`], [`LogEntry`] - Update payloads
//! - [`Frame`], [`Message`] - Relay RPC messages
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;
mod update;

pub use envelope::{Frame, PROTOCOL_VERSION, PUSH_REQUEST_ID};
pub use error::SyncError;
pub use ids::{DocId, RowId, UpdateId};
pub use messages::{
    AddUpdate, Appended, ApplySnapshot, DocRows, GetDoc, Listening, Message, NewUpdate, Rejected,
    StartListening, StopListening,
};
pub use update::{Bucket, ClientMessage, LogEntry, SealedMessage};
