//! # sync-core
//!
//! Pure logic for sealed-sync (no I/O, instant tests).
//!
//! This crate implements the byte-level wire layers and the provider state
//! machine without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, crypto, document access) is performed by
//! `sync-client`, which interprets the actions produced by these state
//! machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod dedup;
pub mod error;
pub mod outbound;
pub mod padding;
pub mod snapshot;
pub mod state;
pub mod tagged;
pub mod tracker;
pub mod version;

pub use codec::{
    decode_list, decode_list_ref, decode_typed_list, encode_list, encode_typed_list, ListItem,
};
pub use dedup::SeenUpdates;
pub use error::WireError;
pub use outbound::{NackOutcome, OutboundQueue, QueueError, QueuedUpdate};
pub use padding::{pad, unpad, DEFAULT_CHECKPOINTS};
pub use snapshot::SnapshotPolicy;
pub use state::{Action, Event, ProviderEvent, ProviderState, ReconnectBackoff};
pub use tagged::TaggedUpdate;
pub use tracker::RowTracker;
pub use version::SchemaVersions;
