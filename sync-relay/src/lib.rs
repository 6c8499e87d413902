//! # sealed-sync-relay
//!
//! Payload-agnostic document log relay.
//!
//! The relay stores one append-only log of opaque operations per document
//! and never looks inside them. Clients:
//! - append operations and receive the row id the relay assigned
//! - fetch every row of a document
//! - listen to a document and get each new row pushed, their own included
//! - replace a prefix of the log with a snapshot row in one transaction
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │   framed TCP       │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │     sealed-sync-relay      │
//!        │  ┌──────────────────────┐  │
//!        │  │ SQLite (operations)  │  │
//!        │  └──────────────────────┘  │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Length-prefixed MessagePack [`Frame`](sealed_sync_types::Frame)s, see
//! [`protocol`]. Each request is answered with a frame carrying the same
//! request id:
//! - StartListening / StopListening → Listening
//! - AddUpdate → Appended (plus a NewUpdate push to every listener)
//! - ApplySnapshot → Appended
//! - GetDoc → DocRows
//!
//! Any refused request is answered with Rejected.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod limits;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
