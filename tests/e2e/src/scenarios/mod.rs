//! End-to-end scenarios against a live relay.
//!
//! - `transport` - the log transport contract over framed TCP
//! - `sync` - providers converging through the relay: live edits,
//!   hydration, key rotation, reconnects and log compaction

pub mod sync;
pub mod transport;
