//! # e2e-tests
//!
//! End-to-end harness for sealed-sync.
//!
//! Starts a real relay on a loopback port and connects sync providers to it
//! through [`RelayTransport`](relay_transport::RelayTransport), the framed
//! TCP implementation of the client's log transport contract.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod harness;
pub mod relay_transport;

pub mod scenarios;
