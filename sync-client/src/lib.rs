//! # sync-client
//!
//! Client library for sealed-sync: end-to-end encrypted CRDT sync over an
//! append-only relay log.
//!
//! The relay only ever sees sealed messages: padded to a fixed size table,
//! encrypted, optionally signed, and tagged with a schema version.
//!
//! ## Features
//!
//! - **Crypto Pipeline**: encode, pad, sign, encrypt, version (and back)
//! - **Device-Adaptive Key Derivation**: Argon2id scales with available RAM
//! - **Transport Abstraction**: any relay connection implementing [`LogTransport`]
//! - **Sync Provider**: hydration, live streaming, snapshots and reconnects,
//!   driven by the pure state machine in sync-core
//!
//! ## Example
//!
//! ```ignore
//! use sealed_sync_client::{CryptoConfig, DocumentSecret, MemoryDocument};
//! use sealed_sync_client::{MockTransport, ProviderConfig, SyncProvider};
//! use sealed_sync_types::DocId;
//!
//! let (secret, _salt) = DocumentSecret::from_passphrase("correct horse")?;
//! let crypto = CryptoConfig::new(secret.encryption_key(0)?);
//! let provider = SyncProvider::spawn(
//!     MockTransport::new(),
//!     MemoryDocument::new(1),
//!     crypto,
//!     ProviderConfig::new(DocId::new("notes")),
//! )?;
//! provider.wait_for_live().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod document;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod provider;
pub mod signing;
pub mod transport;

pub use crypto::{decrypt, encrypt, CryptoError, NONCE_SIZE, TAG_SIZE};
pub use document::{CrdtDocument, DocumentError, MemoryDocument};
pub use error::PipelineError;
pub use keys::{Argon2Params, DocumentSecret, EncryptionKey, KEY_SIZE, SALT_SIZE};
pub use pipeline::{CryptoConfig, CryptoPipeline, Unsealed, DEFAULT_SCHEMA_VERSION};
pub use provider::{ProviderConfig, ProviderError, SyncProvider, SyncSession};
pub use signing::SigningMode;
pub use transport::{
    LinkStatus, LogTransport, MockRelay, MockTransport, Subscription, SubscriptionId,
    TransportError,
};
