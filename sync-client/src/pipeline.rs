//! The crypto pipeline: client messages in, one sealed message out.
//!
//! Sealing runs five stages in a fixed order and unsealing inverts them:
//!
//! ```text
//! seal:   encode list -> pad -> sign -> encrypt -> version tag
//! unseal: strip tag   -> decrypt -> verify -> unpad -> decode list
//! ```
//!
//! Signing the padded plaintext before encryption puts the signature under
//! the AEAD tag, and someone holding only the encryption key still cannot
//! produce a message that verifies.
//!
//! # Volume limits
//!
//! - Seal no more than about 2^32 messages with one encryption key.
//! - Use no more than about 2^48 distinct encryption keys over the lifetime
//!   of one document.
//!
//! Callers that need more must rotate keys ([`CryptoConfig::rotated`]) and
//! snapshot so old rows are re-sealed under the new key.

use std::sync::{Arc, RwLock};

use sealed_sync_core::{
    decode_list_ref, encode_list, pad, padding::validate_checkpoints, unpad, SchemaVersions,
    DEFAULT_CHECKPOINTS,
};
use sealed_sync_types::{ClientMessage, SealedMessage};

use crate::crypto::{self, NONCE_SIZE, TAG_SIZE};
use crate::error::PipelineError;
use crate::keys::EncryptionKey;
use crate::signing::SigningMode;

/// Schema version written by this build.
pub const DEFAULT_SCHEMA_VERSION: &str = "v1";

/// Keys, padding table and schema versions used by every pipeline call.
#[derive(Debug, Clone)]
pub struct CryptoConfig {
    /// Key used to seal and tried first when unsealing.
    pub main_key: EncryptionKey,
    /// Rotated-out keys still accepted when unsealing, tried in order.
    pub old_keys: Vec<EncryptionKey>,
    /// Signature capability.
    pub signing: SigningMode,
    /// Padding checkpoints in bytes.
    pub checkpoints: Vec<usize>,
    /// Current and backward compatible schema versions.
    pub versions: SchemaVersions,
}

impl CryptoConfig {
    /// Config with the default padding table, schema version `v1` and no
    /// signing.
    pub fn new(main_key: EncryptionKey) -> Self {
        Self {
            main_key,
            old_keys: Vec::new(),
            signing: SigningMode::Skip,
            checkpoints: DEFAULT_CHECKPOINTS.to_vec(),
            versions: SchemaVersions::new(DEFAULT_SCHEMA_VERSION),
        }
    }

    /// Also accept messages sealed with `key`.
    pub fn with_old_key(mut self, key: EncryptionKey) -> Self {
        self.old_keys.push(key);
        self
    }

    /// Set the signing mode.
    pub fn with_signing(mut self, signing: SigningMode) -> Self {
        self.signing = signing;
        self
    }

    /// Set the padding checkpoints.
    pub fn with_checkpoints(mut self, checkpoints: Vec<usize>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Set the schema versions.
    pub fn with_versions(mut self, versions: SchemaVersions) -> Self {
        self.versions = versions;
        self
    }

    /// Seal with `new_key` from now on, keeping the current main key first
    /// in line among the old keys.
    pub fn rotated(mut self, new_key: EncryptionKey) -> Self {
        let previous = std::mem::replace(&mut self.main_key, new_key);
        self.old_keys.insert(0, previous);
        self
    }

    /// Check the padding table and version tags.
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_checkpoints(&self.checkpoints)?;
        self.versions.validate()?;
        Ok(())
    }

    /// Size of a sealed message whose padded plaintext is `checkpoint` bytes.
    pub fn sealed_len(&self, checkpoint: usize) -> usize {
        self.versions.tag_len() + NONCE_SIZE + TAG_SIZE + self.signing.overhead() + checkpoint
    }
}

/// Messages recovered from a sealed message, with the version it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsealed {
    /// The client messages, in sealing order.
    pub messages: Vec<ClientMessage>,
    /// Schema version tag of the sealed message.
    pub version: String,
}

/// Seals and unseals client messages under a swappable [`CryptoConfig`].
///
/// Each call works on the config current when it started; a concurrent
/// [`change_config`](Self::change_config) only affects later calls.
#[derive(Debug)]
pub struct CryptoPipeline {
    config: RwLock<Arc<CryptoConfig>>,
}

impl CryptoPipeline {
    /// Create a pipeline after validating `config`.
    pub fn new(config: CryptoConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
        })
    }

    /// The config calls started now would use.
    pub fn config(&self) -> Arc<CryptoConfig> {
        let guard = self.config.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Atomically replace the config (key rotation, new padding table...).
    pub fn change_config(&self, config: CryptoConfig) -> Result<(), PipelineError> {
        config.validate()?;
        let mut guard = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(config);
        Ok(())
    }

    /// Seal a batch of client messages into one sealed message.
    pub fn seal(&self, messages: &[ClientMessage]) -> Result<SealedMessage, PipelineError> {
        let config = self.config();

        let buffers: Vec<Vec<u8>> = messages.iter().map(ClientMessage::to_bytes).collect();
        let encoded = encode_list(&buffers)?;
        let padded = pad(&encoded, &config.checkpoints)?;
        let signed = config.signing.sign(&padded)?;
        let encrypted = crypto::encrypt(&config.main_key, &signed)?;
        let versioned = config.versions.add_version(&encrypted)?;

        Ok(SealedMessage::from_bytes(versioned))
    }

    /// Recover the client messages from a sealed message.
    pub fn unseal(&self, sealed: &SealedMessage) -> Result<Vec<ClientMessage>, PipelineError> {
        Ok(self.unseal_with_version(sealed)?.messages)
    }

    /// Like [`unseal`](Self::unseal), also returning the schema version the
    /// message was sealed with.
    pub fn unseal_with_version(&self, sealed: &SealedMessage) -> Result<Unsealed, PipelineError> {
        let config = self.config();

        let (encrypted, version) = config.versions.strip_and_validate(sealed.as_bytes())?;
        let signed = crypto::decrypt(&config.main_key, &config.old_keys, encrypted)?;
        let padded = config.signing.verify_and_strip(&signed)?;
        let encoded = unpad(&padded)?;
        let messages = decode_list_ref(encoded)?
            .into_iter()
            .map(ClientMessage::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Unsealed { messages, version })
    }
}
