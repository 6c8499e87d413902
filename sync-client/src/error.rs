//! Errors from the crypto pipeline.

use sealed_sync_core::WireError;
use sealed_sync_types::SyncError;
use thiserror::Error;

use crate::crypto::CryptoError;

/// Failure of one seal or unseal call.
///
/// The stage that failed is kept intact: callers can tell a schema version
/// mismatch from a decryption failure from a forged signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Encoding, padding or version tag error.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Encryption, decryption or signature error.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A decoded message buffer is not a valid client message.
    #[error("invalid client message: {0}")]
    InvalidMessage(String),

    /// The crypto configuration cannot be used.
    #[error("invalid crypto config: {0}")]
    InvalidConfig(String),
}

impl From<SyncError> for PipelineError {
    fn from(err: SyncError) -> Self {
        Self::InvalidMessage(err.to_string())
    }
}

impl PipelineError {
    /// Whether this failure means "cannot access this document" to a user:
    /// the message is readable in principle but not with this client's keys
    /// or schema version.
    pub fn is_access_failure(&self) -> bool {
        matches!(
            self,
            Self::Crypto(
                CryptoError::DecryptionFailed
                    | CryptoError::SignatureInvalid
                    | CryptoError::InvalidLength { .. }
            ) | Self::Wire(WireError::UnsupportedVersion { .. })
        )
    }
}
