//! Detached Ed25519 signatures over the padded plaintext.
//!
//! A signed buffer is `encode_list([data, signature])`. Signing happens
//! before encryption, so the signature itself is covered by the AEAD tag.

use std::borrow::Cow;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SIGNATURE_LENGTH};
use sealed_sync_core::{codec::LENGTH_PREFIX_SIZE, decode_list_ref, encode_list, WireError};

use crate::crypto::CryptoError;
use crate::error::PipelineError;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = SIGNATURE_LENGTH;

/// What this client may do with signatures.
#[derive(Clone, Default)]
pub enum SigningMode {
    /// No signatures: sign and verify pass data through.
    #[default]
    Skip,
    /// Verify only. Signing fails with `PermissionDenied`.
    Reader {
        /// Key tried first.
        verifying_key: VerifyingKey,
        /// Rotated-out keys, tried in order.
        old_verifying_keys: Vec<VerifyingKey>,
    },
    /// Sign and verify.
    Writer {
        /// Private key; its public half is the main verifying key.
        signing_key: SigningKey,
        /// Rotated-out keys, tried in order.
        old_verifying_keys: Vec<VerifyingKey>,
    },
}

impl SigningMode {
    /// Verify-only mode.
    pub fn reader(verifying_key: VerifyingKey) -> Self {
        Self::Reader {
            verifying_key,
            old_verifying_keys: Vec::new(),
        }
    }

    /// Sign-and-verify mode.
    pub fn writer(signing_key: SigningKey) -> Self {
        Self::Writer {
            signing_key,
            old_verifying_keys: Vec::new(),
        }
    }

    /// Also accept signatures from a rotated-out key. No-op in `Skip` mode.
    pub fn with_old_verifying_key(mut self, key: VerifyingKey) -> Self {
        match &mut self {
            Self::Skip => {}
            Self::Reader {
                old_verifying_keys, ..
            }
            | Self::Writer {
                old_verifying_keys, ..
            } => old_verifying_keys.push(key),
        }
        self
    }

    /// Whether [`sign`](Self::sign) can succeed.
    pub fn can_sign(&self) -> bool {
        !matches!(self, Self::Reader { .. })
    }

    /// Bytes that signing adds around the data.
    pub fn overhead(&self) -> usize {
        match self {
            Self::Skip => 0,
            _ => 2 * LENGTH_PREFIX_SIZE + SIGNATURE_SIZE,
        }
    }

    /// Main verifying key, if any.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        match self {
            Self::Skip => None,
            Self::Reader { verifying_key, .. } => Some(*verifying_key),
            Self::Writer { signing_key, .. } => Some(signing_key.verifying_key()),
        }
    }

    /// Sign `data`.
    pub fn sign<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>, PipelineError> {
        match self {
            Self::Skip => Ok(Cow::Borrowed(data)),
            Self::Reader { .. } => Err(CryptoError::PermissionDenied.into()),
            Self::Writer { signing_key, .. } => {
                let signature = signing_key.sign(data);
                let signed = encode_list(&[data, signature.to_bytes().as_slice()])?;
                Ok(Cow::Owned(signed))
            }
        }
    }

    /// Check the signature on `signed` and return the data it covers.
    pub fn verify_and_strip<'a>(&self, signed: &'a [u8]) -> Result<Cow<'a, [u8]>, PipelineError> {
        let (main, old) = match self {
            Self::Skip => return Ok(Cow::Borrowed(signed)),
            Self::Reader {
                verifying_key,
                old_verifying_keys,
            } => (*verifying_key, old_verifying_keys),
            Self::Writer {
                signing_key,
                old_verifying_keys,
            } => (signing_key.verifying_key(), old_verifying_keys),
        };

        let items = decode_list_ref(signed)?;
        let [data, signature] = items.as_slice() else {
            return Err(WireError::MalformedEncoding {
                reason: format!("signed data has {} elements, expected 2", items.len()),
            }
            .into());
        };
        let signature_bytes: &[u8; SIGNATURE_SIZE] = (*signature)
            .try_into()
            .map_err(|_| CryptoError::SignatureInvalid)?;
        let signature = Signature::from_bytes(signature_bytes);

        let verified = std::iter::once(&main)
            .chain(old)
            .any(|key| key.verify_strict(data, &signature).is_ok());
        if verified {
            Ok(Cow::Owned(data.to_vec()))
        } else {
            Err(CryptoError::SignatureInvalid.into())
        }
    }
}

fn fingerprint(key: &VerifyingKey) -> String {
    hex::encode(&key.as_bytes()[..8])
}

// Never print the private key; public keys show as short fingerprints
impl std::fmt::Debug for SigningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "Skip"),
            Self::Reader {
                verifying_key,
                old_verifying_keys,
            } => f
                .debug_struct("Reader")
                .field("verifying_key", &fingerprint(verifying_key))
                .field("old_verifying_keys", &old_verifying_keys.len())
                .finish(),
            Self::Writer {
                signing_key,
                old_verifying_keys,
            } => f
                .debug_struct("Writer")
                .field("signing_key", &"[REDACTED]")
                .field("verifying_key", &fingerprint(&signing_key.verifying_key()))
                .field("old_verifying_keys", &old_verifying_keys.len())
                .finish(),
        }
    }
}
