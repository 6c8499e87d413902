//! Authenticated encryption for sealed messages.
//!
//! Layout of an encrypted buffer: `nonce (12) || ciphertext || tag (16)`.
//!
//! # Security Notes
//!
//! - ChaCha20-Poly1305 (IETF) with a fresh random 96-bit nonce per call.
//! - **A single key must never encrypt more than 2^32 messages.** Past that
//!   point a random nonce collision becomes a real risk and a collision
//!   breaks both confidentiality and integrity. Nothing here counts
//!   messages; rotate to a new key generation and snapshot well before.
//! - Decryption tries the main key and then each old key. A failure does not
//!   say whether the key was wrong or the data was tampered with.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use thiserror::Error;

use crate::keys::EncryptionKey;

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Shorter inputs are rejected before any key is tried.
pub const MIN_ENCRYPTED_LEN: usize = 14;

/// Crypto errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// No configured key could authenticate the ciphertext.
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Encrypted buffer too short to hold a nonce.
    #[error("invalid ciphertext length: {len} bytes (minimum {MIN_ENCRYPTED_LEN})")]
    InvalidLength {
        /// Length of the rejected input.
        len: usize,
    },

    /// Signature did not verify against any known key.
    #[error("signature invalid")]
    SignatureInvalid,

    /// Signing attempted without a signing key.
    #[error("permission denied: signing requires writer mode")]
    PermissionDenied,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
}

/// Encrypt `plaintext` under `key` with a random nonce.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce_bytes).expect("getrandom failed");

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a buffer produced by [`encrypt`].
///
/// Tries `main` first, then `old_keys` in order.
pub fn decrypt(
    main: &EncryptionKey,
    old_keys: &[EncryptionKey],
    encrypted: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if encrypted.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidLength {
            len: encrypted.len(),
        });
    }
    let (nonce, ciphertext) = encrypted.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce);

    std::iter::once(main)
        .chain(old_keys)
        .find_map(|key| {
            ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
                .decrypt(nonce, ciphertext)
                .ok()
        })
        .ok_or(CryptoError::DecryptionFailed)
}
