//! Key material for sealed documents.
//!
//! This module provides:
//! - Device-adaptive Argon2id derivation of a [`DocumentSecret`] (12-64 MiB
//!   based on RAM)
//! - HKDF-SHA256 derivation of per-generation [`EncryptionKey`]s and the
//!   document's Ed25519 signing key from that secret
//!
//! How a secret reaches other devices is up to the application.
//!
//! # Security Notes
//!
//! - Every key type zeroizes on drop and redacts itself in `Debug`
//! - A fresh encryption generation must be used long before 2^32 messages
//!   have been sealed with the current one (see [`crate::crypto`])

use argon2::{Algorithm, Argon2, Params, Version};
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::CryptoError;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Size of the random salt generated for a new passphrase.
pub const SALT_SIZE: usize = 16;

/// Shortest salt Argon2 accepts.
pub const MIN_SALT_SIZE: usize = 8;

const HKDF_SALT: &[u8] = b"sealed-sync-document-key-v1";
const ENCRYPTION_INFO: &[u8] = b"sealed-sync encryption";
const SIGNING_INFO: &[u8] = b"sealed-sync signing";

/// Argon2id parameters for device-adaptive key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    memory_mib: u32,
    iterations: u32,
    parallelism: u32,
}

impl Argon2Params {
    /// Create parameters based on available RAM in MB.
    ///
    /// Scaling:
    /// - < 2000 MB: 12 MiB, 3 iterations (low-end mobile)
    /// - < 4000 MB: 19 MiB, 2 iterations (mid-range mobile)
    /// - < 8000 MB: 46 MiB, 1 iteration (high-end mobile)
    /// - >= 8000 MB: 64 MiB, 3 iterations (desktop)
    pub fn for_ram_mb(ram_mb: u64) -> Self {
        let (memory_mib, iterations, parallelism) = match ram_mb {
            0..=1999 => (12, 3, 1),
            2000..=3999 => (19, 2, 1),
            4000..=7999 => (46, 1, 1),
            _ => (64, 3, 4),
        };
        Self {
            memory_mib,
            iterations,
            parallelism,
        }
    }

    /// Get memory in MiB.
    pub fn memory_mib(&self) -> u32 {
        self.memory_mib
    }

    /// Get iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn to_argon2_params(self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_mib * 1024,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
    }
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self::for_ram_mb(detect_available_ram_mb())
    }
}

/// Detect total RAM in megabytes.
pub fn detect_available_ram_mb() -> u64 {
    use sysinfo::System;
    let sys = System::new_all();
    sys.total_memory() / (1024 * 1024)
}

/// Root secret of one document, shared by everyone allowed to read it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DocumentSecret([u8; KEY_SIZE]);

impl DocumentSecret {
    /// Derive a secret from a passphrase with a fresh random salt.
    ///
    /// The salt must travel with the passphrase so other devices derive the
    /// same secret.
    pub fn from_passphrase(passphrase: &str) -> Result<(Self, [u8; SALT_SIZE]), CryptoError> {
        let mut salt = [0u8; SALT_SIZE];
        getrandom::getrandom(&mut salt).expect("getrandom failed");
        let secret = Self::from_passphrase_with_salt(passphrase, &salt, Argon2Params::default())?;
        Ok((secret, salt))
    }

    /// Derive a secret from a passphrase and a known salt.
    pub fn from_passphrase_with_salt(
        passphrase: &str,
        salt: &[u8],
        params: Argon2Params,
    ) -> Result<Self, CryptoError> {
        if salt.len() < MIN_SALT_SIZE {
            return Err(CryptoError::KeyDerivationFailed(format!(
                "salt must be at least {MIN_SALT_SIZE} bytes, got {}",
                salt.len()
            )));
        }
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2_params()?);

        let mut output = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut output)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(output))
    }

    /// Create a random secret.
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derive the encryption key of one key generation.
    ///
    /// Rotating keys means moving to the next generation and keeping the
    /// previous ones as old keys.
    pub fn encryption_key(&self, generation: u32) -> Result<EncryptionKey, CryptoError> {
        let mut info = Vec::with_capacity(ENCRYPTION_INFO.len() + 4);
        info.extend_from_slice(ENCRYPTION_INFO);
        info.extend_from_slice(&generation.to_be_bytes());
        let mut key = [0u8; KEY_SIZE];
        self.expand(&info, &mut key)?;
        Ok(EncryptionKey(key))
    }

    /// Derive the document's Ed25519 signing key.
    pub fn signing_key(&self) -> Result<SigningKey, CryptoError> {
        let mut seed = [0u8; KEY_SIZE];
        self.expand(SIGNING_INFO, &mut seed)?;
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(key)
    }

    fn expand(&self, info: &[u8], out: &mut [u8]) -> Result<(), CryptoError> {
        Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.0)
            .expand(info, out)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for DocumentSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocumentSecret([REDACTED])")
    }
}

/// A 256-bit ChaCha20-Poly1305 key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a random key.
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Short non-secret identifier for logs (first 4 bytes of SHA-256).
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(self.0)[..4])
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey([REDACTED] {})", self.fingerprint())
    }
}
