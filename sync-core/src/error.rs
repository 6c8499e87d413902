//! Error type for the byte-level wire layers.

use thiserror::Error;

/// Errors from list encoding, padding and schema versioning.
///
/// Every variant means the whole sealed message is unusable; none of them
/// are retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Length-prefixed data is truncated or otherwise corrupt.
    #[error("malformed encoding: {reason}")]
    MalformedEncoding {
        /// What was wrong with the input.
        reason: String,
    },

    /// A list element cannot be described by a 32-bit length prefix.
    #[error("list element too large: {len} bytes")]
    ElementTooLarge {
        /// Size of the offending element.
        len: usize,
    },

    /// Plaintext does not fit the largest padding checkpoint.
    #[error("data too long: {len} bytes (largest checkpoint holds {capacity})")]
    DataTooLong {
        /// Length of the data to pad.
        len: usize,
        /// Usable bytes of the largest checkpoint (checkpoint - 1).
        capacity: usize,
    },

    /// Padding suffix is not `0x80` followed by zero bytes.
    #[error("invalid padding")]
    InvalidPadding,

    /// The padding table cannot be used.
    #[error("invalid padding checkpoints: {reason}")]
    InvalidCheckpoints {
        /// Why the table was rejected.
        reason: String,
    },

    /// Schema version tag is neither current nor backward compatible.
    #[error("unsupported schema version: {found}")]
    UnsupportedVersion {
        /// The tag found on the message.
        found: String,
    },

    /// A configured version string cannot be used as a tag.
    #[error("invalid version tag: {reason}")]
    InvalidVersionTag {
        /// Why the tag was rejected.
        reason: String,
    },
}

impl WireError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEncoding {
            reason: reason.into(),
        }
    }
}
