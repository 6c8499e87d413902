//! Error types for sync-relay.

/// Main error type for sync-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Operation larger than the configured limit.
    #[error("operation too large: {size} bytes (limit: {limit} bytes)")]
    OperationTooLarge {
        /// Actual size of the operation.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Document log would exceed its size limit.
    #[error("document size limit exceeded: {doc_id} (limit: {limit} bytes)")]
    DocumentTooLarge {
        /// The document.
        doc_id: String,
        /// The size limit in bytes.
        limit: usize,
    },

    /// Snapshot request does not fit the log.
    #[error("invalid snapshot for {doc_id}: {reason}")]
    InvalidSnapshot {
        /// The document.
        doc_id: String,
        /// Why it was refused.
        reason: String,
    },
}

impl StorageError {
    /// Whether the request itself was refused, as opposed to the storage
    /// failing.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Database(_))
    }
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame does not decode.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Reason the frame is invalid.
        reason: String,
    },

    /// Frame longer than the protocol maximum.
    #[error("frame too large: {size} bytes (limit: {limit} bytes)")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Maximum frame size.
        limit: usize,
    },

    /// Message a client may not send.
    #[error("unexpected message: {kind}")]
    UnexpectedMessage {
        /// Message kind received.
        kind: String,
    },

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
