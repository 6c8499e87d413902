//! Storage layer for sync-relay.
//!
//! One append-only log per document. Row ids come from a single
//! autoincrement sequence, so they increase in commit order within a
//! document and are unique across documents.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use sealed_sync_types::{DocId, LogEntry, RowId};

/// Trait for document log backends.
#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Append an operation and assign it a row id.
    async fn append(&self, doc_id: &DocId, operation: &[u8]) -> Result<RowId, StorageError>;

    /// All rows of a document, ordered by row id.
    async fn get_rows(&self, doc_id: &DocId) -> Result<Vec<LogEntry>, StorageError>;

    /// Atomically delete rows `<= last_row_id` and store `operation` as row
    /// `last_row_id`.
    ///
    /// `last_row_id` must be a row of the document. Rows with a higher id
    /// are untouched.
    async fn apply_snapshot(
        &self,
        doc_id: &DocId,
        operation: &[u8],
        last_row_id: RowId,
    ) -> Result<RowId, StorageError>;

    /// Total operation bytes stored for a document.
    async fn document_size(&self, doc_id: &DocId) -> Result<u64, StorageError>;
}
