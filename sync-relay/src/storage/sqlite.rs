//! SQLite storage backend for sync-relay.

use super::LogStorage;
use crate::error::StorageError;
use async_trait::async_trait;
use sealed_sync_types::{DocId, LogEntry, RowId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-based document log storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("connections", &self.pool.size())
            .finish()
    }
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection: every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Close every pooled connection, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id TEXT NOT NULL,
                operation BLOB NOT NULL,
                added_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_operations_doc_id ON operations(doc_id, id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl LogStorage for SqliteStorage {
    async fn append(&self, doc_id: &DocId, operation: &[u8]) -> Result<RowId, StorageError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO operations (doc_id, operation, added_at)
            VALUES (?1, ?2, ?3)
            RETURNING id
            "#,
        )
        .bind(doc_id.as_str())
        .bind(operation)
        .bind(Self::current_timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(RowId::new(id as u64))
    }

    async fn get_rows(&self, doc_id: &DocId) -> Result<Vec<LogEntry>, StorageError> {
        let rows = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT id, operation
            FROM operations
            WHERE doc_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(doc_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(LogEntry::from).collect())
    }

    async fn apply_snapshot(
        &self,
        doc_id: &DocId,
        operation: &[u8],
        last_row_id: RowId,
    ) -> Result<RowId, StorageError> {
        // Take the write lock up front so the check cannot go stale
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM operations WHERE doc_id = ?1 AND id = ?2")
                .bind(doc_id.as_str())
                .bind(last_row_id.value() as i64)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            // Dropping the transaction rolls it back
            return Err(StorageError::InvalidSnapshot {
                doc_id: doc_id.to_string(),
                reason: format!("row {last_row_id} is not in the log"),
            });
        }

        sqlx::query("DELETE FROM operations WHERE doc_id = ?1 AND id <= ?2")
            .bind(doc_id.as_str())
            .bind(last_row_id.value() as i64)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO operations (id, doc_id, operation, added_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(last_row_id.value() as i64)
        .bind(doc_id.as_str())
        .bind(operation)
        .bind(Self::current_timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(last_row_id)
    }

    async fn document_size(&self, doc_id: &DocId) -> Result<u64, StorageError> {
        let size: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(LENGTH(operation)) FROM operations WHERE doc_id = ?1",
        )
        .bind(doc_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(size.unwrap_or(0) as u64)
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct OperationRow {
    id: i64,
    operation: Vec<u8>,
}

impl From<OperationRow> for LogEntry {
    fn from(row: OperationRow) -> Self {
        LogEntry::new(RowId::new(row.id as u64), row.operation)
    }
}
