//! SQLite-backed document-index registry.
//!
//! Holds one [`DocumentIndexEntry`] per `(collection, path)` and a singleton
//! row naming the active collection with its timestamps. Rows are scoped by
//! collection id so a full rebuild can fill a shadow collection's rows next
//! to the live ones and switch over in one transaction.
//!
//! # Schema
//!
//! ```text
//! document_index(collection_id, path, document_id, content_hash, modified_at,
//!                indexed_at, chunk_count, vector_ids, size_bytes,
//!                degraded_chunks, status, error)
//! index_metadata(id = 1, collection_id, created_at, updated_at, last_rebuild_at)
//! ```

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::{IndexError, Result};
use crate::models::{DocumentIndexEntry, IndexMetadata, IndexStatus};

/// Handle to the registry database.
#[derive(Clone)]
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    /// Open (creating if needed) the registry at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| IndexError::fs(parent, e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let registry = Self { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    /// Private in-memory registry. One connection, so every query sees the
    /// same database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let registry = Self { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    #[cfg(test)]
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_index (
                collection_id TEXT NOT NULL,
                path TEXT NOT NULL,
                document_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                modified_at INTEGER NOT NULL,
                indexed_at INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                vector_ids TEXT NOT NULL DEFAULT '[]',
                size_bytes INTEGER NOT NULL DEFAULT 0,
                degraded_chunks INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                error TEXT,
                PRIMARY KEY (collection_id, path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                collection_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_rebuild_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============ Document entries ============

    pub async fn get(&self, collection: &str, path: &str) -> Result<Option<DocumentIndexEntry>> {
        let row = sqlx::query(
            "SELECT * FROM document_index WHERE collection_id = ? AND path = ?",
        )
        .bind(collection)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| entry_from_row(&r)).transpose()
    }

    /// Insert or replace the entry for `entry.path`.
    pub async fn upsert(&self, collection: &str, entry: &DocumentIndexEntry) -> Result<()> {
        let vector_ids = serde_json::to_string(&entry.vector_ids)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            r#"
            INSERT INTO document_index (
                collection_id, path, document_id, content_hash, modified_at, indexed_at,
                chunk_count, vector_ids, size_bytes, degraded_chunks, status, error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection_id, path) DO UPDATE SET
                document_id = excluded.document_id,
                content_hash = excluded.content_hash,
                modified_at = excluded.modified_at,
                indexed_at = excluded.indexed_at,
                chunk_count = excluded.chunk_count,
                vector_ids = excluded.vector_ids,
                size_bytes = excluded.size_bytes,
                degraded_chunks = excluded.degraded_chunks,
                status = excluded.status,
                error = excluded.error
            "#,
        )
        .bind(collection)
        .bind(&entry.path)
        .bind(&entry.document_id)
        .bind(&entry.content_hash)
        .bind(entry.modified_at)
        .bind(entry.indexed_at)
        .bind(entry.chunk_count as i64)
        .bind(vector_ids)
        .bind(entry.size_bytes as i64)
        .bind(entry.degraded_chunks as i64)
        .bind(entry.status.as_str())
        .bind(&entry.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark an entry's status without touching its vectors.
    pub async fn set_status(
        &self,
        collection: &str,
        path: &str,
        status: IndexStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE document_index SET status = ?, error = ? WHERE collection_id = ? AND path = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(collection)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, collection: &str, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM document_index WHERE collection_id = ? AND path = ?")
            .bind(collection)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every entry in a collection, ordered by path.
    pub async fn list(&self, collection: &str) -> Result<Vec<DocumentIndexEntry>> {
        let rows = sqlx::query("SELECT * FROM document_index WHERE collection_id = ? ORDER BY path")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Drop every entry in a collection.
    pub async fn clear(&self, collection: &str) -> Result<()> {
        sqlx::query("DELETE FROM document_index WHERE collection_id = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Index metadata ============

    /// Active collection id, if the registry has been initialised.
    pub async fn active_collection(&self) -> Result<Option<String>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT collection_id FROM index_metadata WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    /// Record `collection` as active unless a collection is already recorded.
    /// Returns the active collection id.
    pub async fn init(&self, collection: &str, now: i64) -> Result<String> {
        sqlx::query(
            r#"
            INSERT INTO index_metadata (id, collection_id, created_at, updated_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(self
            .active_collection()
            .await?
            .unwrap_or_else(|| collection.to_string()))
    }

    pub async fn touch(&self, now: i64) -> Result<()> {
        sqlx::query("UPDATE index_metadata SET updated_at = ? WHERE id = 1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Collection summary: counts aggregated from the active collection's
    /// entries plus the stored timestamps.
    pub async fn metadata(&self) -> Result<Option<IndexMetadata>> {
        let row = sqlx::query(
            "SELECT collection_id, created_at, updated_at, last_rebuild_at FROM index_metadata WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let collection_id: String = row.try_get("collection_id")?;

        let entries = self.list(&collection_id).await?;
        let indexed: Vec<&DocumentIndexEntry> = entries
            .iter()
            .filter(|e| e.status != IndexStatus::Error || !e.vector_ids.is_empty())
            .collect();

        Ok(Some(IndexMetadata {
            documents: indexed.len(),
            chunks: indexed.iter().map(|e| e.chunk_count).sum(),
            vectors: indexed.iter().map(|e| e.vector_ids.len()).sum(),
            size_bytes: indexed.iter().map(|e| e.size_bytes).sum(),
            collection_id,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_rebuild_at: row.try_get("last_rebuild_at")?,
        }))
    }

    /// Write back a snapshot taken with [`Registry::metadata`]. Only the
    /// stored fields (collection id and timestamps) are restored; counts are
    /// always derived from entries.
    pub async fn restore_metadata(&self, snapshot: &IndexMetadata) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_metadata (id, collection_id, created_at, updated_at, last_rebuild_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                collection_id = excluded.collection_id,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                last_rebuild_at = excluded.last_rebuild_at
            "#,
        )
        .bind(&snapshot.collection_id)
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .bind(snapshot.last_rebuild_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Make `new` the active collection and drop `old`'s entries, atomically.
    pub async fn swap_collection(&self, old: &str, new: &str, now: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE index_metadata SET collection_id = ?, updated_at = ?, last_rebuild_at = ? WHERE id = 1",
        )
        .bind(new)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM document_index WHERE collection_id = ?")
            .bind(old)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record a completed in-place rebuild.
    pub async fn mark_rebuilt(&self, now: i64) -> Result<()> {
        sqlx::query("UPDATE index_metadata SET updated_at = ?, last_rebuild_at = ? WHERE id = 1")
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Round-trip a trivial query; used by health checks.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<DocumentIndexEntry> {
    let vector_ids: String = row.try_get("vector_ids")?;
    let vector_ids: Vec<String> = serde_json::from_str(&vector_ids).map_err(|e| {
        IndexError::Registry(sqlx::Error::Decode(Box::new(e)))
    })?;
    let status: String = row.try_get("status")?;
    Ok(DocumentIndexEntry {
        document_id: row.try_get("document_id")?,
        path: row.try_get("path")?,
        content_hash: row.try_get("content_hash")?,
        modified_at: row.try_get("modified_at")?,
        indexed_at: row.try_get("indexed_at")?,
        chunk_count: row.try_get::<i64, _>("chunk_count")?.max(0) as usize,
        vector_ids,
        size_bytes: row.try_get::<i64, _>("size_bytes")?.max(0) as u64,
        degraded_chunks: row.try_get::<i64, _>("degraded_chunks")?.max(0) as usize,
        status: IndexStatus::parse(&status),
        error: row.try_get("error")?,
    })
}
