//! Append-only audit store for indexed chunks, backed by SQLite through `sqlx`.
//!
//! The retrieval path never reads from here; rows exist so an operator can inspect what was
//! embedded for a document after the fact.

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Errors raised by the chunk store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver failure.
    #[error("Chunk store failure: {0}")]
    Database(#[from] sqlx::Error),
    /// Embedding could not be encoded or decoded as JSON.
    #[error("Chunk store encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// One chunk as written by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    /// Chunk identifier (`{document_id}_{ordinal}`).
    pub chunk_id: String,
    /// URL of the source document.
    pub document_url: String,
    /// Chunk text.
    pub text: String,
    /// Embedding of the text.
    pub embedding: Vec<f32>,
}

/// Handle to the SQLite chunk table.
#[derive(Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    /// Open (creating if needed) the database at `url` and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // In-memory databases are per connection.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(url = %url, "Chunk store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id TEXT NOT NULL,
                document_url TEXT NOT NULL,
                chunk_text TEXT NOT NULL,
                embedding TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_document_chunks_url ON document_chunks(document_url)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append a batch of chunks in one transaction. Returns the number of rows written.
    pub async fn append_chunks(&self, chunks: &[StoredChunk]) -> Result<usize, StoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());

        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            let embedding = serde_json::to_string(&chunk.embedding)?;
            sqlx::query(
                r#"
                INSERT INTO document_chunks
                    (chunk_id, document_url, chunk_text, embedding, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.document_url)
            .bind(&chunk.text)
            .bind(embedding)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(rows = chunks.len(), "Chunks appended to store");
        Ok(chunks.len())
    }

    /// Every row stored for `document_url`, in insertion order.
    pub async fn chunks_for_document(
        &self,
        document_url: &str,
    ) -> Result<Vec<StoredChunk>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_url, chunk_text, embedding
            FROM document_chunks
            WHERE document_url = ?
            ORDER BY id
            "#,
        )
        .bind(document_url)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let embedding: String = row.try_get("embedding")?;
                Ok(StoredChunk {
                    chunk_id: row.try_get("chunk_id")?,
                    document_url: row.try_get("document_url")?,
                    text: row.try_get("chunk_text")?,
                    embedding: serde_json::from_str(&embedding)?,
                })
            })
            .collect()
    }
}
