//! PostgreSQL backend (behind the `postgres` cargo feature).
//!
//! Chunks live in one table with the embedding stored as `real[]`; the
//! schema is created on initialize and indexed on `hash` and
//! `source_path`. Similarity is an in-process full-scan cosine, which
//! holds to tens of thousands of chunks; swap in a vector-extension index
//! before growing past that.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::instrument;

use crate::types::{Chunk, EmbeddedChunk};

use super::{cosine_similarity, SearchHit, StoreError, VectorStore};

pub struct PgVectorStore {
    conn_str: String,
    dimension: usize,
    pool: tokio::sync::OnceCell<Arc<PgPool>>,
    initialized: AtomicBool,
}

impl PgVectorStore {
    pub fn new(conn_str: impl Into<String>, dimension: usize) -> Self {
        Self {
            conn_str: conn_str.into(),
            dimension,
            pool: tokio::sync::OnceCell::new(),
            initialized: AtomicBool::new(false),
        }
    }

    async fn pool(&self) -> Result<&Arc<PgPool>, StoreError> {
        self.pool
            .get_or_try_init(|| async {
                let pool = PgPool::connect(&self.conn_str)
                    .await
                    .map_err(|e| StoreError::Unavailable(format!("connect error: {e}")))?;
                Ok(Arc::new(pool))
            })
            .await
    }

    fn ensure_initialized(&self) -> Result<(), StoreError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn chunk_from_row(row: &PgRow) -> Result<Chunk, StoreError> {
        let metadata: serde_json::Value = row
            .try_get("metadata")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Chunk {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            text: row
                .try_get("text")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            title: row
                .try_get("title")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            section: row
                .try_get("section")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            source_path: row
                .try_get("source_path")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            hash: row
                .try_get("hash")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            created_at,
            metadata: serde_json::from_value(metadata)?,
        })
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    #[instrument(skip(self), err)]
    async fn initialize(&self) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                title TEXT NOT NULL,
                section TEXT NOT NULL,
                source_path TEXT NOT NULL,
                hash TEXT NOT NULL,
                embedding REAL[] NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            "#,
        )
        .execute(pool.as_ref())
        .await
        .map_err(|e| StoreError::Backend(format!("create table: {e}")))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS chunks_hash_idx ON chunks (hash)")
            .execute(pool.as_ref())
            .await
            .map_err(|e| StoreError::Backend(format!("create index: {e}")))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS chunks_source_idx ON chunks (source_path)")
            .execute(pool.as_ref())
            .await
            .map_err(|e| StoreError::Backend(format!("create index: {e}")))?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        match self.pool().await {
            Ok(pool) => sqlx::query("SELECT 1").execute(pool.as_ref()).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn upsert(&self, chunk: EmbeddedChunk) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        self.check_dimension(&chunk.embedding)?;
        let pool = self.pool().await?;
        let metadata = serde_json::to_value(&chunk.chunk.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO chunks (id, text, title, section, source_path, hash, embedding, created_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                text = EXCLUDED.text,
                title = EXCLUDED.title,
                section = EXCLUDED.section,
                source_path = EXCLUDED.source_path,
                hash = EXCLUDED.hash,
                embedding = EXCLUDED.embedding,
                metadata = EXCLUDED.metadata
            "#,
        )
        .bind(&chunk.chunk.id)
        .bind(&chunk.chunk.text)
        .bind(&chunk.chunk.title)
        .bind(&chunk.chunk.section)
        .bind(&chunk.chunk.source_path)
        .bind(&chunk.chunk.hash)
        .bind(&chunk.embedding)
        .bind(chunk.chunk.created_at)
        .bind(metadata)
        .execute(pool.as_ref())
        .await
        .map_err(|e| StoreError::Backend(format!("upsert: {e}")))?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.ensure_initialized()?;
        self.check_dimension(query)?;
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT * FROM chunks")
            .fetch_all(pool.as_ref())
            .await
            .map_err(|e| StoreError::Backend(format!("scan: {e}")))?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding: Vec<f32> = row
                .try_get("embedding")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let score = cosine_similarity(query, &embedding);
            if score >= min_score {
                hits.push(SearchHit {
                    chunk: Self::chunk_from_row(row)?,
                    score,
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        self.ensure_initialized()?;
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM chunks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool.as_ref())
            .await
            .map_err(|e| StoreError::Backend(format!("get: {e}")))?;
        row.as_ref().map(Self::chunk_from_row).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_initialized()?;
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM chunks WHERE id = $1")
            .bind(id)
            .execute(pool.as_ref())
            .await
            .map_err(|e| StoreError::Backend(format!("delete: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.ensure_initialized()?;
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks")
            .fetch_one(pool.as_ref())
            .await
            .map_err(|e| StoreError::Backend(format!("count: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(n as usize)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
