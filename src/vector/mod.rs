//! Pluggable vector storage with cosine-similarity search.
//!
//! Every backend implements the same [`VectorStore`] capability:
//! initialize, health-check, upsert (idempotent on id), per-item batch
//! upsert, k-NN cosine search with a score floor, point reads, deletes,
//! and a best-effort count.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ VectorStore trait│
//!                  └────────┬─────────┘
//!          ┌────────────┬───┴──────────┬─────────────┐
//!          ▼            ▼              ▼             ▼
//!   ┌────────────┐ ┌──────────┐ ┌────────────┐ ┌──────────┐
//!   │  JSON file │ │  Qdrant  │ │  Postgres  │ │  Cosmos  │
//!   │ in-process │ │   HTTP   │ │   (sqlx)   │ │   REST   │
//!   └────────────┘ └──────────┘ └────────────┘ └──────────┘
//! ```
//!
//! Similarity is cosine (`dot / (‖a‖·‖b‖)`); a zero-magnitude vector on
//! either side scores 0 rather than NaN. Backends without a native ANN
//! index fall back to an in-process full scan, which holds up to tens of
//! thousands of chunks.

pub mod json;
pub mod qdrant;

#[cfg(feature = "postgres")]
pub mod postgres;

pub mod cosmos;

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::config::{ConfigError, Settings, VectorBackend};
use crate::types::{Chunk, EmbeddedChunk};

pub use json::JsonVectorStore;
pub use qdrant::QdrantVectorStore;

/// Default embedding dimension when none is configured.
pub const DEFAULT_DIMENSION: usize = 1536;

/// Score floor applied by the retriever.
pub const DEFAULT_MIN_SCORE: f32 = 0.1;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("vector store is not initialized")]
    #[diagnostic(
        code(safetydesk::vector::not_initialized),
        help("Call initialize() before upsert or search.")
    )]
    NotInitialized,

    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    #[diagnostic(code(safetydesk::vector::dimension_mismatch))]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store unavailable: {0}")]
    #[diagnostic(code(safetydesk::vector::unavailable))]
    Unavailable(String),

    #[error("vector store backend error: {0}")]
    #[diagnostic(code(safetydesk::vector::backend))]
    Backend(String),

    #[error(transparent)]
    #[diagnostic(code(safetydesk::vector::serde))]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(safetydesk::vector::io))]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(safetydesk::vector::config))]
    Config(#[from] ConfigError),
}

/// One search result: the chunk and its cosine similarity to the query.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Per-item outcome of a batch upsert.
///
/// The batch is atomic per item, not across the batch; failures are
/// surfaced here instead of aborting the remainder.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, StoreError)>,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Capability set every vector backend implements.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the backing collection if absent. Must be called before any
    /// upsert or search.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Whether the backend is reachable. Must not error.
    async fn health_check(&self) -> bool;

    /// Insert or overwrite a chunk by id.
    async fn upsert(&self, chunk: EmbeddedChunk) -> Result<(), StoreError>;

    /// Upsert many chunks; per-item errors are collected, not propagated.
    /// Backends with native batch writes override this loop.
    async fn upsert_batch(&self, chunks: Vec<EmbeddedChunk>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for chunk in chunks {
            let id = chunk.chunk.id.clone();
            match self.upsert(chunk).await {
                Ok(()) => outcome.succeeded.push(id),
                Err(err) => outcome.failed.push((id, err)),
            }
        }
        outcome
    }

    /// Return at most `top_k` hits with similarity ≥ `min_score`, sorted by
    /// descending similarity.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>, StoreError>;

    /// Delete by id; `false` when the id was absent.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Best-effort count; eventual consistency on remote backends is fine.
    async fn count(&self) -> Result<usize, StoreError>;

    /// The fixed embedding dimension of this store.
    fn dimension(&self) -> usize;
}

/// Cosine similarity in `[-1, 1]`.
///
/// Zero magnitude on either side yields 0. Callers are responsible for
/// dimension checks; mismatched lengths compare over the shorter prefix of
/// the dot product and are caught earlier by the stores.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Construct the configured vector store backend.
///
/// The store is returned uninitialized; call
/// [`VectorStore::initialize`] before first use.
pub fn create_vector_store(settings: &Settings) -> Result<Arc<dyn VectorStore>, StoreError> {
    match settings.vector_backend {
        VectorBackend::Json => Ok(Arc::new(JsonVectorStore::in_memory(
            settings.embedding_dimension,
        ))),
        VectorBackend::Qdrant => {
            let endpoint = settings
                .qdrant_endpoint
                .clone()
                .ok_or(ConfigError::Missing {
                    key: "QDRANT_ENDPOINT",
                })?;
            Ok(Arc::new(QdrantVectorStore::new(
                endpoint,
                "ohs_chunks",
                settings.embedding_dimension,
            )))
        }
        VectorBackend::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let conn = settings.pg_conn_str.clone().ok_or(ConfigError::Missing {
                    key: "PG_CONN_STR",
                })?;
                Ok(Arc::new(postgres::PgVectorStore::new(
                    conn,
                    settings.embedding_dimension,
                )))
            }
            #[cfg(not(feature = "postgres"))]
            {
                Err(ConfigError::FeatureGated {
                    backend: "postgres",
                    feature: "postgres",
                }
                .into())
            }
        }
        VectorBackend::Cosmos => {
            let conn = settings
                .cosmos_conn_str
                .clone()
                .ok_or(ConfigError::Missing {
                    key: "COSMOS_CONN_STR",
                })?;
            Ok(Arc::new(cosmos::CosmosVectorStore::from_conn_str(
                &conn,
                "safetydesk",
                settings.embedding_dimension,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_equal_vectors_is_one() {
        let v = vec![0.3f32, -0.4, 0.5];
        let score = cosine_similarity(&v, &v);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let score = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(score.abs() < 1e-6);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero_not_nan() {
        let score = cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]);
        assert_eq!(score, 0.0);
        assert!(!score.is_nan());
    }

    #[test]
    fn cosine_of_opposite_vectors_is_minus_one() {
        let score = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]);
        assert!((score + 1.0).abs() < 1e-6);
    }
}
