//! In-process vector store with optional JSON-file persistence.
//!
//! The default backend for demo mode and tests. Chunks live in a
//! concurrent map; when a path is configured the whole collection is
//! rewritten to disk after each mutation, and reloaded on initialize.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::types::{Chunk, EmbeddedChunk};

use super::{cosine_similarity, SearchHit, StoreError, VectorStore};

pub struct JsonVectorStore {
    dimension: usize,
    path: Option<PathBuf>,
    chunks: RwLock<FxHashMap<String, EmbeddedChunk>>,
    initialized: AtomicBool,
}

impl JsonVectorStore {
    /// Purely in-memory store (no persistence).
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            dimension,
            path: None,
            chunks: RwLock::new(FxHashMap::default()),
            initialized: AtomicBool::new(false),
        }
    }

    /// File-backed store; the collection is loaded on initialize and
    /// rewritten after every mutation.
    pub fn with_path(path: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            dimension,
            path: Some(path.into()),
            chunks: RwLock::new(FxHashMap::default()),
            initialized: AtomicBool::new(false),
        }
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

    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = {
            let chunks = self.chunks.read();
            let all: Vec<&EmbeddedChunk> = chunks.values().collect();
            serde_json::to_vec_pretty(&all)?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for JsonVectorStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                let raw = tokio::fs::read(path).await?;
                let loaded: Vec<EmbeddedChunk> = serde_json::from_slice(&raw)?;
                let mut chunks = self.chunks.write();
                for chunk in loaded {
                    if chunk.embedding.len() == self.dimension {
                        chunks.insert(chunk.chunk.id.clone(), chunk);
                    }
                }
                debug!(count = chunks.len(), "loaded vector collection from disk");
            }
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn upsert(&self, chunk: EmbeddedChunk) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        self.check_dimension(&chunk.embedding)?;
        self.chunks
            .write()
            .insert(chunk.chunk.id.clone(), chunk);
        self.persist().await
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.ensure_initialized()?;
        self.check_dimension(query)?;
        let mut hits: Vec<SearchHit> = {
            let chunks = self.chunks.read();
            chunks
                .values()
                .map(|entry| SearchHit {
                    chunk: entry.chunk.clone(),
                    score: cosine_similarity(query, &entry.embedding),
                })
                .filter(|hit| hit.score >= min_score)
                .collect()
        };
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        self.ensure_initialized()?;
        Ok(self.chunks.read().get(id).map(|entry| entry.chunk.clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_initialized()?;
        let removed = self.chunks.write().remove(id).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.ensure_initialized()?;
        Ok(self.chunks.read().len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded(id: &str, text: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk::new(Chunk::new(id, text, "Title", "Section", "src.md"), vector)
    }

    #[tokio::test]
    async fn rejects_use_before_initialize() {
        let store = JsonVectorStore::in_memory(3);
        let err = store
            .upsert(embedded("a", "text", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized));
        assert!(matches!(
            store.search(&[1.0, 0.0, 0.0], 1, 0.0).await.unwrap_err(),
            StoreError::NotInitialized
        ));
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let store = JsonVectorStore::in_memory(2);
        store.initialize().await.unwrap();
        store
            .upsert(embedded("a", "first", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(embedded("a", "second", vec![0.0, 1.0]))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get_by_id("a").await.unwrap().unwrap().text, "second");
    }

    #[tokio::test]
    async fn search_orders_and_filters() {
        let store = JsonVectorStore::in_memory(2);
        store.initialize().await.unwrap();
        store
            .upsert(embedded("close", "near", vec![1.0, 0.1]))
            .await
            .unwrap();
        store
            .upsert(embedded("far", "orthogonal", vec![0.0, 1.0]))
            .await
            .unwrap();
        store
            .upsert(embedded("exact", "same", vec![1.0, 0.0]))
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 10, 0.1).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_invalid_argument() {
        let store = JsonVectorStore::in_memory(3);
        store.initialize().await.unwrap();
        let err = store
            .upsert(embedded("a", "text", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn batch_upsert_reports_per_item_failures() {
        let store = JsonVectorStore::in_memory(2);
        store.initialize().await.unwrap();
        let outcome = store
            .upsert_batch(vec![
                embedded("good", "ok", vec![1.0, 0.0]),
                embedded("bad", "wrong dim", vec![1.0]),
                embedded("also-good", "ok", vec![0.0, 1.0]),
            ])
            .await;
        assert_eq!(outcome.succeeded, vec!["good", "also-good"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "bad");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn persists_and_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");

        let store = JsonVectorStore::with_path(&path, 2);
        store.initialize().await.unwrap();
        store
            .upsert(embedded("a", "persisted", vec![1.0, 0.0]))
            .await
            .unwrap();
        drop(store);

        let reloaded = JsonVectorStore::with_path(&path, 2);
        reloaded.initialize().await.unwrap();
        assert_eq!(reloaded.count().await.unwrap(), 1);
        assert_eq!(
            reloaded.get_by_id("a").await.unwrap().unwrap().text,
            "persisted"
        );
    }
}
