//! Cosmos DB document backend.
//!
//! Documents hold the chunk and its embedding side by side; similarity is
//! computed in process over a full scan of the container, which is fine to
//! tens of thousands of chunks. Document ids are derived from the chunk id
//! so upsert overwrites by id regardless of characters Cosmos disallows in
//! ids.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::parse_cosmos_conn_str;
use crate::cosmos::{CosmosClient, CosmosError, SqlParameter};
use crate::types::{Chunk, EmbeddedChunk};

use super::{cosine_similarity, SearchHit, StoreError, VectorStore};

const CONTAINER: &str = "chunks";
const PARTITION: &str = "chunks";

#[derive(Serialize, Deserialize)]
struct ChunkDocument {
    id: String,
    pk: String,
    chunk: Chunk,
    embedding: Vec<f32>,
}

pub struct CosmosVectorStore {
    client: CosmosClient,
    dimension: usize,
    initialized: AtomicBool,
}

impl From<CosmosError> for StoreError {
    fn from(err: CosmosError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl CosmosVectorStore {
    pub fn new(client: CosmosClient, dimension: usize) -> Self {
        Self {
            client,
            dimension,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn from_conn_str(
        conn_str: &str,
        database: &str,
        dimension: usize,
    ) -> Result<Self, StoreError> {
        let (endpoint, key) = parse_cosmos_conn_str(conn_str)?;
        let client = CosmosClient::new(endpoint, &key, database)
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self::new(client, dimension))
    }

    fn document_id(chunk_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(chunk_id.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes).to_string()
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
}

#[async_trait]
impl VectorStore for CosmosVectorStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        self.client.ensure_database().await?;
        self.client.ensure_container(CONTAINER).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await
    }

    async fn upsert(&self, chunk: EmbeddedChunk) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        self.check_dimension(&chunk.embedding)?;
        let doc = ChunkDocument {
            id: Self::document_id(&chunk.chunk.id),
            pk: PARTITION.to_string(),
            chunk: chunk.chunk,
            embedding: chunk.embedding,
        };
        self.client
            .upsert_document(CONTAINER, PARTITION, serde_json::to_value(doc)?)
            .await?;
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
        // Full scan; similarity is computed client-side.
        let documents: Vec<ChunkDocument> = self
            .client
            .query(CONTAINER, "SELECT * FROM c", vec![])
            .await?;
        let mut hits: Vec<SearchHit> = documents
            .into_iter()
            .map(|doc| SearchHit {
                score: cosine_similarity(query, &doc.embedding),
                chunk: doc.chunk,
            })
            .filter(|hit| hit.score >= min_score)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        self.ensure_initialized()?;
        let doc: Option<ChunkDocument> = self
            .client
            .read_document(CONTAINER, PARTITION, &Self::document_id(id))
            .await?;
        Ok(doc.map(|d| d.chunk))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_initialized()?;
        Ok(self
            .client
            .delete_document(CONTAINER, PARTITION, &Self::document_id(id))
            .await?)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.ensure_initialized()?;
        let counts: Vec<usize> = self
            .client
            .query(
                CONTAINER,
                "SELECT VALUE COUNT(1) FROM c WHERE c.pk = @pk",
                vec![SqlParameter::new("@pk", json!(PARTITION))],
            )
            .await?;
        Ok(counts.into_iter().next().unwrap_or(0))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_ids_are_stable() {
        assert_eq!(
            CosmosVectorStore::document_id("chunk/with/slashes"),
            CosmosVectorStore::document_id("chunk/with/slashes")
        );
        assert_ne!(
            CosmosVectorStore::document_id("a"),
            CosmosVectorStore::document_id("b")
        );
    }
}
