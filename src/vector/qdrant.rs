//! Qdrant HTTP backend.
//!
//! Talks to the Qdrant REST API directly. Chunk ids are strings, Qdrant
//! point ids must be UUIDs or integers, so the point id is derived
//! deterministically from the chunk id; the chunk itself rides in the
//! payload.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::{Chunk, EmbeddedChunk};

use super::{BatchOutcome, SearchHit, StoreError, VectorStore};

pub struct QdrantVectorStore {
    http: reqwest::Client,
    base: String,
    collection: String,
    dimension: usize,
    initialized: AtomicBool,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: Option<T>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RetrievedPoint {
    payload: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

impl QdrantVectorStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            dimension,
            initialized: AtomicBool::new(false),
        }
    }

    /// Deterministic point id for a chunk id.
    fn point_id(chunk_id: &str) -> Uuid {
        let mut hasher = Sha256::new();
        hasher.update(chunk_id.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base, self.collection, suffix)
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

    fn chunk_from_payload(payload: Option<serde_json::Value>) -> Result<Option<Chunk>, StoreError> {
        match payload {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn write_points(&self, points: Vec<serde_json::Value>) -> Result<(), StoreError> {
        let response = self
            .http
            .put(format!("{}?wait=true", self.collection_url("/points")))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "qdrant upsert returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        let exists = self
            .http
            .get(self.collection_url(""))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);
        if !exists {
            let response = self
                .http
                .put(self.collection_url(""))
                .json(&json!({
                    "vectors": { "size": self.dimension, "distance": "Cosine" }
                }))
                .send()
                .await
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
            // 409: another writer created it between the check and the put.
            if !response.status().is_success() && response.status().as_u16() != 409 {
                return Err(StoreError::Backend(format!(
                    "qdrant collection create returned {}",
                    response.status()
                )));
            }
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.http
            .get(format!("{}/collections", self.base))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn upsert(&self, chunk: EmbeddedChunk) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        self.check_dimension(&chunk.embedding)?;
        let point = json!({
            "id": Self::point_id(&chunk.chunk.id),
            "vector": chunk.embedding,
            "payload": serde_json::to_value(&chunk.chunk)?,
        });
        self.write_points(vec![point]).await
    }

    /// Native batch write; items that fail the dimension check are reported
    /// individually, the rest go out in one request.
    async fn upsert_batch(&self, chunks: Vec<EmbeddedChunk>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if self.ensure_initialized().is_err() {
            for chunk in chunks {
                outcome
                    .failed
                    .push((chunk.chunk.id.clone(), StoreError::NotInitialized));
            }
            return outcome;
        }

        let mut points = Vec::new();
        let mut ids = Vec::new();
        for chunk in chunks {
            let id = chunk.chunk.id.clone();
            if let Err(err) = self.check_dimension(&chunk.embedding) {
                outcome.failed.push((id, err));
                continue;
            }
            match serde_json::to_value(&chunk.chunk) {
                Ok(payload) => {
                    points.push(json!({
                        "id": Self::point_id(&id),
                        "vector": chunk.embedding,
                        "payload": payload,
                    }));
                    ids.push(id);
                }
                Err(err) => outcome.failed.push((id, err.into())),
            }
        }
        if points.is_empty() {
            return outcome;
        }
        match self.write_points(points).await {
            Ok(()) => outcome.succeeded.extend(ids),
            Err(err) => {
                let message = err.to_string();
                for id in ids {
                    outcome.failed.push((id, StoreError::Backend(message.clone())));
                }
            }
        }
        outcome
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.ensure_initialized()?;
        self.check_dimension(query)?;
        let response = self
            .http
            .post(self.collection_url("/points/search"))
            .json(&json!({
                "vector": query,
                "limit": top_k,
                "score_threshold": min_score,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "qdrant search returned {}",
                response.status()
            )));
        }
        let envelope: Envelope<Vec<ScoredPoint>> = response
            .json()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let mut hits = Vec::new();
        for point in envelope.result.unwrap_or_default() {
            if let Some(chunk) = Self::chunk_from_payload(point.payload)? {
                hits.push(SearchHit {
                    chunk,
                    score: point.score,
                });
            }
        }
        Ok(hits)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        self.ensure_initialized()?;
        let response = self
            .http
            .post(self.collection_url("/points"))
            .json(&json!({
                "ids": [Self::point_id(id)],
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "qdrant retrieve returned {}",
                response.status()
            )));
        }
        let envelope: Envelope<Vec<RetrievedPoint>> = response
            .json()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        match envelope.result.unwrap_or_default().into_iter().next() {
            Some(point) => Self::chunk_from_payload(point.payload),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_initialized()?;
        let existed = self.get_by_id(id).await?.is_some();
        if !existed {
            return Ok(false);
        }
        let response = self
            .http
            .post(format!("{}?wait=true", self.collection_url("/points/delete")))
            .json(&json!({ "points": [Self::point_id(id)] }))
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "qdrant delete returned {}",
                response.status()
            )));
        }
        Ok(true)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.ensure_initialized()?;
        let response = self
            .http
            .post(self.collection_url("/points/count"))
            .json(&json!({ "exact": false }))
            .send()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "qdrant count returned {}",
                response.status()
            )));
        }
        let envelope: Envelope<CountResult> = response
            .json()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(envelope.result.map(|r| r.count).unwrap_or(0))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
