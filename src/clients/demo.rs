//! Deterministic provider stand-ins for demo mode and tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ClientError, EmbeddingClient, LlmClient};

/// Hash-based lexical embedder.
///
/// Produces reproducible pseudo-embeddings from word-level and character
/// trigram hashing, unit-normalized so cosine comparison behaves. This is
/// lexical overlap, not semantics; it keeps the full pipeline runnable
/// without an embedding provider.
pub struct LexicalEmbedder {
    dimension: usize,
}

impl LexicalEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_str(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        // Word hashes carry the primary signal.
        for word in normalized.split_whitespace() {
            let hash = Self::hash_str(word);
            let idx = (hash as usize) % self.dimension;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xff) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        // Trigrams add fuzzy overlap.
        let chars: Vec<char> = normalized.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let hash = Self::hash_str(&trigram);
            let idx = (hash as usize) % self.dimension;
            let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
            embedding[idx] += sign;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingClient for LexicalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError> {
        Ok(self.generate(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// LLM stand-in that plays back queued replies.
///
/// Each `complete` call pops the next queued reply; when the queue is dry
/// the fallback reply is returned. Prompts are recorded for assertions.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    fallback: String,
}

impl ScriptedLlm {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            fallback: fallback.into(),
        }
    }

    /// Queue a reply for the next completion call.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(reply.into());
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, ClientError> {
        self.prompts.lock().push(prompt.to_string());
        Ok(self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn model_id(&self) -> &str {
        "scripted-demo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[tokio::test]
    async fn embeddings_are_deterministic_and_unit_length() {
        let embedder = LexicalEmbedder::new(256);
        let a = embedder.embed("hard hats on site").await.unwrap();
        let b = embedder.embed("hard hats on site").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn overlapping_text_scores_higher_than_unrelated() {
        let embedder = LexicalEmbedder::new(256);
        let query = embedder.embed("incident reporting deadline").await.unwrap();
        let close = embedder
            .embed("report an incident before the deadline")
            .await
            .unwrap();
        let far = embedder
            .embed("forklift battery charging procedure")
            .await
            .unwrap();
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn scripted_llm_plays_back_in_order() {
        let llm = ScriptedLlm::new("fallback");
        llm.push_reply("first");
        llm.push_reply("second");
        assert_eq!(llm.complete("p1").await.unwrap(), "first");
        assert_eq!(llm.complete("p2").await.unwrap(), "second");
        assert_eq!(llm.complete("p3").await.unwrap(), "fallback");
        assert_eq!(llm.prompts().len(), 3);
    }
}
