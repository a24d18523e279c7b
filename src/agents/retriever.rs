//! Retriever agent: embed, search, and pack the token budget.
//!
//! The search query is the `question` (ask) or `purpose` (draft)
//! parameter. Candidates come back in score order; each is rendered as a
//! source-tagged block and greedily accepted while the budget holds, with
//! a fixed overhead reserved for the prompt skeleton. Citations are built
//! from *all* candidates in rank order, not only the ones that fit the
//! budget, so markers stay meaningful even for trimmed context.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::budget::{estimate_tokens, TokenBudget};
use crate::clients::EmbeddingClient;
use crate::types::Citation;
use crate::vector::{VectorStore, DEFAULT_MIN_SCORE};

use super::{Agent, AgentContext, AgentError};

/// Tokens reserved for the prompt skeleton around the context blocks.
const SKELETON_OVERHEAD_TOKENS: u32 = 300;

pub struct RetrieverAgent {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    default_top_k: usize,
    default_max_tokens: u32,
}

impl RetrieverAgent {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        default_top_k: usize,
        default_max_tokens: u32,
    ) -> Self {
        Self {
            store,
            embedder,
            default_top_k,
            default_max_tokens,
        }
    }

    fn render_chunk(title: &str, section: &str, text: &str) -> String {
        format!("[Source: {title} - {section}]\n{text}")
    }
}

#[async_trait]
impl Agent for RetrieverAgent {
    fn name(&self) -> &'static str {
        "retriever"
    }

    async fn run(&self, ctx: &mut AgentContext) -> Result<(), AgentError> {
        let query = ctx
            .parameter("question")
            .or_else(|| ctx.parameter("purpose"))
            .ok_or(AgentError::NoQuery)?
            .to_string();

        let top_k = ctx
            .parameter("top_k")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(self.default_top_k);
        let max_tokens = ctx
            .parameter("max_tokens")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(self.default_max_tokens);

        let query_vector = self.embedder.embed(&query).await?;
        let hits = self
            .store
            .search(&query_vector, top_k, DEFAULT_MIN_SCORE)
            .await?;

        let mut budget = TokenBudget::new(max_tokens);
        // Reserve room for the skeleton; clamp to whatever remains when the
        // request budget is smaller than the overhead itself.
        let overhead = SKELETON_OVERHEAD_TOKENS.min(budget.remaining());
        budget.consume(overhead)?;

        let mut context_chunks = Vec::new();
        for hit in &hits {
            let rendered = Self::render_chunk(&hit.chunk.title, &hit.chunk.section, &hit.chunk.text);
            let cost = estimate_tokens(&rendered);
            if budget.consume(cost).is_err() {
                // First rejection ends accumulation; the rest of the
                // candidates still become citations below.
                break;
            }
            context_chunks.push(rendered);
        }

        let citations: Vec<Citation> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| Citation::from_chunk(i + 1, &hit.chunk, hit.score))
            .collect();

        debug!(
            candidates = hits.len(),
            accepted = context_chunks.len(),
            consumed = budget.consumed(),
            "retriever packed context"
        );

        ctx.context_chunks = context_chunks;
        ctx.citations = citations;
        ctx.search_results = hits;
        Ok(())
    }
}
