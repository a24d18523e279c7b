//! External model providers behind narrow interfaces.
//!
//! The pipeline only ever needs two calls: text → fixed-dimension vector
//! ([`EmbeddingClient`]) and prompt → completion ([`LlmClient`]). Neither
//! client owns retries; the orchestrator decides per-stage policy.

pub mod azure;
pub mod demo;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

pub use azure::{AzureChatClient, AzureEmbeddingClient};
pub use demo::{LexicalEmbedder, ScriptedLlm};

#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(safetydesk::clients::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("provider returned an unusable response ({provider}): {message}")]
    #[diagnostic(code(safetydesk::clients::malformed))]
    Malformed {
        provider: &'static str,
        message: String,
    },
}

/// Construct the configured embedding client.
///
/// Demo mode always gets the deterministic hash embedder; a live
/// deployment requires Azure OpenAI coordinates.
pub fn create_embedding_client(
    settings: &crate::config::Settings,
) -> Result<std::sync::Arc<dyn EmbeddingClient>, crate::config::ConfigError> {
    if settings.demo_mode {
        return Ok(std::sync::Arc::new(LexicalEmbedder::new(
            settings.embedding_dimension,
        )));
    }
    match &settings.azure_openai {
        Some(aoai) => Ok(std::sync::Arc::new(AzureEmbeddingClient::new(
            aoai.clone(),
            settings.embedding_dimension,
        ))),
        None => Err(crate::config::ConfigError::Missing {
            key: "AOAI_ENDPOINT",
        }),
    }
}

/// Construct the configured LLM client; demo mode serves the scripted
/// fallback reply instead of calling a provider.
pub fn create_llm_client(
    settings: &crate::config::Settings,
) -> Result<std::sync::Arc<dyn LlmClient>, crate::config::ConfigError> {
    if settings.demo_mode {
        return Ok(std::sync::Arc::new(ScriptedLlm::new(
            "I do not have sufficient information to answer this question.",
        )));
    }
    match &settings.azure_openai {
        Some(aoai) => Ok(std::sync::Arc::new(AzureChatClient::new(aoai.clone()))),
        None => Err(crate::config::ConfigError::Missing {
            key: "AOAI_ENDPOINT",
        }),
    }
}

/// Text → fixed-dimension vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError>;

    /// Batch form; the default loops over [`EmbeddingClient::embed`].
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ClientError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// The fixed output dimension.
    fn dimension(&self) -> usize;
}

/// Prompt → completion.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ClientError>;

    /// Identifier recorded in audit entries.
    fn model_id(&self) -> &str;
}
