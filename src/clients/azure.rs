//! Azure OpenAI adapters for chat completion and embeddings.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::AzureOpenAiSettings;

use super::{ClientError, EmbeddingClient, LlmClient};

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Chat-completion client against one Azure OpenAI deployment.
pub struct AzureChatClient {
    http: reqwest::Client,
    settings: AzureOpenAiSettings,
    model_id: String,
}

impl AzureChatClient {
    pub fn new(settings: AzureOpenAiSettings) -> Self {
        let model_id = settings.chat_deployment.clone();
        Self {
            http: reqwest::Client::new(),
            settings,
            model_id,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.chat_deployment,
            self.settings.api_version
        )
    }
}

#[async_trait]
impl LlmClient for AzureChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.url())
            .header("api-key", &self.settings.api_key)
            .json(&json!({
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": 0.2,
            }))
            .send()
            .await
            .map_err(|err| ClientError::Provider {
                provider: "azure-openai",
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(ClientError::Provider {
                provider: "azure-openai",
                message: format!("chat completion returned {}", response.status()),
            });
        }
        let parsed: ChatResponse = response.json().await.map_err(|err| ClientError::Malformed {
            provider: "azure-openai",
            message: err.to_string(),
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ClientError::Malformed {
                provider: "azure-openai",
                message: "no completion choices returned".to_string(),
            })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Embedding client against one Azure OpenAI deployment.
pub struct AzureEmbeddingClient {
    http: reqwest::Client,
    settings: AzureOpenAiSettings,
    dimension: usize,
}

impl AzureEmbeddingClient {
    pub fn new(settings: AzureOpenAiSettings, dimension: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
            dimension,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.embedding_deployment,
            self.settings.api_version
        )
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ClientError> {
        let response = self
            .http
            .post(self.url())
            .header("api-key", &self.settings.api_key)
            .json(&json!({ "input": inputs }))
            .send()
            .await
            .map_err(|err| ClientError::Provider {
                provider: "azure-openai",
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(ClientError::Provider {
                provider: "azure-openai",
                message: format!("embeddings returned {}", response.status()),
            });
        }
        let parsed: EmbeddingResponse =
            response.json().await.map_err(|err| ClientError::Malformed {
                provider: "azure-openai",
                message: err.to_string(),
            })?;
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(ClientError::Malformed {
                    provider: "azure-openai",
                    message: format!(
                        "expected {}-dimensional embedding, got {}",
                        self.dimension,
                        vector.len()
                    ),
                });
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingClient for AzureEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError> {
        self.request(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or(ClientError::Malformed {
                provider: "azure-openai",
                message: "empty embedding response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.request(&refs).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
