//! Environment-driven configuration.
//!
//! Settings are read once at startup via [`Settings::from_env`]; a `.env`
//! file is honored when present. Every knob has a default suited to demo
//! mode, so a bare environment yields a runnable in-process stack.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::moderation::SeverityLevel;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    #[diagnostic(
        code(safetydesk::config::invalid_value),
        help("Check the environment variable against the documented values.")
    )]
    InvalidValue { key: &'static str, value: String },

    #[error("missing required setting: {key}")]
    #[diagnostic(code(safetydesk::config::missing))]
    Missing { key: &'static str },

    #[error("backend '{backend}' requires the '{feature}' cargo feature")]
    #[diagnostic(code(safetydesk::config::feature_gated))]
    FeatureGated {
        backend: &'static str,
        feature: &'static str,
    },
}

/// Which vector store backend to construct.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VectorBackend {
    #[default]
    Json,
    Qdrant,
    Postgres,
    Cosmos,
}

impl VectorBackend {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "qdrant" => Ok(Self::Qdrant),
            "postgres" => Ok(Self::Postgres),
            "cosmos" => Ok(Self::Cosmos),
            _ => Err(ConfigError::InvalidValue {
                key: "VECTOR_STORE",
                value: value.to_string(),
            }),
        }
    }
}

/// Which memory store backend to construct.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryBackend {
    #[default]
    Memory,
    Postgres,
    Cosmos,
}

impl MemoryBackend {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            "cosmos" => Ok(Self::Cosmos),
            _ => Err(ConfigError::InvalidValue {
                key: "MEMORY_BACKEND",
                value: value.to_string(),
            }),
        }
    }
}

/// Azure OpenAI provider coordinates.
#[derive(Clone, Debug)]
pub struct AzureOpenAiSettings {
    pub endpoint: String,
    pub api_key: String,
    pub chat_deployment: String,
    pub embedding_deployment: String,
    pub api_version: String,
}

/// Azure Content Safety moderation coordinates.
#[derive(Clone, Debug)]
pub struct ContentSafetySettings {
    pub endpoint: String,
    pub api_key: String,
}

/// Runtime configuration for the pipeline core.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Serve fixture responses instead of calling real providers.
    pub demo_mode: bool,
    pub vector_backend: VectorBackend,
    pub memory_backend: MemoryBackend,
    pub azure_openai: Option<AzureOpenAiSettings>,
    pub content_safety: Option<ContentSafetySettings>,
    /// Severity level at which moderation flags content.
    pub moderation_threshold: SeverityLevel,
    pub qdrant_endpoint: Option<String>,
    pub pg_conn_str: Option<String>,
    pub cosmos_conn_str: Option<String>,
    pub redaction_enabled: bool,
    pub max_tokens_per_request: u32,
    pub vector_search_top_k: usize,
    pub embedding_dimension: usize,
    pub audit_retention_days: i64,
    /// Conversation memory retention bound (turns kept per conversation).
    pub max_conversation_turns: usize,
    pub conversation_ttl_hours: i64,
    pub fixtures_path: String,
    pub trace_path: String,
    pub stage_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            demo_mode: false,
            vector_backend: VectorBackend::Json,
            memory_backend: MemoryBackend::Memory,
            azure_openai: None,
            content_safety: None,
            moderation_threshold: SeverityLevel::Medium,
            qdrant_endpoint: None,
            pg_conn_str: None,
            cosmos_conn_str: None,
            redaction_enabled: true,
            max_tokens_per_request: 4096,
            vector_search_top_k: 10,
            embedding_dimension: 1536,
            audit_retention_days: 90,
            max_conversation_turns: 10,
            conversation_ttl_hours: 24,
            fixtures_path: "./fixtures".to_string(),
            trace_path: "./fixtures".to_string(),
            stage_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl Settings {
    /// Load settings from the process environment (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let azure_openai = match (env_opt("AOAI_ENDPOINT"), env_opt("AOAI_API_KEY")) {
            (Some(endpoint), Some(api_key)) => Some(AzureOpenAiSettings {
                endpoint,
                api_key,
                chat_deployment: env_opt("AOAI_CHAT_DEPLOYMENT")
                    .ok_or(ConfigError::Missing {
                        key: "AOAI_CHAT_DEPLOYMENT",
                    })?,
                embedding_deployment: env_opt("AOAI_EMB_DEPLOYMENT")
                    .ok_or(ConfigError::Missing {
                        key: "AOAI_EMB_DEPLOYMENT",
                    })?,
                api_version: env_opt("AOAI_API_VERSION")
                    .unwrap_or_else(|| "2024-02-01".to_string()),
            }),
            _ => None,
        };

        let content_safety =
            match (env_opt("CONTENT_SAFETY_ENDPOINT"), env_opt("CONTENT_SAFETY_KEY")) {
                (Some(endpoint), Some(api_key)) => {
                    Some(ContentSafetySettings { endpoint, api_key })
                }
                _ => None,
            };

        let moderation_threshold = match env_opt("CONTENT_SAFETY_THRESHOLD") {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "low" => SeverityLevel::Low,
                "medium" => SeverityLevel::Medium,
                "high" => SeverityLevel::High,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "CONTENT_SAFETY_THRESHOLD",
                        value: raw,
                    })
                }
            },
            None => defaults.moderation_threshold,
        };

        Ok(Self {
            demo_mode: env_bool("DEMO_MODE", defaults.demo_mode)?,
            vector_backend: match env_opt("VECTOR_STORE") {
                Some(raw) => VectorBackend::parse(&raw)?,
                None => defaults.vector_backend,
            },
            memory_backend: match env_opt("MEMORY_BACKEND") {
                Some(raw) => MemoryBackend::parse(&raw)?,
                None => defaults.memory_backend,
            },
            azure_openai,
            content_safety,
            moderation_threshold,
            qdrant_endpoint: env_opt("QDRANT_ENDPOINT"),
            pg_conn_str: env_opt("PG_CONN_STR"),
            cosmos_conn_str: env_opt("COSMOS_CONN_STR"),
            redaction_enabled: env_bool("REDACTION_ENABLED", defaults.redaction_enabled)?,
            max_tokens_per_request: env_parse(
                "MAX_TOKENS_PER_REQUEST",
                defaults.max_tokens_per_request,
            )?,
            vector_search_top_k: env_parse("VECTOR_SEARCH_TOP_K", defaults.vector_search_top_k)?,
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", defaults.embedding_dimension)?,
            audit_retention_days: env_parse(
                "AUDIT_LOG_RETENTION_DAYS",
                defaults.audit_retention_days,
            )?,
            max_conversation_turns: env_parse(
                "MAX_CONVERSATION_TURNS",
                defaults.max_conversation_turns,
            )?,
            conversation_ttl_hours: env_parse(
                "CONVERSATION_TTL_HOURS",
                defaults.conversation_ttl_hours,
            )?,
            fixtures_path: env_opt("FIXTURES_PATH").unwrap_or(defaults.fixtures_path),
            trace_path: env_opt("TRACE_PATH").unwrap_or(defaults.trace_path),
            stage_timeout: Duration::from_secs(env_parse(
                "STAGE_TIMEOUT_SECS",
                defaults.stage_timeout.as_secs(),
            )?),
            request_timeout: Duration::from_secs(env_parse(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }
}

fn env_opt(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env_opt(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
    }
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env_opt(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

/// Parse a Cosmos connection string of the form
/// `AccountEndpoint=https://…;AccountKey=base64…;`.
pub fn parse_cosmos_conn_str(raw: &str) -> Result<(String, String), ConfigError> {
    let mut endpoint = None;
    let mut key = None;
    for part in raw.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("AccountEndpoint=") {
            endpoint = Some(value.trim_end_matches('/').to_string());
        } else if let Some(value) = part.strip_prefix("AccountKey=") {
            key = Some(value.to_string());
        }
    }
    match (endpoint, key) {
        (Some(endpoint), Some(key)) => Ok((endpoint, key)),
        _ => Err(ConfigError::InvalidValue {
            key: "COSMOS_CONN_STR",
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_demo_friendly() {
        let settings = Settings::default();
        assert_eq!(settings.vector_backend, VectorBackend::Json);
        assert_eq!(settings.memory_backend, MemoryBackend::Memory);
        assert_eq!(settings.max_tokens_per_request, 4096);
        assert_eq!(settings.vector_search_top_k, 10);
        assert_eq!(settings.max_conversation_turns, 10);
        assert!(settings.redaction_enabled);
    }

    #[test]
    fn cosmos_conn_str_roundtrip() {
        let (endpoint, key) = parse_cosmos_conn_str(
            "AccountEndpoint=https://acct.documents.azure.com:443/;AccountKey=Zm9vYmFy;",
        )
        .unwrap();
        assert_eq!(endpoint, "https://acct.documents.azure.com:443");
        assert_eq!(key, "Zm9vYmFy");

        assert!(parse_cosmos_conn_str("garbage").is_err());
    }

    #[test]
    fn backend_parsing_rejects_unknown() {
        assert_eq!(VectorBackend::parse("Qdrant").unwrap(), VectorBackend::Qdrant);
        assert!(VectorBackend::parse("faiss").is_err());
        assert_eq!(MemoryBackend::parse("memory").unwrap(), MemoryBackend::Memory);
        assert!(MemoryBackend::parse("redis").is_err());
    }
}
