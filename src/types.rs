//! Core data model shared across the pipeline.
//!
//! The types here are the currency every subsystem trades in: retrievable
//! [`Chunk`]s and their embedded form, ordered [`Citation`]s, the two
//! deliverables ([`Answer`] and [`LetterDraft`]), and the request/response
//! shapes the orchestrator accepts and returns.
//!
//! # Examples
//!
//! ```
//! use safetydesk::types::Chunk;
//!
//! let chunk = Chunk::new(
//!     "ppe-001",
//!     "Hard hats are mandatory on all active construction sites.",
//!     "PPE Requirements",
//!     "Head Protection",
//!     "docs/ppe.md",
//! );
//!
//! // The content hash is deterministic over text + title + section.
//! let again = chunk.clone();
//! assert_eq!(chunk.hash, again.hash);
//! ```

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum length of a citation excerpt before truncation.
pub const EXCERPT_MAX_CHARS: usize = 200;

/// A retrievable unit of source content.
///
/// Chunks are produced by the (external) ingestion pipeline and owned by the
/// vector store. The `id` is unique within a store; `hash` is deterministic
/// over `text + title + section` and is used for dedup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub title: String,
    pub section: String,
    pub source_path: String,
    /// SHA-256 hex over text, title, and section.
    pub hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: FxHashMap<String, String>,
}

impl Chunk {
    /// Create a chunk, computing the content hash from its parts.
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        title: impl Into<String>,
        section: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Self {
        let text = text.into();
        let title = title.into();
        let section = section.into();
        let hash = Self::content_hash(&text, &title, &section);
        Self {
            id: id.into(),
            text,
            title,
            section,
            source_path: source_path.into(),
            hash,
            created_at: Utc::now(),
            metadata: FxHashMap::default(),
        }
    }

    /// Attach free-form metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: FxHashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Deterministic SHA-256 hex digest over the identity-bearing fields.
    ///
    /// A unit separator keeps `("ab", "c")` and `("a", "bc")` distinct.
    pub fn content_hash(text: &str, title: &str, section: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update([0x1f]);
        hasher.update(title.as_bytes());
        hasher.update([0x1f]);
        hasher.update(section.as_bytes());
        hex_digest(hasher)
    }
}

/// A [`Chunk`] paired with its fixed-dimension embedding vector.
///
/// All vectors in one store share one dimension. Vectors are stored
/// cosine-comparable; normalization is permitted but not required.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }
}

/// An ordered citation backing a claim in an [`Answer`].
///
/// The position in the citation list defines the numeric marker rendered in
/// the answer body: the first citation is `[#1]`, the second `[#2]`, and so
/// on. `id` carries the `c1`, `c2`, … label used in audit records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    /// Relevance score in `[0, 1]`.
    pub score: f32,
    pub title: String,
    /// Short excerpt of the source text, truncated to 200 chars.
    pub excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Citation {
    /// Build the `n`-th (1-based) citation from a chunk and its score.
    pub fn from_chunk(n: usize, chunk: &Chunk, score: f32) -> Self {
        Self {
            id: format!("c{n}"),
            score: score.clamp(0.0, 1.0),
            title: chunk.title.clone(),
            excerpt: excerpt_of(&chunk.text),
            url: chunk.metadata.get("url").cloned(),
        }
    }
}

/// Truncate source text to an excerpt of at most [`EXCERPT_MAX_CHARS`]
/// characters, appending an ellipsis when content was cut.
pub fn excerpt_of(text: &str) -> String {
    if text.chars().count() <= EXCERPT_MAX_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_MAX_CHARS).collect();
    format!("{cut}...")
}

/// A grounded answer: content plus the ordered citations it refers to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub content: String,
    pub citations: Vec<Citation>,
}

/// A drafted letter with `{{placeholder}}` tokens left for the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LetterDraft {
    pub subject: String,
    pub body: String,
    pub placeholders: Vec<String>,
}

impl LetterDraft {
    /// Placeholder names every fallback draft carries.
    pub fn default_placeholders() -> Vec<String> {
        vec![
            "recipient_name".to_string(),
            "sender_name".to_string(),
            "date".to_string(),
        ]
    }
}

/// The request classification the router places on the context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Ask,
    Draft,
    Ingest,
    #[default]
    Unknown,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Ask => "ask",
            RequestKind::Draft => "draft",
            RequestKind::Ingest => "ingest",
            RequestKind::Unknown => "unknown",
        }
    }
}

/// A question for the ask pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

/// A letter-drafting request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DraftRequest {
    pub purpose: String,
    #[serde(default)]
    pub points: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl DraftRequest {
    pub fn new(purpose: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            ..Default::default()
        }
    }
}

/// One recorded step of agent work inside a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    pub agent: String,
    pub action: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AgentTrace {
    pub fn new(
        agent: impl Into<String>,
        action: impl Into<String>,
        detail: serde_json::Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            agent: agent.into(),
            action: action.into(),
            detail,
            duration_ms,
            timestamp: Utc::now(),
        }
    }
}

/// Metadata attached to every pipeline response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub processing_time_ms: u64,
    pub prompt_sha: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub agent_traces: Vec<AgentTrace>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

/// Response to [`AskRequest`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub metadata: ResponseMetadata,
}

/// Response to [`DraftRequest`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftResponse {
    pub subject: String,
    pub body: String,
    pub placeholders: Vec<String>,
    pub metadata: ResponseMetadata,
}

/// Policy/form/section references the cite checker extracted from a draft.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyValidationResult {
    pub references: Vec<String>,
}

pub(crate) fn hex_digest(hasher: Sha256) -> String {
    use std::fmt::Write;

    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// SHA-256 hex digest of a UTF-8 string.
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_digest(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic_and_separator_safe() {
        let a = Chunk::content_hash("text", "title", "section");
        let b = Chunk::content_hash("text", "title", "section");
        assert_eq!(a, b);

        // Field boundaries must matter.
        let c = Chunk::content_hash("textti", "tle", "section");
        assert_ne!(a, c);
    }

    #[test]
    fn excerpt_truncates_long_text() {
        let short = excerpt_of("short text");
        assert_eq!(short, "short text");

        let long = "x".repeat(500);
        let cut = excerpt_of(&long);
        assert_eq!(cut.chars().count(), EXCERPT_MAX_CHARS + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn citation_from_chunk_clamps_score() {
        let chunk = Chunk::new("c-1", "body", "Title", "Section", "src.md");
        let citation = Citation::from_chunk(1, &chunk, 1.7);
        assert_eq!(citation.id, "c1");
        assert_eq!(citation.score, 1.0);
        assert_eq!(citation.title, "Title");
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
