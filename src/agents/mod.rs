//! The four cooperating pipeline agents.
//!
//! This module provides the core abstractions for pipeline stages: the
//! [`Agent`] trait, the per-request [`AgentContext`] scratch space, and the
//! stage error type. Concrete agents live in their own submodules:
//!
//! - [`router`]: classifies the request and loads memory
//! - [`retriever`]: embeds the query, searches, packs the token budget
//! - [`drafter`]: assembles the prompt, calls the LLM, shapes the artifact
//! - [`cite_checker`]: validates and repairs citations (never fatal)
//!
//! # Design Principles
//!
//! - **Sequential**: within one request the agents form a strict
//!   happens-before chain; there is no intra-request fan-out
//! - **Focused**: each agent owns one stage and communicates only through
//!   the context
//! - **Observable**: the orchestrator wraps every stage in an
//!   [`AgentTrace`](crate::types::AgentTrace)

pub mod cite_checker;
pub mod drafter;
pub mod retriever;
pub mod router;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::budget::BudgetError;
use crate::clients::ClientError;
use crate::memory::{ConversationMemory, MemoryError, PersonaMemory};
use crate::types::{
    Answer, AskRequest, Citation, DraftRequest, LetterDraft, PolicyValidationResult, RequestKind,
};
use crate::vector::{SearchHit, StoreError};

pub use cite_checker::CiteCheckerAgent;
pub use drafter::DrafterAgent;
pub use retriever::RetrieverAgent;
pub use router::RouterAgent;

/// Errors that abort an agent stage.
///
/// Hard stages (router, retriever, drafter) propagate these to the
/// orchestrator and fail the request; the cite checker's errors are
/// swallowed there instead.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    /// Expected input data is missing from the context.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(safetydesk::agents::missing_input),
        help("Check that the previous stage produced the required data: {what}.")
    )]
    MissingInput { what: &'static str },

    /// Neither a question nor a purpose was supplied.
    #[error("no query parameter present on the request")]
    #[diagnostic(
        code(safetydesk::agents::no_query),
        help("Ask requests need a question; draft requests need a purpose.")
    )]
    NoQuery,

    #[error(transparent)]
    #[diagnostic(code(safetydesk::agents::vector_store))]
    VectorStore(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(code(safetydesk::agents::memory))]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    #[diagnostic(code(safetydesk::agents::client))]
    Client(#[from] ClientError),

    #[error(transparent)]
    #[diagnostic(code(safetydesk::agents::budget))]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    #[diagnostic(code(safetydesk::agents::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Citation validation failed internally; treated as soft upstream.
    #[error("citation check failed: {0}")]
    #[diagnostic(code(safetydesk::agents::cite_check))]
    CiteCheck(String),
}

/// The request placed on the context by the orchestrator.
#[derive(Clone, Debug)]
pub enum AgentRequest {
    Ask(AskRequest),
    Draft(DraftRequest),
}

/// Per-request scratch space threaded through the agent chain.
///
/// One context is created per request and never shared across requests.
/// The slots form a closed set of known keys so refactors stay safe; the
/// string parameter map only carries what the router extracted from the
/// request's public fields.
#[derive(Debug, Default)]
pub struct AgentContext {
    pub correlation_id: String,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
    pub request: Option<AgentRequest>,
    pub request_type: RequestKind,
    pub parameters: FxHashMap<String, String>,
    pub conversation: Option<ConversationMemory>,
    pub persona: Option<PersonaMemory>,
    pub search_results: Vec<SearchHit>,
    /// Source-tagged strings accepted into the prompt, in score order.
    pub context_chunks: Vec<String>,
    pub citations: Vec<Citation>,
    pub answer: Option<Answer>,
    pub letter_draft: Option<LetterDraft>,
    pub policy_validation: Option<PolicyValidationResult>,
    pub prompt_hash: Option<String>,
    pub audit_id: Option<Uuid>,
}

impl AgentContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            ..Default::default()
        }
    }

    /// Case-insensitive parameter lookup.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// One unit of pipeline work.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable name used in traces and audit records.
    fn name(&self) -> &'static str;

    /// Execute this stage against the shared request context.
    async fn run(&self, ctx: &mut AgentContext) -> Result<(), AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_lookup_is_case_insensitive() {
        let mut ctx = AgentContext::new("corr");
        ctx.parameters
            .insert("Question".to_string(), "what ppe?".to_string());
        assert_eq!(ctx.parameter("question"), Some("what ppe?"));
        assert_eq!(ctx.parameter("QUESTION"), Some("what ppe?"));
        assert_eq!(ctx.parameter("purpose"), None);
    }
}
