//! # safetydesk: retrieval-augmented QA and letter drafting for OHS content
//!
//! safetydesk is the core of an enterprise question-answering and
//! letter-drafting service for occupational health and safety material. A
//! four-stage agent pipeline (router → retriever → drafter → cite checker)
//! runs inside an orchestrator that layers governance around it: content
//! moderation, PII redaction, content-addressed prompt versioning, and an
//! append-only audit log.
//!
//! ## Core Concepts
//!
//! - **Agents**: sequential pipeline stages communicating through a
//!   per-request [`agents::AgentContext`]
//! - **Vector stores**: pluggable cosine-similarity backends (JSON file,
//!   Qdrant, Postgres, Cosmos) behind one [`vector::VectorStore`] trait
//! - **Memory**: conversation windows, persona profiles, and searchable
//!   policy entries behind [`memory::MemoryStore`]
//! - **Governance**: [`moderation`], [`redaction`], [`prompts`], and
//!   [`audit`] wrap every request
//! - **Demo mode**: deterministic fixtures and hash-based embeddings run
//!   the whole pipeline without external providers
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use safetydesk::audit::InMemoryAuditStore;
//! use safetydesk::clients::{LexicalEmbedder, ScriptedLlm};
//! use safetydesk::config::Settings;
//! use safetydesk::memory::InMemoryMemoryStore;
//! use safetydesk::moderation::{KeywordModerator, SeverityLevel};
//! use safetydesk::orchestrator::Orchestrator;
//! use safetydesk::types::AskRequest;
//! use safetydesk::vector::{JsonVectorStore, VectorStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::default();
//! let store = Arc::new(JsonVectorStore::in_memory(settings.embedding_dimension));
//! store.initialize().await?;
//!
//! let orchestrator = Orchestrator::builder(settings)
//!     .vector_store(store)
//!     .embedder(Arc::new(LexicalEmbedder::new(1536)))
//!     .llm(Arc::new(ScriptedLlm::new("I do not have sufficient information.")))
//!     .moderator(Arc::new(KeywordModerator::new(SeverityLevel::Medium)))
//!     .memory(Arc::new(InMemoryMemoryStore::default()))
//!     .audit(Arc::new(InMemoryAuditStore::new()))
//!     .build()?;
//!
//! let response = orchestrator
//!     .process_ask(AskRequest::new("What PPE is required on site?"))
//!     .await?;
//! println!("{}", response.answer);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] - the shared data model
//! - [`agents`] - the four pipeline stages and their context
//! - [`orchestrator`] - the per-request state machine
//! - [`vector`] - pluggable vector stores and cosine search
//! - [`memory`] - conversation, persona, and policy memory
//! - [`clients`] - embedding/LLM provider adapters
//! - [`moderation`] / [`redaction`] - the content governance overlay
//! - [`prompts`] / [`audit`] - prompt versioning and audit logging
//! - [`fixtures`] / [`eval`] - demo fixtures and the evaluation harness

pub mod agents;
pub mod audit;
pub mod budget;
pub mod clients;
pub mod config;
pub mod cosmos;
pub mod eval;
pub mod fixtures;
pub mod memory;
pub mod moderation;
pub mod orchestrator;
pub mod prompts;
pub mod redaction;
pub mod telemetry;
pub mod types;
pub mod vector;
