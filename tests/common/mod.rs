#![allow(dead_code)]

//! Shared wiring for integration tests: a fully in-process pipeline with
//! deterministic clients.

use std::sync::Arc;

use safetydesk::audit::InMemoryAuditStore;
use safetydesk::clients::{EmbeddingClient, LexicalEmbedder, ScriptedLlm};
use safetydesk::config::Settings;
use safetydesk::fixtures::FixtureService;
use safetydesk::memory::InMemoryMemoryStore;
use safetydesk::moderation::{KeywordModerator, SeverityLevel};
use safetydesk::orchestrator::Orchestrator;
use safetydesk::types::{Chunk, EmbeddedChunk};
use safetydesk::vector::{JsonVectorStore, VectorStore};

pub const TEST_DIMENSION: usize = 64;

pub struct TestStack {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<JsonVectorStore>,
    pub embedder: Arc<LexicalEmbedder>,
    pub llm: Arc<ScriptedLlm>,
    pub memory: Arc<InMemoryMemoryStore>,
    pub audit: Arc<InMemoryAuditStore>,
}

pub fn test_settings() -> Settings {
    Settings {
        embedding_dimension: TEST_DIMENSION,
        ..Settings::default()
    }
}

/// Build an in-process stack; pass `fixtures` to enable demo mode.
pub async fn build_stack(mut settings: Settings, fixtures: Option<Arc<FixtureService>>) -> TestStack {
    settings.embedding_dimension = TEST_DIMENSION;
    let store = Arc::new(JsonVectorStore::in_memory(TEST_DIMENSION));
    store.initialize().await.expect("store initializes");
    let embedder = Arc::new(LexicalEmbedder::new(TEST_DIMENSION));
    let llm = Arc::new(ScriptedLlm::new(
        "I do not have sufficient information to answer this question.",
    ));
    let memory = Arc::new(InMemoryMemoryStore::new(settings.max_conversation_turns));
    let audit = Arc::new(InMemoryAuditStore::new());

    let mut builder = Orchestrator::builder(settings)
        .vector_store(store.clone())
        .embedder(embedder.clone())
        .llm(llm.clone())
        .moderator(Arc::new(KeywordModerator::new(SeverityLevel::Medium)))
        .memory(memory.clone())
        .audit(audit.clone());
    if let Some(fixtures) = fixtures {
        builder = builder.fixtures(fixtures);
    }

    TestStack {
        orchestrator: Arc::new(builder.build().expect("orchestrator builds")),
        store,
        embedder,
        llm,
        memory,
        audit,
    }
}

/// Embed and upsert one chunk.
pub async fn seed_chunk(stack: &TestStack, id: &str, text: &str, title: &str) {
    let chunk = Chunk::new(id, text, title, "General", "seed.md");
    let vector = stack.embedder.embed(text).await.expect("embedding");
    stack
        .store
        .upsert(EmbeddedChunk::new(chunk, vector))
        .await
        .expect("upsert");
}
