//! Multi-layered memory: conversations, personas, and policy references.
//!
//! A single [`MemoryStore`] capability fronts all three layers so the
//! pipeline does not care which backend holds them. The in-memory variant
//! synchronizes internally; database variants lean on the backend for
//! concurrency.
//!
//! Retention rules live here: conversations are trimmed to the configured
//! turn bound on every update, and [`MemoryStore::cleanup_expired`] removes
//! conversations idle past a TTL.

pub mod conversation;
pub mod persona;
pub mod policy;

#[cfg(feature = "postgres")]
pub mod postgres;

pub mod cosmos;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

pub use conversation::{ConversationMemory, Turn, DEFAULT_RECENT_TURNS};
pub use persona::{PersonaKind, PersonaMemory};
pub use policy::PolicyEntry;

#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("memory backend error: {0}")]
    #[diagnostic(code(safetydesk::memory::backend))]
    Backend(String),

    #[error("serialization error: {0}")]
    #[diagnostic(code(safetydesk::memory::serde))]
    Serde(#[from] serde_json::Error),
}

/// Capability set over the three memory layers.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Create backing tables/containers if absent. The in-memory variant
    /// has nothing to do.
    async fn initialize(&self) -> Result<(), MemoryError> {
        Ok(())
    }

    // -- conversations -------------------------------------------------------

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationMemory>, MemoryError>;

    /// Append a turn, creating the conversation if absent, and return the
    /// updated memory. Retention trimming happens here.
    async fn append_turn(
        &self,
        id: &str,
        user_id: Option<&str>,
        turn: Turn,
    ) -> Result<ConversationMemory, MemoryError>;

    /// Remove conversations whose last activity is older than `ttl`.
    /// Returns how many were removed.
    async fn cleanup_expired(&self, ttl: Duration) -> Result<usize, MemoryError>;

    // -- personas ------------------------------------------------------------

    async fn get_persona(&self, user_id: &str) -> Result<Option<PersonaMemory>, MemoryError>;

    async fn upsert_persona(&self, persona: PersonaMemory) -> Result<(), MemoryError>;

    /// Fetch the persona for `user_id`, seeding the variant default on
    /// first read.
    async fn get_or_seed_persona(
        &self,
        user_id: &str,
        kind: PersonaKind,
    ) -> Result<PersonaMemory, MemoryError> {
        if let Some(existing) = self.get_persona(user_id).await? {
            return Ok(existing);
        }
        let seeded = PersonaMemory::seeded(user_id, kind);
        self.upsert_persona(seeded.clone()).await?;
        Ok(seeded)
    }

    // -- policies ------------------------------------------------------------

    async fn put_policy(&self, entry: PolicyEntry) -> Result<(), MemoryError>;

    /// Fetch one policy by key, recording the access.
    async fn get_policy(&self, key: &str) -> Result<Option<PolicyEntry>, MemoryError>;

    /// Substring search over title, content, tags, and category, ranked by
    /// access count then recency. Each hit's access is recorded.
    async fn search_policies(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PolicyEntry>, MemoryError>;

    /// Whether the backend is reachable. Must not error.
    async fn health_check(&self) -> bool;
}

/// Construct the configured memory store backend.
pub fn create_memory_store(
    settings: &crate::config::Settings,
) -> Result<std::sync::Arc<dyn MemoryStore>, MemoryError> {
    use crate::config::MemoryBackend;
    match settings.memory_backend {
        MemoryBackend::Memory => Ok(std::sync::Arc::new(InMemoryMemoryStore::new(
            settings.max_conversation_turns,
        ))),
        MemoryBackend::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let conn = settings.pg_conn_str.clone().ok_or_else(|| {
                    MemoryError::Backend("PG_CONN_STR is not set".to_string())
                })?;
                Ok(std::sync::Arc::new(postgres::PgMemoryStore::new(
                    conn,
                    settings.max_conversation_turns,
                )))
            }
            #[cfg(not(feature = "postgres"))]
            {
                Err(MemoryError::Backend(
                    crate::config::ConfigError::FeatureGated {
                        backend: "postgres",
                        feature: "postgres",
                    }
                    .to_string(),
                ))
            }
        }
        MemoryBackend::Cosmos => {
            let conn = settings
                .cosmos_conn_str
                .clone()
                .ok_or_else(|| MemoryError::Backend("COSMOS_CONN_STR is not set".to_string()))?;
            Ok(std::sync::Arc::new(cosmos::CosmosMemoryStore::from_conn_str(
                &conn,
                "safetydesk",
                settings.max_conversation_turns,
            )?))
        }
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Concurrent in-process memory store.
pub struct InMemoryMemoryStore {
    max_turns: usize,
    conversations: RwLock<FxHashMap<String, ConversationMemory>>,
    personas: RwLock<FxHashMap<String, PersonaMemory>>,
    policies: RwLock<FxHashMap<String, PolicyEntry>>,
}

impl InMemoryMemoryStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            conversations: RwLock::new(FxHashMap::default()),
            personas: RwLock::new(FxHashMap::default()),
            policies: RwLock::new(FxHashMap::default()),
        }
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationMemory>, MemoryError> {
        Ok(self.conversations.read().get(id).cloned())
    }

    async fn append_turn(
        &self,
        id: &str,
        user_id: Option<&str>,
        turn: Turn,
    ) -> Result<ConversationMemory, MemoryError> {
        let mut conversations = self.conversations.write();
        let memory = conversations
            .entry(id.to_string())
            .or_insert_with(|| ConversationMemory::new(id, user_id.map(String::from)));
        memory.push_turn(turn, self.max_turns);
        Ok(memory.clone())
    }

    async fn cleanup_expired(&self, ttl: Duration) -> Result<usize, MemoryError> {
        let cutoff = Utc::now() - ttl;
        let mut conversations = self.conversations.write();
        let before = conversations.len();
        conversations.retain(|_, memory| memory.last_activity >= cutoff);
        Ok(before - conversations.len())
    }

    async fn get_persona(&self, user_id: &str) -> Result<Option<PersonaMemory>, MemoryError> {
        Ok(self.personas.read().get(user_id).cloned())
    }

    async fn upsert_persona(&self, persona: PersonaMemory) -> Result<(), MemoryError> {
        self.personas
            .write()
            .insert(persona.user_id.clone(), persona);
        Ok(())
    }

    async fn put_policy(&self, entry: PolicyEntry) -> Result<(), MemoryError> {
        self.policies.write().insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn get_policy(&self, key: &str) -> Result<Option<PolicyEntry>, MemoryError> {
        let mut policies = self.policies.write();
        Ok(policies.get_mut(key).map(|entry| {
            entry.record_access();
            entry.clone()
        }))
    }

    async fn search_policies(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PolicyEntry>, MemoryError> {
        let lowered = query.to_lowercase();
        let mut policies = self.policies.write();
        let mut hits: Vec<&mut PolicyEntry> = policies
            .values_mut()
            .filter(|entry| entry.matches(&lowered))
            .collect();
        hits.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then(b.last_accessed.cmp(&a.last_accessed))
        });
        hits.truncate(limit);
        Ok(hits
            .into_iter()
            .map(|entry| {
                entry.record_access();
                entry.clone()
            })
            .collect())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_creates_and_trims() {
        let store = InMemoryMemoryStore::new(10);
        for i in 0..12 {
            store
                .append_turn("c1", Some("u1"), Turn::new(format!("q{i}"), "a", vec![]))
                .await
                .unwrap();
        }
        let memory = store.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(memory.turns.len(), 10);
        assert_eq!(memory.turns.last().unwrap().user_message, "q11");
        assert_eq!(memory.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn ttl_cleanup_removes_idle_conversations() {
        let store = InMemoryMemoryStore::new(10);
        store
            .append_turn("stale", None, Turn::new("q", "a", vec![]))
            .await
            .unwrap();
        // Backdate the conversation past the TTL.
        store
            .conversations
            .write()
            .get_mut("stale")
            .unwrap()
            .last_activity = Utc::now() - Duration::hours(48);
        store
            .append_turn("fresh", None, Turn::new("q", "a", vec![]))
            .await
            .unwrap();

        let removed = store.cleanup_expired(Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_conversation("stale").await.unwrap().is_none());
        assert!(store.get_conversation("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn persona_is_seeded_once() {
        let store = InMemoryMemoryStore::default();
        let first = store
            .get_or_seed_persona("u1", PersonaKind::Inspector)
            .await
            .unwrap();
        let second = store
            .get_or_seed_persona("u1", PersonaKind::Administrator)
            .await
            .unwrap();
        // The second call returns the stored profile, not a new seed.
        assert_eq!(second.kind, PersonaKind::Inspector);
        assert_eq!(first.user_id, second.user_id);
    }

    #[tokio::test]
    async fn policy_search_ranks_by_access_then_recency() {
        let store = InMemoryMemoryStore::default();
        store
            .put_policy(PolicyEntry::new(
                "ppe-1",
                "PPE Standard",
                "hard hat requirements",
                vec!["ppe".into()],
                "equipment",
            ))
            .await
            .unwrap();
        store
            .put_policy(PolicyEntry::new(
                "ppe-2",
                "PPE Footwear",
                "steel-toed boot requirements",
                vec!["ppe".into()],
                "equipment",
            ))
            .await
            .unwrap();

        // Drive up access count on ppe-2.
        store.get_policy("ppe-2").await.unwrap();
        store.get_policy("ppe-2").await.unwrap();

        let hits = store.search_policies("ppe", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "ppe-2");
        // Search itself records an access.
        assert_eq!(hits[0].access_count, 3);
    }

    #[tokio::test]
    async fn policy_search_matches_tags_and_category() {
        let store = InMemoryMemoryStore::default();
        store
            .put_policy(PolicyEntry::new(
                "lift-1",
                "Manual Lifting",
                "limits for repetitive lifting",
                vec!["ergonomics".into()],
                "musculoskeletal",
            ))
            .await
            .unwrap();
        assert_eq!(store.search_policies("ERGONOMICS", 5).await.unwrap().len(), 1);
        assert_eq!(
            store
                .search_policies("musculo", 5)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store.search_policies("welding", 5).await.unwrap().is_empty());
    }
}
