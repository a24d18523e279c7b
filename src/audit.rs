//! Append-only audit log.
//!
//! Every request leaves exactly one [`AuditEntry`]: inputs, outputs, agent
//! traces, moderation results, token counts, and timing. Entries are
//! created by `open` and then only grow; the defined update operations are
//! last-writer-wins at field granularity and never remove information
//! already appended (traces in particular only accumulate).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::moderation::ModerationResult;
use crate::types::AgentTrace;

#[derive(Debug, Error, Diagnostic)]
pub enum AuditError {
    #[error("audit entry not found: {0}")]
    #[diagnostic(code(safetydesk::audit::not_found))]
    NotFound(Uuid),

    #[error("audit backend error: {0}")]
    #[diagnostic(code(safetydesk::audit::backend))]
    Backend(String),
}

/// The operation an audit entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    Ask,
    Draft,
    Ingest,
    Persona,
    Policy,
}

/// One request's audit record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub operation: AuditOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub correlation_id: String,
    pub prompt_hash: String,
    pub model: String,
    #[serde(default)]
    pub inputs: FxHashMap<String, Value>,
    #[serde(default)]
    pub outputs: FxHashMap<String, Value>,
    #[serde(default)]
    pub cited_chunk_ids: Vec<String>,
    #[serde(default)]
    pub agent_traces: Vec<AgentTrace>,
    #[serde(default)]
    pub moderation: FxHashMap<String, ModerationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl AuditEntry {
    /// A freshly opened entry with the prompt hash still pending.
    pub fn open(
        operation: AuditOperation,
        user_id: Option<String>,
        correlation_id: impl Into<String>,
        model: impl Into<String>,
        inputs: FxHashMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            user_id,
            correlation_id: correlation_id.into(),
            prompt_hash: "PENDING".to_string(),
            model: model.into(),
            inputs,
            outputs: FxHashMap::default(),
            cited_chunk_ids: Vec::new(),
            agent_traces: Vec::new(),
            moderation: FxHashMap::default(),
            input_tokens: None,
            output_tokens: None,
            created_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

/// Capability set of the audit store.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a freshly opened entry and return its id.
    async fn open(&self, entry: AuditEntry) -> Result<Uuid, AuditError>;

    /// Merge outputs and citation ids, and stamp the total duration.
    async fn append_outputs(
        &self,
        id: Uuid,
        outputs: FxHashMap<String, Value>,
        cited_chunk_ids: Vec<String>,
        duration_ms: u64,
    ) -> Result<(), AuditError>;

    /// Append one agent trace. Traces grow monotonically.
    async fn append_trace(&self, id: Uuid, trace: AgentTrace) -> Result<(), AuditError>;

    /// Record a moderation result under a stage key such as
    /// `input_moderation`.
    async fn set_moderation(
        &self,
        id: Uuid,
        stage: &str,
        result: ModerationResult,
    ) -> Result<(), AuditError>;

    async fn set_prompt_hash(&self, id: Uuid, prompt_hash: &str) -> Result<(), AuditError>;

    async fn set_token_usage(
        &self,
        id: Uuid,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<(), AuditError>;

    async fn get(&self, id: Uuid) -> Result<Option<AuditEntry>, AuditError>;

    /// Entries for a user, optionally bounded by creation time, newest
    /// first.
    async fn query_by_user(
        &self,
        user_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditEntry>, AuditError>;

    async fn count(&self) -> Result<usize, AuditError>;

    /// Remove entries older than `retention`; returns how many were
    /// dropped.
    async fn cleanup_older_than(&self, retention: Duration) -> Result<usize, AuditError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Concurrent in-process audit store.
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<FxHashMap<Uuid, AuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, id: Uuid, apply: F) -> Result<(), AuditError>
    where
        F: FnOnce(&mut AuditEntry),
    {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&id).ok_or(AuditError::NotFound(id))?;
        apply(entry);
        Ok(())
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn open(&self, entry: AuditEntry) -> Result<Uuid, AuditError> {
        let id = entry.id;
        self.entries.write().insert(id, entry);
        Ok(id)
    }

    async fn append_outputs(
        &self,
        id: Uuid,
        outputs: FxHashMap<String, Value>,
        cited_chunk_ids: Vec<String>,
        duration_ms: u64,
    ) -> Result<(), AuditError> {
        self.update(id, |entry| {
            entry.outputs.extend(outputs);
            entry.cited_chunk_ids.extend(cited_chunk_ids);
            entry.duration_ms = duration_ms;
        })
    }

    async fn append_trace(&self, id: Uuid, trace: AgentTrace) -> Result<(), AuditError> {
        self.update(id, |entry| entry.agent_traces.push(trace))
    }

    async fn set_moderation(
        &self,
        id: Uuid,
        stage: &str,
        result: ModerationResult,
    ) -> Result<(), AuditError> {
        self.update(id, |entry| {
            entry.moderation.insert(stage.to_string(), result);
        })
    }

    async fn set_prompt_hash(&self, id: Uuid, prompt_hash: &str) -> Result<(), AuditError> {
        self.update(id, |entry| entry.prompt_hash = prompt_hash.to_string())
    }

    async fn set_token_usage(
        &self,
        id: Uuid,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<(), AuditError> {
        self.update(id, |entry| {
            entry.input_tokens = Some(input_tokens);
            entry.output_tokens = Some(output_tokens);
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditEntry>, AuditError> {
        Ok(self.entries.read().get(&id).cloned())
    }

    async fn query_by_user(
        &self,
        user_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self.entries.read();
        let mut matched: Vec<AuditEntry> = entries
            .values()
            .filter(|entry| entry.user_id.as_deref() == Some(user_id))
            .filter(|entry| from.is_none_or(|f| entry.created_at >= f))
            .filter(|entry| to.is_none_or(|t| entry.created_at <= t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn count(&self) -> Result<usize, AuditError> {
        Ok(self.entries.read().len())
    }

    async fn cleanup_older_than(&self, retention: Duration) -> Result<usize, AuditError> {
        let cutoff = Utc::now() - retention;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at >= cutoff);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opened() -> AuditEntry {
        let mut inputs = FxHashMap::default();
        inputs.insert("question".to_string(), json!("What PPE is required?"));
        AuditEntry::open(
            AuditOperation::Ask,
            Some("u1".to_string()),
            "corr-1",
            "gpt-test",
            inputs,
        )
    }

    #[tokio::test]
    async fn open_then_get_roundtrips() {
        let store = InMemoryAuditStore::new();
        let id = store.open(opened()).await.unwrap();
        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.prompt_hash, "PENDING");
        assert_eq!(entry.operation, AuditOperation::Ask);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn traces_grow_monotonically() {
        let store = InMemoryAuditStore::new();
        let id = store.open(opened()).await.unwrap();
        store
            .append_trace(id, AgentTrace::new("router", "classify", json!({}), 2))
            .await
            .unwrap();
        let after_one = store.get(id).await.unwrap().unwrap().agent_traces.len();
        store
            .append_trace(id, AgentTrace::new("retriever", "search", json!({}), 14))
            .await
            .unwrap();
        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(after_one, 1);
        assert_eq!(entry.agent_traces.len(), 2);
        assert_eq!(entry.agent_traces[0].agent, "router");
        assert_eq!(entry.agent_traces[1].agent, "retriever");
    }

    #[tokio::test]
    async fn outputs_merge_without_removal() {
        let store = InMemoryAuditStore::new();
        let id = store.open(opened()).await.unwrap();

        let mut first = FxHashMap::default();
        first.insert("response".to_string(), json!({"answer": "wear a hard hat"}));
        store
            .append_outputs(id, first, vec!["chunk-1".to_string()], 120)
            .await
            .unwrap();

        let mut second = FxHashMap::default();
        second.insert("warnings".to_string(), json!(["moderation warning"]));
        store
            .append_outputs(id, second, vec![], 150)
            .await
            .unwrap();

        let entry = store.get(id).await.unwrap().unwrap();
        assert!(entry.outputs.contains_key("response"));
        assert!(entry.outputs.contains_key("warnings"));
        assert_eq!(entry.cited_chunk_ids, vec!["chunk-1"]);
        assert_eq!(entry.duration_ms, 150);
    }

    #[tokio::test]
    async fn updates_to_missing_entries_error() {
        let store = InMemoryAuditStore::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.set_prompt_hash(missing, "abc").await,
            Err(AuditError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn query_by_user_filters_and_sorts() {
        let store = InMemoryAuditStore::new();
        store.open(opened()).await.unwrap();
        let mut other = opened();
        other.user_id = Some("u2".to_string());
        store.open(other).await.unwrap();
        store.open(opened()).await.unwrap();

        let mine = store.query_by_user("u1", None, None).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine[0].created_at >= mine[1].created_at);

        let future = Utc::now() + Duration::hours(1);
        assert!(store
            .query_by_user("u1", Some(future), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn retention_cleanup_drops_old_entries() {
        let store = InMemoryAuditStore::new();
        let id = store.open(opened()).await.unwrap();
        store
            .entries
            .write()
            .get_mut(&id)
            .unwrap()
            .created_at = Utc::now() - Duration::days(120);
        store.open(opened()).await.unwrap();

        let removed = store.cleanup_older_than(Duration::days(90)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
