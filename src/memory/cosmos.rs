//! Cosmos DB memory backend.
//!
//! Conversations, personas, and policies each get a container. Documents
//! wrap the memory structs unchanged; document ids are hashed so
//! arbitrary conversation ids survive Cosmos id character rules.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::parse_cosmos_conn_str;
use crate::cosmos::{CosmosClient, CosmosError, SqlParameter};

use super::{
    ConversationMemory, MemoryError, MemoryStore, PersonaMemory, PolicyEntry, Turn,
};

const CONVERSATIONS: &str = "conversations";
const PERSONAS: &str = "personas";
const POLICIES: &str = "policies";

impl From<CosmosError> for MemoryError {
    fn from(err: CosmosError) -> Self {
        MemoryError::Backend(err.to_string())
    }
}

#[derive(Serialize, Deserialize)]
struct ConversationDocument {
    id: String,
    pk: String,
    conversation: ConversationMemory,
}

#[derive(Serialize, Deserialize)]
struct PersonaDocument {
    id: String,
    pk: String,
    persona: PersonaMemory,
}

#[derive(Serialize, Deserialize)]
struct PolicyDocument {
    id: String,
    pk: String,
    policy: PolicyEntry,
}

pub struct CosmosMemoryStore {
    client: CosmosClient,
    max_turns: usize,
}

impl CosmosMemoryStore {
    pub fn new(client: CosmosClient, max_turns: usize) -> Self {
        Self { client, max_turns }
    }

    pub fn from_conn_str(
        conn_str: &str,
        database: &str,
        max_turns: usize,
    ) -> Result<Self, MemoryError> {
        let (endpoint, key) = parse_cosmos_conn_str(conn_str)
            .map_err(|e| MemoryError::Backend(e.to_string()))?;
        let client = CosmosClient::new(endpoint, &key, database)?;
        Ok(Self::new(client, max_turns))
    }

    fn document_id(natural_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(natural_key.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes).to_string()
    }
}

#[async_trait]
impl MemoryStore for CosmosMemoryStore {
    async fn initialize(&self) -> Result<(), MemoryError> {
        self.client.ensure_database().await?;
        for container in [CONVERSATIONS, PERSONAS, POLICIES] {
            self.client.ensure_container(container).await?;
        }
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationMemory>, MemoryError> {
        let doc: Option<ConversationDocument> = self
            .client
            .read_document(CONVERSATIONS, CONVERSATIONS, &Self::document_id(id))
            .await?;
        Ok(doc.map(|d| d.conversation))
    }

    async fn append_turn(
        &self,
        id: &str,
        user_id: Option<&str>,
        turn: Turn,
    ) -> Result<ConversationMemory, MemoryError> {
        let mut conversation = self
            .get_conversation(id)
            .await?
            .unwrap_or_else(|| ConversationMemory::new(id, user_id.map(String::from)));
        conversation.push_turn(turn, self.max_turns);
        let doc = ConversationDocument {
            id: Self::document_id(id),
            pk: CONVERSATIONS.to_string(),
            conversation: conversation.clone(),
        };
        self.client
            .upsert_document(CONVERSATIONS, CONVERSATIONS, serde_json::to_value(doc)?)
            .await?;
        Ok(conversation)
    }

    async fn cleanup_expired(&self, ttl: Duration) -> Result<usize, MemoryError> {
        let cutoff = (Utc::now() - ttl).to_rfc3339();
        let stale: Vec<ConversationDocument> = self
            .client
            .query(
                CONVERSATIONS,
                "SELECT * FROM c WHERE c.conversation.last_activity < @cutoff",
                vec![SqlParameter::new("@cutoff", json!(cutoff))],
            )
            .await?;
        let mut removed = 0;
        for doc in stale {
            if self
                .client
                .delete_document(CONVERSATIONS, CONVERSATIONS, &doc.id)
                .await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get_persona(&self, user_id: &str) -> Result<Option<PersonaMemory>, MemoryError> {
        let doc: Option<PersonaDocument> = self
            .client
            .read_document(PERSONAS, PERSONAS, &Self::document_id(user_id))
            .await?;
        Ok(doc.map(|d| d.persona))
    }

    async fn upsert_persona(&self, persona: PersonaMemory) -> Result<(), MemoryError> {
        let doc = PersonaDocument {
            id: Self::document_id(&persona.user_id),
            pk: PERSONAS.to_string(),
            persona,
        };
        self.client
            .upsert_document(PERSONAS, PERSONAS, serde_json::to_value(doc)?)
            .await?;
        Ok(())
    }

    async fn put_policy(&self, entry: PolicyEntry) -> Result<(), MemoryError> {
        let doc = PolicyDocument {
            id: Self::document_id(&entry.key),
            pk: POLICIES.to_string(),
            policy: entry,
        };
        self.client
            .upsert_document(POLICIES, POLICIES, serde_json::to_value(doc)?)
            .await?;
        Ok(())
    }

    async fn get_policy(&self, key: &str) -> Result<Option<PolicyEntry>, MemoryError> {
        let doc: Option<PolicyDocument> = self
            .client
            .read_document(POLICIES, POLICIES, &Self::document_id(key))
            .await?;
        let Some(mut doc) = doc else { return Ok(None) };
        doc.policy.access_count += 1;
        doc.policy.last_accessed = Utc::now();
        let updated = doc.policy.clone();
        self.client
            .upsert_document(POLICIES, POLICIES, serde_json::to_value(doc)?)
            .await?;
        Ok(Some(updated))
    }

    async fn search_policies(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PolicyEntry>, MemoryError> {
        let lowered = query.to_lowercase();
        let documents: Vec<PolicyDocument> =
            self.client.query(POLICIES, "SELECT * FROM c", vec![]).await?;
        let mut hits: Vec<PolicyDocument> = documents
            .into_iter()
            .filter(|doc| doc.policy.matches(&lowered))
            .collect();
        hits.sort_by(|a, b| {
            b.policy
                .access_count
                .cmp(&a.policy.access_count)
                .then(b.policy.last_accessed.cmp(&a.policy.last_accessed))
        });
        hits.truncate(limit);

        let mut results = Vec::with_capacity(hits.len());
        for mut doc in hits {
            doc.policy.access_count += 1;
            doc.policy.last_accessed = Utc::now();
            results.push(doc.policy.clone());
            self.client
                .upsert_document(POLICIES, POLICIES, serde_json::to_value(doc)?)
                .await?;
        }
        Ok(results)
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await
    }
}
