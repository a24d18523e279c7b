//! PostgreSQL memory backend (behind the `postgres` cargo feature).
//!
//! Each memory layer maps to one table; turn lists and persona profiles
//! are stored as JSONB documents. Concurrency is left to the database,
//! the wrapper adds no locking beyond pool management.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::{
    ConversationMemory, MemoryError, MemoryStore, PersonaMemory, PolicyEntry, Turn,
};

pub struct PgMemoryStore {
    conn_str: String,
    max_turns: usize,
    pool: tokio::sync::OnceCell<Arc<PgPool>>,
}

impl PgMemoryStore {
    pub fn new(conn_str: impl Into<String>, max_turns: usize) -> Self {
        Self {
            conn_str: conn_str.into(),
            max_turns,
            pool: tokio::sync::OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&Arc<PgPool>, MemoryError> {
        self.pool
            .get_or_try_init(|| async {
                let pool = PgPool::connect(&self.conn_str)
                    .await
                    .map_err(|e| MemoryError::Backend(format!("connect error: {e}")))?;
                Ok(Arc::new(pool))
            })
            .await
    }

    async fn write_conversation(&self, memory: &ConversationMemory) -> Result<(), MemoryError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, turns, created_at, last_activity)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                user_id = COALESCE(conversations.user_id, EXCLUDED.user_id),
                turns = EXCLUDED.turns,
                last_activity = EXCLUDED.last_activity
            "#,
        )
        .bind(&memory.id)
        .bind(&memory.user_id)
        .bind(serde_json::to_value(&memory.turns)?)
        .bind(memory.created_at)
        .bind(memory.last_activity)
        .execute(pool.as_ref())
        .await
        .map_err(|e| MemoryError::Backend(format!("write conversation: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for PgMemoryStore {
    #[instrument(skip(self), err)]
    async fn initialize(&self) -> Result<(), MemoryError> {
        let pool = self.pool().await?;
        for statement in [
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                turns JSONB NOT NULL DEFAULT '[]'::jsonb,
                created_at TIMESTAMPTZ NOT NULL,
                last_activity TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS personas (
                user_id TEXT PRIMARY KEY,
                doc JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS policies (
                key TEXT PRIMARY KEY,
                doc JSONB NOT NULL,
                access_count BIGINT NOT NULL DEFAULT 0,
                last_accessed TIMESTAMPTZ NOT NULL
            )
            "#,
        ] {
            sqlx::query(statement)
                .execute(pool.as_ref())
                .await
                .map_err(|e| MemoryError::Backend(format!("create table: {e}")))?;
        }
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationMemory>, MemoryError> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(pool.as_ref())
            .await
            .map_err(|e| MemoryError::Backend(format!("get conversation: {e}")))?;
        let Some(row) = row else { return Ok(None) };
        let turns: serde_json::Value = row
            .try_get("turns")
            .map_err(|e| MemoryError::Backend(e.to_string()))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| MemoryError::Backend(e.to_string()))?;
        let last_activity: DateTime<Utc> = row
            .try_get("last_activity")
            .map_err(|e| MemoryError::Backend(e.to_string()))?;
        Ok(Some(ConversationMemory {
            id: row
                .try_get("id")
                .map_err(|e| MemoryError::Backend(e.to_string()))?,
            user_id: row
                .try_get("user_id")
                .map_err(|e| MemoryError::Backend(e.to_string()))?,
            turns: serde_json::from_value::<Vec<Turn>>(turns)?,
            created_at,
            last_activity,
        }))
    }

    async fn append_turn(
        &self,
        id: &str,
        user_id: Option<&str>,
        turn: Turn,
    ) -> Result<ConversationMemory, MemoryError> {
        let mut memory = self
            .get_conversation(id)
            .await?
            .unwrap_or_else(|| ConversationMemory::new(id, user_id.map(String::from)));
        memory.push_turn(turn, self.max_turns);
        self.write_conversation(&memory).await?;
        Ok(memory)
    }

    async fn cleanup_expired(&self, ttl: Duration) -> Result<usize, MemoryError> {
        let pool = self.pool().await?;
        let cutoff = Utc::now() - ttl;
        let result = sqlx::query("DELETE FROM conversations WHERE last_activity < $1")
            .bind(cutoff)
            .execute(pool.as_ref())
            .await
            .map_err(|e| MemoryError::Backend(format!("cleanup: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    async fn get_persona(&self, user_id: &str) -> Result<Option<PersonaMemory>, MemoryError> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT doc FROM personas WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool.as_ref())
            .await
            .map_err(|e| MemoryError::Backend(format!("get persona: {e}")))?;
        match row {
            Some(row) => {
                let doc: serde_json::Value = row
                    .try_get("doc")
                    .map_err(|e| MemoryError::Backend(e.to_string()))?;
                Ok(Some(serde_json::from_value(doc)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_persona(&self, persona: PersonaMemory) -> Result<(), MemoryError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO personas (user_id, doc) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET doc = EXCLUDED.doc
            "#,
        )
        .bind(&persona.user_id)
        .bind(serde_json::to_value(&persona)?)
        .execute(pool.as_ref())
        .await
        .map_err(|e| MemoryError::Backend(format!("upsert persona: {e}")))?;
        Ok(())
    }

    async fn put_policy(&self, entry: PolicyEntry) -> Result<(), MemoryError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO policies (key, doc, access_count, last_accessed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET
                doc = EXCLUDED.doc,
                last_accessed = EXCLUDED.last_accessed
            "#,
        )
        .bind(&entry.key)
        .bind(serde_json::to_value(&entry)?)
        .bind(entry.access_count as i64)
        .bind(entry.last_accessed)
        .execute(pool.as_ref())
        .await
        .map_err(|e| MemoryError::Backend(format!("put policy: {e}")))?;
        Ok(())
    }

    async fn get_policy(&self, key: &str) -> Result<Option<PolicyEntry>, MemoryError> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            r#"
            UPDATE policies
            SET access_count = access_count + 1, last_accessed = NOW()
            WHERE key = $1
            RETURNING doc, access_count, last_accessed
            "#,
        )
        .bind(key)
        .fetch_optional(pool.as_ref())
        .await
        .map_err(|e| MemoryError::Backend(format!("get policy: {e}")))?;
        match row {
            Some(row) => {
                let doc: serde_json::Value = row
                    .try_get("doc")
                    .map_err(|e| MemoryError::Backend(e.to_string()))?;
                let mut entry: PolicyEntry = serde_json::from_value(doc)?;
                entry.access_count = row
                    .try_get::<i64, _>("access_count")
                    .map_err(|e| MemoryError::Backend(e.to_string()))?
                    as u64;
                entry.last_accessed = row
                    .try_get("last_accessed")
                    .map_err(|e| MemoryError::Backend(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn search_policies(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PolicyEntry>, MemoryError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT doc, access_count, last_accessed FROM policies ORDER BY access_count DESC, last_accessed DESC",
        )
        .fetch_all(pool.as_ref())
        .await
        .map_err(|e| MemoryError::Backend(format!("search: {e}")))?;

        let lowered = query.to_lowercase();
        let mut hits = Vec::new();
        for row in rows {
            let doc: serde_json::Value = row
                .try_get("doc")
                .map_err(|e| MemoryError::Backend(e.to_string()))?;
            let mut entry: PolicyEntry = serde_json::from_value(doc)?;
            entry.access_count = row
                .try_get::<i64, _>("access_count")
                .map_err(|e| MemoryError::Backend(e.to_string()))? as u64;
            entry.last_accessed = row
                .try_get("last_accessed")
                .map_err(|e| MemoryError::Backend(e.to_string()))?;
            if entry.matches(&lowered) {
                hits.push(entry);
                if hits.len() == limit {
                    break;
                }
            }
        }
        // Record the accesses the search produced.
        for hit in &hits {
            sqlx::query(
                "UPDATE policies SET access_count = access_count + 1, last_accessed = NOW() WHERE key = $1",
            )
            .bind(&hit.key)
            .execute(pool.as_ref())
            .await
            .map_err(|e| MemoryError::Backend(format!("record access: {e}")))?;
        }
        Ok(hits)
    }

    async fn health_check(&self) -> bool {
        match self.pool().await {
            Ok(pool) => sqlx::query("SELECT 1").execute(pool.as_ref()).await.is_ok(),
            Err(_) => false,
        }
    }
}
