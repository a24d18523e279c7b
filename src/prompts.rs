//! Content-addressed prompt version registry.
//!
//! Every fully assembled prompt is stored under its SHA-256 hex hash; the
//! hash is the single source of truth for "what was asked". Versions are
//! dense and monotonically increasing per logical prompt name, so persona
//! and conversation context changes produce new versions automatically.
//!
//! # Examples
//!
//! ```
//! use safetydesk::prompts::PromptRegistry;
//!
//! let registry = PromptRegistry::new();
//! let hash = registry.store("You are a safety assistant...", "ask_answer");
//! assert_eq!(registry.store("You are a safety assistant...", "ask_answer"), hash);
//! assert_eq!(registry.get_by_hash(&hash).unwrap().version, 1);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::sha256_hex;

/// One immutable prompt version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    /// SHA-256 hex of the prompt content; primary key.
    pub hash: String,
    pub name: String,
    pub content: String,
    /// Dense, monotonically increasing per name, starting at 1.
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    by_hash: FxHashMap<String, PromptVersion>,
    // Hashes per name in version order.
    by_name: FxHashMap<String, Vec<String>>,
}

/// Thread-safe, process-wide prompt store keyed by content hash.
#[derive(Default)]
pub struct PromptRegistry {
    inner: RwLock<RegistryInner>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` under `name`, returning its hash.
    ///
    /// Re-storing identical content is a no-op that returns the existing
    /// hash; the stored entry is never overwritten, so a hash collision on
    /// distinct content cannot silently replace what was recorded first.
    pub fn store(&self, content: &str, name: &str) -> String {
        let hash = sha256_hex(content);
        let mut inner = self.inner.write();
        if inner.by_hash.contains_key(&hash) {
            return hash;
        }
        let history = inner.by_name.entry(name.to_string()).or_default();
        let version = history.len() as u32 + 1;
        history.push(hash.clone());
        inner.by_hash.insert(
            hash.clone(),
            PromptVersion {
                hash: hash.clone(),
                name: name.to_string(),
                content: content.to_string(),
                version,
                created_at: Utc::now(),
            },
        );
        hash
    }

    pub fn get_by_hash(&self, hash: &str) -> Option<PromptVersion> {
        self.inner.read().by_hash.get(hash).cloned()
    }

    /// All versions recorded under `name`, oldest first.
    pub fn history(&self, name: &str) -> Vec<PromptVersion> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| inner.by_hash.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_idempotent_on_content() {
        let registry = PromptRegistry::new();
        let h1 = registry.store("prompt body", "ask_answer");
        let h2 = registry.store("prompt body", "ask_answer");
        assert_eq!(h1, h2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_by_hash(&h1).unwrap().content, "prompt body");
    }

    #[test]
    fn versions_are_dense_per_name() {
        let registry = PromptRegistry::new();
        registry.store("v1", "ask_answer");
        registry.store("v2", "ask_answer");
        registry.store("other", "letter_draft");
        registry.store("v3", "ask_answer");

        let history = registry.history("ask_answer");
        let versions: Vec<u32> = history.iter().map(|p| p.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(registry.history("letter_draft")[0].version, 1);
    }

    #[test]
    fn unknown_lookups_are_empty() {
        let registry = PromptRegistry::new();
        assert!(registry.get_by_hash("deadbeef").is_none());
        assert!(registry.history("nothing").is_empty());
    }
}
