//! Policy memory: keyword-searchable reference entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored policy reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub key: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl PolicyEntry {
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        tags: Vec<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            content: content.into(),
            tags,
            category: category.into(),
            access_count: 0,
            last_accessed: Utc::now(),
        }
    }

    /// Case-insensitive substring match over title, content, tags, and
    /// category.
    pub fn matches(&self, lowered_query: &str) -> bool {
        self.title.to_lowercase().contains(lowered_query)
            || self.content.to_lowercase().contains(lowered_query)
            || self.category.to_lowercase().contains(lowered_query)
            || self
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(lowered_query))
    }

    pub(crate) fn record_access(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }
}
