//! Conversation memory: a bounded, append-only window of turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of recent turns concatenated by [`ConversationMemory::recent_context`].
pub const DEFAULT_RECENT_TURNS: usize = 3;

/// One user/assistant exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub user_message: String,
    pub assistant_response: String,
    #[serde(default)]
    pub citation_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        user_message: impl Into<String>,
        assistant_response: impl Into<String>,
        citation_ids: Vec<String>,
    ) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_response: assistant_response.into(),
            citation_ids,
            timestamp: Utc::now(),
        }
    }
}

/// A conversation's retained history.
///
/// Turns are append-only; once the window exceeds the retention bound the
/// oldest turns are dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationMemory {
    pub fn new(id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id,
            turns: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a turn, trimming the window to `max_turns`.
    pub fn push_turn(&mut self, turn: Turn, max_turns: usize) {
        self.turns.push(turn);
        if self.turns.len() > max_turns {
            let excess = self.turns.len() - max_turns;
            self.turns.drain(..excess);
        }
        self.last_activity = Utc::now();
    }

    /// Concatenate the last `k` turns for prompt interpolation.
    pub fn recent_context(&self, k: usize) -> String {
        let start = self.turns.len().saturating_sub(k);
        self.turns[start..]
            .iter()
            .map(|turn| {
                format!(
                    "User: {}\nAssistant: {}",
                    turn.user_message, turn.assistant_response
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_drops_oldest_turns() {
        let mut memory = ConversationMemory::new("c1", None);
        for i in 0..15 {
            memory.push_turn(Turn::new(format!("q{i}"), format!("a{i}"), vec![]), 10);
        }
        assert_eq!(memory.turns.len(), 10);
        assert_eq!(memory.turns[0].user_message, "q5");
        assert_eq!(memory.turns[9].user_message, "q14");
    }

    #[test]
    fn recent_context_takes_last_k() {
        let mut memory = ConversationMemory::new("c1", None);
        for i in 0..5 {
            memory.push_turn(Turn::new(format!("q{i}"), format!("a{i}"), vec![]), 10);
        }
        let context = memory.recent_context(DEFAULT_RECENT_TURNS);
        assert!(!context.contains("q1"));
        assert!(context.contains("User: q2"));
        assert!(context.contains("Assistant: a4"));
    }
}
