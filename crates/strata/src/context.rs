//! Append-only conversation history
//!
//! History is only ever appended to and rendered in full, so the prompt
//! prefix for a conversation never changes between turns. The store holds
//! at most `max_conversations` conversations; the least recently used one is
//! dropped whole when a new one would exceed that, and conversations idle
//! past the configured ttl expire.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use moka::{future::Cache, policy::EvictionPolicy};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::ConversationConfig;

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
    pub mode: String,
    pub timestamp: DateTime<Utc>,
}

type History = Arc<RwLock<Vec<Turn>>>;

#[derive(Debug)]
pub struct ConversationStore {
    conversations: Cache<String, History>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::from_config(&ConversationConfig::default())
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_conversations: u64, idle_ttl: Duration) -> Self {
        let conversations = Cache::builder()
            .max_capacity(max_conversations)
            .time_to_idle(idle_ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { conversations }
    }

    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::with_limits(config.max_conversations, config.idle_ttl())
    }

    pub async fn append(
        &self,
        conversation_id: &str,
        user: impl Into<String>,
        assistant: impl Into<String>,
        mode: &str,
    ) {
        let history = self
            .conversations
            .get_with(conversation_id.to_string(), async {
                Arc::new(RwLock::new(Vec::new()))
            })
            .await;
        history.write().await.push(Turn {
            user: user.into(),
            assistant: assistant.into(),
            mode: mode.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub async fn turns(&self, conversation_id: &str) -> Vec<Turn> {
        match self.conversations.get(conversation_id).await {
            Some(history) => history.read().await.clone(),
            None => Vec::new(),
        }
    }

    /// Render the whole history as a prompt prefix
    pub async fn render(&self, conversation_id: &str) -> String {
        let Some(history) = self.conversations.get(conversation_id).await else {
            return String::new();
        };
        let turns = history.read().await;
        turns
            .iter()
            .map(|t| format!("User: {}\nAssistant: {}\n", t.user, t.assistant))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of conversations currently held, after pending evictions
    pub async fn conversation_count(&self) -> u64 {
        self.conversations.run_pending_tasks().await;
        self.conversations.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_conversation_is_empty() {
        let store = ConversationStore::new();
        assert!(store.render("nope").await.is_empty());
        assert!(store.turns("nope").await.is_empty());
    }

    #[tokio::test]
    async fn test_rendered_prefix_is_stable_across_appends() {
        let store = ConversationStore::new();
        store.append("c1", "hi", "hello!", "chat").await;
        let before = store.render("c1").await;

        store.append("c1", "what is 2+2?", "4", "chat").await;
        let after = store.render("c1").await;

        assert!(after.starts_with(&before));
        assert!(after.contains("User: what is 2+2?\nAssistant: 4"));
        assert_eq!(store.turns("c1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_least_recently_used_conversation_is_evicted() {
        let store = ConversationStore::with_limits(2, Duration::from_secs(3600));
        store.append("old", "hi", "hello", "chat").await;
        store.append("kept", "hi", "hello", "chat").await;
        // Touch "kept" so "old" is the least recently used
        store.render("kept").await;
        store.append("new", "hi", "hello", "chat").await;

        assert_eq!(store.conversation_count().await, 2);
        assert!(store.turns("old").await.is_empty());
        assert_eq!(store.turns("kept").await.len(), 1);
        assert_eq!(store.turns("new").await.len(), 1);
    }

    #[tokio::test]
    async fn test_appending_to_a_live_conversation_does_not_evict_it() {
        let store = ConversationStore::with_limits(1, Duration::from_secs(3600));
        for n in 0..5 {
            store.append("c1", format!("q{}", n), "a", "chat").await;
        }

        assert_eq!(store.conversation_count().await, 1);
        assert_eq!(store.turns("c1").await.len(), 5);
    }
}
