//! Short-term conversation memory: the last few reviewer/tailor exchanges
//! of a conversation, kept in process. Not part of the persisted scope.
//! The loop forgets a conversation once its run ends, so only in-flight
//! conversations hold entries.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::optimization::scope::ScopeKey;

pub const DEFAULT_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeRole {
    Reviewer,
    Tailor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub role: ExchangeRole,
    pub content: String,
}

pub struct ConversationMemory {
    window: usize,
    conversations: RwLock<HashMap<ScopeKey, VecDeque<Exchange>>>,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ConversationMemory {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Appends an exchange, evicting the oldest beyond the window.
    pub async fn append(&self, key: &ScopeKey, exchange: Exchange) {
        let mut conversations = self.conversations.write().await;
        let history = conversations.entry(key.clone()).or_default();
        history.push_back(exchange);
        while history.len() > self.window {
            history.pop_front();
        }
    }

    /// Oldest first.
    pub async fn recent(&self, key: &ScopeKey) -> Vec<Exchange> {
        self.conversations
            .read()
            .await
            .get(key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn forget(&self, key: &ScopeKey) {
        self.conversations.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(n: usize) -> Exchange {
        Exchange {
            role: ExchangeRole::Reviewer,
            content: format!("message {n}"),
        }
    }

    #[tokio::test]
    async fn test_window_evicts_oldest() {
        let memory = ConversationMemory::new(3);
        let key = ScopeKey::new("agent", "conv");
        for n in 0..5 {
            memory.append(&key, exchange(n)).await;
        }

        let recent = memory.recent(&key).await;
        assert_eq!(recent, vec![exchange(2), exchange(3), exchange(4)]);
    }

    #[tokio::test]
    async fn test_conversations_are_separate() {
        let memory = ConversationMemory::default();
        let a = ScopeKey::new("agent", "a");
        let b = ScopeKey::new("agent", "b");
        memory.append(&a, exchange(1)).await;

        assert_eq!(memory.recent(&a).await.len(), 1);
        assert!(memory.recent(&b).await.is_empty());

        memory.forget(&a).await;
        assert!(memory.recent(&a).await.is_empty());
    }
}
