//! Unread-message badges per conversation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use fleetchat_shared::ConversationId;

/// Unread counters shown on service order badges
#[async_trait]
pub trait NotificationBadgeStore: Send + Sync {
    async fn add_new_message(&self, conversation: &ConversationId);

    async fn clear_new_messages(&self, conversation: &ConversationId);

    async fn count(&self, conversation: &ConversationId) -> u32;
}

/// Badge counters kept in memory for the lifetime of the process
#[derive(Debug, Clone, Default)]
pub struct InMemoryBadgeStore {
    counts: Arc<RwLock<HashMap<ConversationId, u32>>>,
}

impl InMemoryBadgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationBadgeStore for InMemoryBadgeStore {
    async fn add_new_message(&self, conversation: &ConversationId) {
        let mut counts = self.counts.write().await;
        *counts.entry(conversation.clone()).or_insert(0) += 1;
    }

    async fn clear_new_messages(&self, conversation: &ConversationId) {
        if self.counts.write().await.remove(conversation).is_some() {
            tracing::debug!(conversation_id = %conversation, "Cleared unread badge");
        }
    }

    async fn count(&self, conversation: &ConversationId) -> u32 {
        self.counts
            .read()
            .await
            .get(conversation)
            .copied()
            .unwrap_or(0)
    }
}
