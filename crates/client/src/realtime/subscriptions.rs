//! Channel subscription registry
//!
//! Maps channel names to the handlers listening on them and dispatches inbound
//! application events to every matching handler.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::{event_matches, ChannelEvent};

/// Handle identifying one registered handler
pub type SubscriptionId = Uuid;

/// One handler listening for one event name on a channel
#[derive(Debug)]
struct Handler {
    id: SubscriptionId,
    event: String,
    sender: mpsc::UnboundedSender<ChannelEvent>,
}

/// Manages channel handlers for a realtime connection
pub struct SubscriptionRegistry {
    /// Map of channel name -> handlers
    channels: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handler for `event` on `channel`
    ///
    /// Returns the handler id and whether this is the channel's first handler
    /// (the caller must then send the protocol-level subscribe).
    pub async fn join(
        &self,
        channel: &str,
        event: &str,
        sender: mpsc::UnboundedSender<ChannelEvent>,
    ) -> (SubscriptionId, bool) {
        let mut channels = self.channels.write().await;
        let handlers = channels.entry(channel.to_string()).or_default();
        let first = handlers.is_empty();
        let id = Uuid::new_v4();
        handlers.push(Handler {
            id,
            event: event.to_string(),
            sender,
        });

        tracing::debug!(
            channel = %channel,
            event = %event,
            handler_count = handlers.len(),
            "Handler registered on channel"
        );
        (id, first)
    }

    /// Remove one handler; returns true when the channel has no handlers left
    pub async fn leave(&self, channel: &str, id: &SubscriptionId) -> bool {
        let mut channels = self.channels.write().await;
        let Some(handlers) = channels.get_mut(channel) else {
            return false;
        };
        handlers.retain(|h| h.id != *id);

        if handlers.is_empty() {
            channels.remove(channel);
            tracing::debug!(channel = %channel, "Removed empty channel");
            true
        } else {
            false
        }
    }

    /// Deliver an event to every handler on its channel whose event name matches
    ///
    /// Handlers whose receiver was dropped are pruned.
    pub async fn dispatch(&self, event: ChannelEvent) -> usize {
        let mut channels = self.channels.write().await;
        let Some(handlers) = channels.get_mut(&event.channel) else {
            tracing::warn!(
                channel = %event.channel,
                event = %event.event,
                "Event for channel without handlers"
            );
            return 0;
        };

        let mut delivered = 0;
        handlers.retain(|h| {
            if !event_matches(&event.event, &h.event) {
                return true;
            }
            match h.sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    tracing::warn!(handler_id = %h.id, "Handler receiver dropped; removing");
                    false
                }
            }
        });

        tracing::debug!(
            channel = %event.channel,
            event = %event.event,
            recipients = delivered,
            "Dispatched channel event"
        );
        delivered
    }

    /// Drop every handler, returning the channels that were subscribed
    pub async fn clear(&self) -> Vec<String> {
        let mut channels = self.channels.write().await;
        channels.drain().map(|(name, _)| name).collect()
    }

    /// Number of handlers on a channel
    #[cfg(test)]
    pub async fn handler_count(&self, channel: &str) -> usize {
        let channels = self.channels.read().await;
        channels.get(channel).map(|v| v.len()).unwrap_or(0)
    }

    /// Number of channels with at least one handler
    #[cfg(test)]
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn event(channel: &str, name: &str) -> ChannelEvent {
        ChannelEvent {
            channel: channel.to_string(),
            event: name.to_string(),
            data: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert_eq!(registry.handler_count("private-chat.1").await, 0);

        let (id, first) = registry.join("private-chat.1", "NewMessageSent", tx.clone()).await;
        assert!(first);
        let (_, second_first) = registry.join("private-chat.1", "NewMessageSent", tx).await;
        assert!(!second_first);
        assert_eq!(registry.handler_count("private-chat.1").await, 2);

        assert!(!registry.leave("private-chat.1", &id).await);
        assert_eq!(registry.handler_count("private-chat.1").await, 1);
    }

    #[tokio::test]
    async fn test_dispatch_filters_by_event_name() {
        let registry = SubscriptionRegistry::new();
        let (tx_msg, mut rx_msg) = mpsc::unbounded_channel();
        let (tx_other, mut rx_other) = mpsc::unbounded_channel();

        registry.join("private-chat.1", "NewMessageSent", tx_msg).await;
        registry.join("private-chat.1", "TicketClosed", tx_other).await;

        let delivered = registry
            .dispatch(event("private-chat.1", "App\\Events\\NewMessageSent"))
            .await;

        assert_eq!(delivered, 1);
        assert!(rx_msg.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let registry = SubscriptionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.join("private-chat.1", "NewMessageSent", tx).await;
        drop(rx);

        assert_eq!(registry.dispatch(event("private-chat.1", "NewMessageSent")).await, 0);
        assert_eq!(registry.handler_count("private-chat.1").await, 0);
    }

    #[tokio::test]
    async fn test_clear_returns_channels() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.join("private-chat.1", "NewMessageSent", tx.clone()).await;
        registry.join("private-chat.2", "NewMessageSent", tx).await;

        let mut cleared = registry.clear().await;
        cleared.sort();
        assert_eq!(cleared, vec!["private-chat.1", "private-chat.2"]);
        assert_eq!(registry.channel_count().await, 0);
    }
}
