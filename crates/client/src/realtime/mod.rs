//! Realtime transport
//!
//! A conversation's channel announces new messages; the session refetches on
//! every announcement. Provides:
//! - Pusher protocol frame parsing
//! - Per-channel handler registry
//! - Websocket connection with private channel authorization

pub mod connection;
pub mod events;
pub mod subscriptions;

pub use connection::{PusherConnection, PusherTransport};
pub use events::{event_matches, ChannelEvent, ClientEvent, ServerEvent};
pub use subscriptions::{SubscriptionId, SubscriptionRegistry};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ClientResult;

/// Event announcing that a conversation has a new message
pub const NEW_MESSAGE_EVENT: &str = "NewMessageSent";

/// Opens channel clients
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn open(&self) -> ClientResult<Arc<dyn ChannelClient>>;
}

/// A live pub/sub connection
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Register `handler` for `event` on `channel`, subscribing on first use
    async fn subscribe(
        &self,
        channel: &str,
        event: &str,
        handler: mpsc::UnboundedSender<ChannelEvent>,
    ) -> ClientResult<SubscriptionId>;

    /// Remove one handler, unsubscribing when it was the channel's last
    async fn unsubscribe(&self, channel: &str, id: &SubscriptionId);

    /// Drop every handler and close the connection
    async fn disconnect(&self);
}

/// Open a channel client for a signed-in user
///
/// Returns `None` when no auth token is stored or the connection fails; the
/// caller carries on without realtime.
pub async fn connect(
    transport: &dyn RealtimeTransport,
    auth_token: Option<String>,
) -> Option<Arc<dyn ChannelClient>> {
    if auth_token.as_deref().map(str::trim).unwrap_or_default().is_empty() {
        tracing::error!("No auth token stored; realtime disabled");
        return None;
    }

    match transport.open().await {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::error!(error = %e, "Realtime connection failed");
            None
        }
    }
}
