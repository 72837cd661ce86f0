//! Pusher-protocol websocket connection
//!
//! One connection owns a reader task (inbound frames → registry, protocol
//! replies) and a writer task (serialized client frames → socket).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::api::ChannelAuthorizer;
use crate::error::{ClientError, ClientResult};

use super::events::{ChannelEvent, ClientEvent, ServerEvent};
use super::subscriptions::{SubscriptionId, SubscriptionRegistry};
use super::{ChannelClient, RealtimeTransport};

/// Timeout for the websocket handshake and `connection_established`
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout waiting for `subscription_succeeded`
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for any frame after sending a keepalive ping
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

type PendingSubscriptions = Arc<Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>;

enum Outbound {
    Frame(ClientEvent),
    Close,
}

/// Opens Pusher connections against one app endpoint
pub struct PusherTransport {
    url: String,
    authorizer: Arc<dyn ChannelAuthorizer>,
}

impl PusherTransport {
    pub fn new(url: impl Into<String>, authorizer: Arc<dyn ChannelAuthorizer>) -> Self {
        Self {
            url: url.into(),
            authorizer,
        }
    }
}

#[async_trait]
impl RealtimeTransport for PusherTransport {
    async fn open(&self) -> ClientResult<Arc<dyn ChannelClient>> {
        let conn = PusherConnection::connect(&self.url, Arc::clone(&self.authorizer)).await?;
        Ok(Arc::new(conn))
    }
}

/// An established Pusher connection
pub struct PusherConnection {
    /// Socket id assigned by the server, signed into private channel auth
    pub socket_id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    registry: Arc<SubscriptionRegistry>,
    pending: PendingSubscriptions,
    authorizer: Arc<dyn ChannelAuthorizer>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PusherConnection {
    /// Connect and wait for the server handshake
    pub async fn connect(url: &str, authorizer: Arc<dyn ChannelAuthorizer>) -> ClientResult<Self> {
        let (ws, _response) = timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| ClientError::Timeout("websocket connect"))??;
        let (mut sink, mut stream) = ws.split();

        let (socket_id, activity_timeout_secs) = timeout(CONNECT_TIMEOUT, async {
            while let Some(frame) = stream.next().await {
                let WsMessage::Text(text) = frame? else {
                    continue;
                };
                match ServerEvent::parse(&text)? {
                    ServerEvent::ConnectionEstablished {
                        socket_id,
                        activity_timeout_secs,
                    } => return Ok((socket_id, activity_timeout_secs)),
                    ServerEvent::Error { code, message } => {
                        return Err(ClientError::Protocol(format!(
                            "connection refused ({:?}): {}",
                            code, message
                        )))
                    }
                    _ => continue,
                }
            }
            Err(ClientError::Closed)
        })
        .await
        .map_err(|_| ClientError::Timeout("connection_established"))??;

        tracing::info!(
            socket_id = %socket_id,
            activity_timeout_secs,
            "Realtime connection established"
        );

        let registry = Arc::new(SubscriptionRegistry::new());
        let pending: PendingSubscriptions = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        // Spawn task to send frames to the server
        let writer = tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                match outbound {
                    Outbound::Frame(event) => match serde_json::to_string(&event) {
                        Ok(json) => {
                            if sink.send(WsMessage::Text(json)).await.is_err() {
                                break; // Connection closed
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = ?e, "Failed to serialize realtime frame");
                        }
                    },
                    Outbound::Close => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Spawn task to read frames from the server
        let reader_registry = Arc::clone(&registry);
        let reader_pending = Arc::clone(&pending);
        let reader_outbound = outbound_tx.clone();
        let idle = Duration::from_secs(activity_timeout_secs.max(1));
        let reader_socket = socket_id.clone();
        let reader = tokio::spawn(async move {
            let mut awaiting_pong = false;
            loop {
                let wait = if awaiting_pong { PONG_TIMEOUT } else { idle };
                let frame = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    frame = timeout(wait, stream.next()) => frame,
                };

                let frame = match frame {
                    Err(_) if awaiting_pong => {
                        tracing::warn!(socket_id = %reader_socket, "No pong from server; dropping connection");
                        break;
                    }
                    Err(_) => {
                        let _ = reader_outbound.send(Outbound::Frame(ClientEvent::Ping {}));
                        awaiting_pong = true;
                        continue;
                    }
                    Ok(None) => {
                        tracing::info!(socket_id = %reader_socket, "Realtime stream ended");
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        tracing::error!(error = ?e, socket_id = %reader_socket, "Realtime read failed");
                        break;
                    }
                    Ok(Some(Ok(frame))) => frame,
                };
                awaiting_pong = false;

                let text = match frame {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => {
                        tracing::info!(socket_id = %reader_socket, "Realtime close frame received");
                        break;
                    }
                    _ => continue, // tungstenite answers websocket-level pings itself
                };

                match ServerEvent::parse(&text) {
                    Ok(ServerEvent::Ping) => {
                        let _ = reader_outbound.send(Outbound::Frame(ClientEvent::Pong {}));
                    }
                    Ok(ServerEvent::Pong) => {}
                    Ok(ServerEvent::ChannelEvent(event)) => {
                        reader_registry.dispatch(event).await;
                    }
                    Ok(ServerEvent::SubscriptionSucceeded { channel }) => {
                        if let Some(tx) = reader_pending.lock().await.remove(&channel) {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    Ok(ServerEvent::SubscriptionError {
                        channel,
                        status,
                        message,
                    }) => {
                        tracing::error!(channel = %channel, status = ?status, message = %message, "Subscription rejected");
                        if let Some(tx) = reader_pending.lock().await.remove(&channel) {
                            let _ = tx.send(Err(message));
                        }
                    }
                    Ok(ServerEvent::Error { code, message }) => {
                        tracing::warn!(code = ?code, message = %message, "Realtime server error");
                    }
                    Ok(ServerEvent::ConnectionEstablished { .. }) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, frame = %text, "Failed to parse realtime frame");
                    }
                }
            }

            // Fail any subscription still waiting for confirmation
            for (_, tx) in reader_pending.lock().await.drain() {
                let _ = tx.send(Err("connection closed".to_string()));
            }
        });

        Ok(Self {
            socket_id,
            outbound: outbound_tx,
            registry,
            pending,
            authorizer,
            shutdown: shutdown_tx,
            tasks: Mutex::new(vec![reader, writer]),
        })
    }

    fn send(&self, event: ClientEvent) -> ClientResult<()> {
        self.outbound
            .send(Outbound::Frame(event))
            .map_err(|_| ClientError::Closed)
    }

    /// Send `pusher:subscribe` for a channel and wait for the server's verdict
    async fn subscribe_channel(&self, channel: &str) -> ClientResult<()> {
        let (auth, channel_data) =
            if channel.starts_with("private-") || channel.starts_with("presence-") {
                let auth = self.authorizer.authorize(&self.socket_id, channel).await?;
                (Some(auth.auth), auth.channel_data)
            } else {
                (None, None)
            };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(channel.to_string(), tx);

        self.send(ClientEvent::Subscribe {
            channel: channel.to_string(),
            auth,
            channel_data,
        })?;

        match timeout(SUBSCRIBE_TIMEOUT, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(ClientError::ChannelAuth(message)),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(channel);
                Err(ClientError::Timeout("subscription_succeeded"))
            }
        }
    }
}

#[async_trait]
impl ChannelClient for PusherConnection {
    async fn subscribe(
        &self,
        channel: &str,
        event: &str,
        handler: mpsc::UnboundedSender<ChannelEvent>,
    ) -> ClientResult<SubscriptionId> {
        let (id, first) = self.registry.join(channel, event, handler).await;
        if first {
            if let Err(e) = self.subscribe_channel(channel).await {
                self.registry.leave(channel, &id).await;
                return Err(e);
            }
            tracing::info!(socket_id = %self.socket_id, channel = %channel, "Subscribed to channel");
        }
        Ok(id)
    }

    async fn unsubscribe(&self, channel: &str, id: &SubscriptionId) {
        if self.registry.leave(channel, id).await {
            let _ = self.send(ClientEvent::Unsubscribe {
                channel: channel.to_string(),
            });
        }
    }

    async fn disconnect(&self) {
        for channel in self.registry.clear().await {
            let _ = self.send(ClientEvent::Unsubscribe { channel });
        }
        let _ = self.outbound.send(Outbound::Close);
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if timeout(Duration::from_secs(2), task).await.is_err() {
                tracing::warn!(socket_id = %self.socket_id, "Realtime task did not stop in time");
            }
        }

        tracing::info!(socket_id = %self.socket_id, "Realtime connection closed");
    }
}
