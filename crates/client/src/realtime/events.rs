//! Pusher protocol frames and serialization
//!
//! Reverb speaks protocol version 7: every frame is a JSON object with an
//! `event` name, an optional `channel`, and `data` that the server usually
//! sends as a JSON-encoded string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, ClientResult};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Frames sent from client to server
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Subscribe to a channel; private channels carry the signed auth string
    #[serde(rename = "pusher:subscribe")]
    Subscribe {
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_data: Option<String>,
    },

    /// Unsubscribe from a channel
    #[serde(rename = "pusher:unsubscribe")]
    Unsubscribe { channel: String },

    /// Keepalive ping after an idle period
    #[serde(rename = "pusher:ping")]
    Ping {},

    /// Reply to a server ping
    #[serde(rename = "pusher:pong")]
    Pong {},
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Raw inbound frame before interpretation
#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

impl InboundFrame {
    /// Decode `data`, which may be a JSON string wrapping an object
    fn payload(&self) -> Value {
        match &self.data {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| self.data.clone()),
            other => other.clone(),
        }
    }
}

/// Frames sent from server to client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Handshake completed; the socket id is needed for private channel auth
    ConnectionEstablished {
        socket_id: String,
        activity_timeout_secs: u64,
    },

    SubscriptionSucceeded { channel: String },

    SubscriptionError {
        channel: String,
        status: Option<u16>,
        message: String,
    },

    Error { code: Option<u16>, message: String },

    Ping,

    Pong,

    /// Application event broadcast on a channel
    ChannelEvent(ChannelEvent),
}

/// Application event delivered to subscription handlers
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
    pub data: Value,
}

/// Default activity timeout when the server does not announce one (seconds)
pub const DEFAULT_ACTIVITY_TIMEOUT_SECS: u64 = 120;

impl ServerEvent {
    /// Parse one text frame
    pub fn parse(text: &str) -> ClientResult<Self> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        let payload = frame.payload();

        let event = match frame.event.as_str() {
            "pusher:connection_established" => {
                let socket_id = payload
                    .get("socket_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ClientError::Protocol("connection_established without socket_id".into())
                    })?
                    .to_string();
                let activity_timeout_secs = payload
                    .get("activity_timeout")
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT_SECS);
                ServerEvent::ConnectionEstablished {
                    socket_id,
                    activity_timeout_secs,
                }
            }
            "pusher_internal:subscription_succeeded" => ServerEvent::SubscriptionSucceeded {
                channel: frame.channel.unwrap_or_default(),
            },
            "pusher:subscription_error" => ServerEvent::SubscriptionError {
                channel: frame.channel.unwrap_or_default(),
                status: payload
                    .get("status")
                    .and_then(Value::as_u64)
                    .and_then(|s| u16::try_from(s).ok()),
                message: payload
                    .get("error")
                    .or_else(|| payload.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("subscription rejected")
                    .to_string(),
            },
            "pusher:error" => ServerEvent::Error {
                code: payload
                    .get("code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok()),
                message: payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "pusher:ping" => ServerEvent::Ping,
            "pusher:pong" => ServerEvent::Pong,
            _ => match frame.channel {
                Some(channel) => ServerEvent::ChannelEvent(ChannelEvent {
                    channel,
                    event: frame.event,
                    data: payload,
                }),
                None => {
                    return Err(ClientError::Protocol(format!(
                        "unexpected event without channel: {}",
                        frame.event
                    )))
                }
            },
        };

        Ok(event)
    }
}

/// Whether a received event name satisfies a listener's event name
///
/// Laravel Echo namespaces broadcast events (`App\Events\NewMessageSent`);
/// a bare name matches its namespaced form.
pub fn event_matches(received: &str, wanted: &str) -> bool {
    let wanted = wanted.trim_start_matches('.');
    received == wanted
        || received
            .rsplit_once('\\')
            .map(|(_, name)| name == wanted)
            .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_established_with_string_data() {
        let json = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"123.456\",\"activity_timeout\":30}"}"#;
        let event = ServerEvent::parse(json).unwrap();
        assert_eq!(
            event,
            ServerEvent::ConnectionEstablished {
                socket_id: "123.456".to_string(),
                activity_timeout_secs: 30,
            }
        );
    }

    #[test]
    fn test_channel_event_parsing() {
        let json = r#"{"event":"App\\Events\\NewMessageSent","channel":"private-chat.7","data":"{\"message_id\":5}"}"#;
        match ServerEvent::parse(json).unwrap() {
            ServerEvent::ChannelEvent(event) => {
                assert_eq!(event.channel, "private-chat.7");
                assert!(event_matches(&event.event, "NewMessageSent"));
                assert_eq!(event.data["message_id"], 5);
            }
            other => panic!("Expected channel event, got {:?}", other),
        }
    }

    #[test]
    fn test_subscription_error_parsing() {
        let json = r#"{"event":"pusher:subscription_error","channel":"private-chat.7","data":{"type":"AuthError","error":"Unauthorized","status":403}}"#;
        assert_eq!(
            ServerEvent::parse(json).unwrap(),
            ServerEvent::SubscriptionError {
                channel: "private-chat.7".to_string(),
                status: Some(403),
                message: "Unauthorized".to_string(),
            }
        );
    }

    #[test]
    fn test_client_event_serialization() {
        let subscribe = ClientEvent::Subscribe {
            channel: "private-chat.7".to_string(),
            auth: Some("key:sig".to_string()),
            channel_data: None,
        };
        let json: Value = serde_json::to_value(&subscribe).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "pusher:subscribe",
                "data": {"channel": "private-chat.7", "auth": "key:sig"}
            })
        );

        let pong = serde_json::to_string(&ClientEvent::Pong {}).unwrap();
        assert_eq!(pong, r#"{"event":"pusher:pong","data":{}}"#);
    }

    #[test]
    fn test_event_name_matching() {
        assert!(event_matches("NewMessageSent", "NewMessageSent"));
        assert!(event_matches("NewMessageSent", ".NewMessageSent"));
        assert!(event_matches("App\\Events\\NewMessageSent", "NewMessageSent"));
        assert!(!event_matches("App\\Events\\TicketClosed", "NewMessageSent"));
        assert!(!event_matches("NewMessageSentLater", "NewMessageSent"));
    }

    #[test]
    fn test_unknown_event_without_channel_is_protocol_error() {
        let err = ServerEvent::parse(r#"{"event":"mystery"}"#).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
