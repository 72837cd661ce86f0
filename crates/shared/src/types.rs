//! Common types used across FleetChat

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Prefix carried by ids of messages that the server has not confirmed yet
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Message ID wrapper
///
/// The backend sends numeric ids; they are normalized to strings so that
/// temporary local ids and server ids share one key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a temporary id for an optimistic entry
    pub fn local() -> Self {
        Self(format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4()))
    }

    /// Whether this id was generated locally and is still awaiting confirmation
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Number(n) => Self(n.to_string()),
        })
    }
}

/// Conversation ID wrapper (the service order a ticket belongs to)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Realtime channel carrying this conversation's announcements
    pub fn channel_name(&self) -> String {
        format!("private-chat.{}", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Client,
    /// Vehicle conductor, logged in with a plate number
    Vehicle,
    Agent,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Vehicle => "vehicle",
            Self::Agent => "agent",
        }
    }
}

/// Kind of payload a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    Audio,
    Location,
    Video,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Audio => "audio",
            Self::Location => "location",
            Self::Video => "video",
        }
    }
}

impl From<AttachmentKind> for MessageType {
    fn from(kind: AttachmentKind) -> Self {
        match kind {
            AttachmentKind::Image => Self::Image,
            AttachmentKind::Video => Self::Video,
            AttachmentKind::File => Self::File,
            AttachmentKind::Audio => Self::Audio,
        }
    }
}

/// Local delivery state of a message; never sent over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryStatus {
    Sending,
    #[default]
    Sent,
    Failed,
}

/// Kind of media a pending attachment holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    File,
    Audio,
}

impl AttachmentKind {
    /// Display name used when the platform does not provide one
    pub fn default_name(&self) -> &'static str {
        match self {
            Self::Image => "image.jpg",
            Self::Video => "video.mp4",
            Self::File => "file",
            Self::Audio => "audio_message.m4a",
        }
    }

    /// MIME type sent with the upload
    pub fn mime_type(&self, name: &str) -> &'static str {
        let ext = name.rsplit('.').next().unwrap_or_default().to_lowercase();
        match (self, ext.as_str()) {
            (Self::Image, "png") => "image/png",
            (Self::Image, "gif") => "image/gif",
            (Self::Image, "webp") => "image/webp",
            (Self::Image, "heic") => "image/heic",
            (Self::Image, _) => "image/jpeg",
            (Self::Video, "mov") => "video/quicktime",
            (Self::Video, _) => "video/mp4",
            (Self::Audio, "mp3") => "audio/mpeg",
            (Self::Audio, "wav") => "audio/wav",
            (Self::Audio, _) => "audio/m4a",
            (Self::File, "pdf") => "application/pdf",
            (Self::File, "txt") => "text/plain",
            (Self::File, _) => "application/octet-stream",
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A single chat message in a ticket conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_type: SenderType,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_coordinate",
        skip_serializing_if = "Option::is_none"
    )]
    pub latitude: Option<f64>,
    #[serde(
        default,
        deserialize_with = "de_coordinate",
        skip_serializing_if = "Option::is_none"
    )]
    pub longitude: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip)]
    pub status: DeliveryStatus,
}

impl Message {
    /// Build a locally-authored text message awaiting server confirmation
    pub fn optimistic_text(sender_type: SenderType, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::local(),
            sender_type,
            message_type: MessageType::Text,
            content: Some(body.into()),
            file_path: None,
            latitude: None,
            longitude: None,
            created_at: OffsetDateTime::now_utc(),
            status: DeliveryStatus::Sending,
        }
    }

    /// Coordinates of a location message, if both are present
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.message_type, self.latitude, self.longitude) {
            (MessageType::Location, Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }
}

/// Laravel serializes decimal columns as strings; accept both forms
fn de_coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCoordinate {
        Number(f64),
        Text(String),
    }

    match Option::<RawCoordinate>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawCoordinate::Number(n)) => Ok(Some(n)),
        Some(RawCoordinate::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(RawCoordinate::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// A geographic point shared in a location message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A picked or recorded media item waiting to be sent or cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    /// Local resource handle (a filesystem path)
    pub uri: String,
    pub kind: AttachmentKind,
    pub name: String,
}

impl PendingAttachment {
    pub fn new(uri: impl Into<String>, kind: AttachmentKind, name: Option<String>) -> Self {
        Self {
            uri: uri.into(),
            kind,
            name: name.unwrap_or_else(|| kind.default_name().to_string()),
        }
    }
}

/// Playback position of one audio message, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioProgress {
    pub position_ms: u64,
    pub duration_ms: u64,
}

// =============================================================================
// User Session
// =============================================================================

/// The signed-in principal's kind; only clients and conductors use the app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Client,
    Vehicle,
}

impl UserType {
    pub fn sender_type(&self) -> SenderType {
        match self {
            Self::Client => SenderType::Client,
            Self::Vehicle => SenderType::Vehicle,
        }
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client" => Ok(Self::Client),
            "vehicle" | "conductor" => Ok(Self::Vehicle),
            other => Err(format!("unknown user type: {}", other)),
        }
    }
}

/// Read-only view of who is using the session
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_type: UserType,
    pub display_name: Option<String>,
}

impl UserSession {
    pub fn new(user_type: UserType) -> Self {
        Self {
            user_type,
            display_name: None,
        }
    }

    /// Whether a message was authored by this user's side of the conversation
    pub fn is_own(&self, message: &Message) -> bool {
        message.sender_type == self.user_type.sender_type()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_deserialization_from_server_payload() {
        let json = r#"{
            "id": 17,
            "sender_type": "agent",
            "message_type": "location",
            "content": null,
            "file_path": null,
            "latitude": "33.5731",
            "longitude": -7.5898,
            "created_at": "2024-05-01T10:15:00.000000Z"
        }"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.id, MessageId::from("17"));
        assert_eq!(message.sender_type, SenderType::Agent);
        assert_eq!(message.status, DeliveryStatus::Sent);
        assert_eq!(
            message.coordinates(),
            Some(Coordinates {
                latitude: 33.5731,
                longitude: -7.5898
            })
        );
    }

    #[test]
    fn test_message_missing_optional_fields() {
        let json = r#"{"id":"1","sender_type":"client","message_type":"text","content":"hi","created_at":"2024-05-01T10:15:00Z"}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.content.as_deref(), Some("hi"));
        assert!(message.file_path.is_none());
        assert!(message.coordinates().is_none());
    }

    #[test]
    fn test_local_ids() {
        let id = MessageId::local();
        assert!(id.is_local());
        assert!(!MessageId::from("42").is_local());
        assert_ne!(MessageId::local(), MessageId::local());
    }

    #[test]
    fn test_channel_name() {
        let conversation = ConversationId::from("128");
        assert_eq!(conversation.channel_name(), "private-chat.128");
    }

    #[test]
    fn test_pending_attachment_default_names() {
        let audio = PendingAttachment::new("/tmp/rec.m4a", AttachmentKind::Audio, None);
        assert_eq!(audio.name, "audio_message.m4a");
        let doc = PendingAttachment::new(
            "/tmp/invoice.pdf",
            AttachmentKind::File,
            Some("invoice.pdf".to_string()),
        );
        assert_eq!(doc.name, "invoice.pdf");
        assert_eq!(doc.kind.mime_type(&doc.name), "application/pdf");
    }

    #[test]
    fn test_user_type_parsing() {
        assert_eq!("client".parse::<UserType>().unwrap(), UserType::Client);
        assert_eq!("Conductor".parse::<UserType>().unwrap(), UserType::Vehicle);
        assert!("agent".parse::<UserType>().is_err());
    }

    #[test]
    fn test_is_own_message() {
        let session = UserSession::new(UserType::Vehicle);
        let mine = Message::optimistic_text(SenderType::Vehicle, "on my way");
        let theirs = Message::optimistic_text(SenderType::Agent, "noted");
        assert!(session.is_own(&mine));
        assert!(!session.is_own(&theirs));
    }
}
