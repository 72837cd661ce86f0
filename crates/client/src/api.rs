//! HTTP client for the ticket chat API
//!
//! Wraps a single `reqwest::Client` that attaches the stored bearer token to
//! every request, the way the mobile app's request interceptor did.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use fleetchat_shared::{Coordinates, ConversationId, Message, MessageType, PendingAttachment};

use crate::auth::TokenStore;
use crate::config::Config;
use crate::error::{ClientError, ClientResult};

/// A message to create on the server
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub message_type: MessageType,
    pub content: Option<String>,
    pub attachment: Option<PendingAttachment>,
    pub location: Option<Coordinates>,
}

impl OutgoingMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Text,
            content: Some(body.into()),
            attachment: None,
            location: None,
        }
    }

    pub fn attachment(pending: PendingAttachment) -> Self {
        Self {
            message_type: pending.kind.into(),
            content: None,
            attachment: Some(pending),
            location: None,
        }
    }

    pub fn location(coordinates: Coordinates) -> Self {
        Self {
            message_type: MessageType::Location,
            content: None,
            attachment: None,
            location: Some(coordinates),
        }
    }
}

/// Auth payload returned by `/broadcasting/auth`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAuth {
    pub auth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChannelAuthRequest<'a> {
    socket_id: &'a str,
    channel_name: &'a str,
}

/// Conversation history and send endpoints
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_messages(&self, conversation: &ConversationId) -> ClientResult<Vec<Message>>;

    async fn send_message(
        &self,
        conversation: &ConversationId,
        outgoing: OutgoingMessage,
    ) -> ClientResult<Message>;

    /// Download an attachment into `dest_dir`, returning the written path
    async fn download(
        &self,
        file_path: &str,
        file_name: &str,
        dest_dir: &Path,
    ) -> ClientResult<PathBuf>;
}

/// Private channel authorization, required before a private subscription succeeds
#[async_trait]
pub trait ChannelAuthorizer: Send + Sync {
    async fn authorize(&self, socket_id: &str, channel_name: &str) -> ClientResult<ChannelAuth>;
}

/// HTTP client for the fleet-service backend
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    storage_url: String,
    tokens: Arc<dyn TokenStore>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: &Config, tokens: Arc<dyn TokenStore>) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout())
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            storage_url: config.storage_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Public URL of a stored attachment
    pub fn storage_url(&self, file_path: &str) -> String {
        format!("{}/{}", self.storage_url, file_path.trim_start_matches('/'))
    }

    /// Start a request with the bearer token attached when one is stored
    async fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("Accept", "application/json");
        match self.tokens.load_token().await {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Turn a non-2xx response into `ClientError::Status`
async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);

    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn fetch_messages(&self, conversation: &ConversationId) -> ClientResult<Vec<Message>> {
        let url = self.endpoint(&format!("service-orders/{}/chat", conversation));
        let response = check_status(self.request(Method::GET, url).await.send().await?).await?;
        let messages: Vec<Message> = response.json().await?;

        tracing::debug!(
            conversation_id = %conversation,
            count = messages.len(),
            "Fetched conversation history"
        );
        Ok(messages)
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        outgoing: OutgoingMessage,
    ) -> ClientResult<Message> {
        let mut form = multipart::Form::new().text("message_type", outgoing.message_type.as_str());

        if let Some(content) = outgoing.content {
            form = form.text("content", content);
        }

        if let Some(pending) = outgoing.attachment {
            let bytes = tokio::fs::read(&pending.uri).await?;
            let mime = pending.kind.mime_type(&pending.name);
            let part = multipart::Part::bytes(bytes)
                .file_name(pending.name.clone())
                .mime_str(mime)?;
            form = form.part("file", part);
        }

        if let Some(location) = outgoing.location {
            form = form
                .text("latitude", location.latitude.to_string())
                .text("longitude", location.longitude.to_string());
        }

        let url = self.endpoint(&format!("service-orders/{}/chat", conversation));
        let response =
            check_status(self.request(Method::POST, url).await.multipart(form).send().await?)
                .await?;
        let message: Message = response.json().await?;

        tracing::info!(
            conversation_id = %conversation,
            message_id = %message.id,
            message_type = message.message_type.as_str(),
            "Message sent"
        );
        Ok(message)
    }

    async fn download(
        &self,
        file_path: &str,
        file_name: &str,
        dest_dir: &Path,
    ) -> ClientResult<PathBuf> {
        let url = self.storage_url(file_path);
        let response = check_status(self.request(Method::GET, url.clone()).await.send().await?).await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let safe_name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "file".into());
        let dest = dest_dir.join(safe_name);

        let total = response.content_length();
        let mut written: u64 = 0;
        let mut file = tokio::fs::File::create(&dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(total) = total.filter(|t| *t > 0) {
                tracing::debug!(
                    url = %url,
                    progress_pct = written * 100 / total,
                    "Download progress"
                );
            }
        }
        file.flush().await?;

        tracing::info!(url = %url, path = %dest.display(), bytes = written, "File downloaded");
        Ok(dest)
    }
}

#[async_trait]
impl ChannelAuthorizer for ApiClient {
    async fn authorize(&self, socket_id: &str, channel_name: &str) -> ClientResult<ChannelAuth> {
        let url = self.endpoint("broadcasting/auth");
        let response = self
            .request(Method::POST, url)
            .await
            .json(&ChannelAuthRequest {
                socket_id,
                channel_name,
            })
            .send()
            .await?;

        let response = check_status(response)
            .await
            .map_err(|e| ClientError::ChannelAuth(e.to_string()))?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use fleetchat_shared::{AttachmentKind, SenderType, UserType};
    use mockito::Matcher;

    fn test_config(base: &str) -> Config {
        Config {
            api_base_url: base.to_string(),
            storage_url: format!("{}/storage", base),
            http_timeout_ms: 5_000,
            pusher_app_key: "key".into(),
            pusher_host: "localhost".into(),
            pusher_port: 8080,
            pusher_force_tls: false,
            auth_token_path: PathBuf::from("token"),
            download_dir: PathBuf::from("downloads"),
            user_type: UserType::Client,
            mapbox_token: None,
        }
    }

    fn client(base: &str, token: Option<&str>) -> ApiClient {
        let tokens: Arc<dyn TokenStore> = match token {
            Some(t) => Arc::new(MemoryTokenStore::with_token(t)),
            None => Arc::new(MemoryTokenStore::new()),
        };
        ApiClient::new(&test_config(base), tokens).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_messages_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/service-orders/42/chat")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"id":1,"sender_type":"agent","message_type":"text","content":"hi","created_at":"2024-05-01T10:00:00.000000Z"}]"#,
            )
            .create_async()
            .await;

        let api = client(&server.url(), Some("secret"));
        let messages = api.fetch_messages(&ConversationId::from("42")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_type, SenderType::Agent);
        assert_eq!(messages[0].content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_fetch_messages_maps_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/service-orders/42/chat")
            .with_status(500)
            .with_body(r#"{"message":"Server Error"}"#)
            .create_async()
            .await;

        let api = client(&server.url(), None);
        let err = api
            .fetch_messages(&ConversationId::from("42"))
            .await
            .unwrap_err();

        match err {
            ClientError::Status { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Server Error");
            }
            other => panic!("Expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_text_is_multipart() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/service-orders/7/chat")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data".to_string()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="message_type"\r\n\r\ntext"#.to_string()),
                Matcher::Regex(r#"name="content"\r\n\r\nbrakes squeal"#.to_string()),
            ]))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"99","sender_type":"client","message_type":"text","content":"brakes squeal","created_at":"2024-05-01T10:00:00Z"}"#,
            )
            .create_async()
            .await;

        let api = client(&server.url(), Some("t"));
        let message = api
            .send_message(&ConversationId::from("7"), OutgoingMessage::text("brakes squeal"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(message.id.as_str(), "99");
    }

    #[tokio::test]
    async fn test_send_attachment_uploads_file_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");
        tokio::fs::write(&path, b"%PDF-1.4").await.unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/service-orders/7/chat")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="message_type"\r\n\r\nfile"#.to_string()),
                Matcher::Regex(r#"name="file"; filename="invoice.pdf""#.to_string()),
                Matcher::Regex("%PDF-1.4".to_string()),
            ]))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"100","sender_type":"client","message_type":"file","content":"invoice.pdf","file_path":"chat/invoice.pdf","created_at":"2024-05-01T10:00:00Z"}"#,
            )
            .create_async()
            .await;

        let pending = PendingAttachment::new(
            path.to_string_lossy(),
            AttachmentKind::File,
            Some("invoice.pdf".to_string()),
        );
        let api = client(&server.url(), Some("t"));
        let message = api
            .send_message(&ConversationId::from("7"), OutgoingMessage::attachment(pending))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(message.file_path.as_deref(), Some("chat/invoice.pdf"));
    }

    #[tokio::test]
    async fn test_authorize_channel() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/broadcasting/auth")
            .match_body(Matcher::Json(serde_json::json!({
                "socket_id": "123.456",
                "channel_name": "private-chat.7"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"auth":"key:signature"}"#)
            .create_async()
            .await;

        let api = client(&server.url(), Some("t"));
        let auth = api.authorize("123.456", "private-chat.7").await.unwrap();

        mock.assert_async().await;
        assert_eq!(auth.auth, "key:signature");
        assert!(auth.channel_data.is_none());
    }

    #[tokio::test]
    async fn test_authorize_rejection_is_channel_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/broadcasting/auth")
            .with_status(403)
            .create_async()
            .await;

        let api = client(&server.url(), None);
        let err = api.authorize("1.2", "private-chat.7").await.unwrap_err();
        assert!(matches!(err, ClientError::ChannelAuth(_)));
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/storage/chat/report.txt")
            .with_status(200)
            .with_body("mileage: 120000")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let api = client(&server.url(), None);
        let path = api
            .download("chat/report.txt", "../report.txt", dir.path())
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("report.txt"));
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "mileage: 120000");
    }
}
