//! Client error types and classification

use fleetchat_shared::ChatError;

/// Error type for API, transport and platform operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Realtime protocol error: {0}")]
    Protocol(String),

    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("Channel authorization failed: {0}")]
    ChannelAuth(String),

    #[error("Connection closed")]
    Closed,
}

impl ClientError {
    /// Classify a failed history load or send
    pub fn into_fetch_error(self) -> ChatError {
        ChatError::Fetch(self.to_string())
    }

    /// Classify a failed realtime setup
    pub fn into_channel_error(self) -> ChatError {
        ChatError::ChannelUnavailable(self.to_string())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
