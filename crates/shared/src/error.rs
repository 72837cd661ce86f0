//! Error taxonomy for the chat session engine
//!
//! Every variant is local and terminal to the operation that raised it: the
//! session decides how to present it (inline retry, alert, or a log line).

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// History load or send failed (network/HTTP); shown inline with a retry
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Media or location permission denied; shown as an alert
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Realtime channel never connected; logged, never shown
    #[error("Realtime channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Audio resource failed to load or play; shown as an alert
    #[error("Playback failed: {0}")]
    Playback(String),

    /// Picker or recorder failure reported by the platform; shown as an alert
    #[error("Platform error: {0}")]
    Platform(String),
}

impl ChatError {
    /// Whether the presentation layer should show this error to the user
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, ChatError::ChannelUnavailable(_))
    }

    /// Whether the failed action can be offered again as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Fetch(_))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
