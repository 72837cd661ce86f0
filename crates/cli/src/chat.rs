//! Interactive conversation view

use std::sync::Arc;

use anyhow::Context;
use time::{OffsetDateTime, UtcOffset};
use tokio::io::{AsyncBufReadExt, BufReader};

use fleetchat_client::present::{
    file_action, format_clock, format_duration, format_time, group_by_day, maps_url, sender_label,
    static_map_url, FileAction,
};
use fleetchat_client::session::SessionSnapshot;
use fleetchat_client::{ApiClient, SessionEvent, SessionHandle};
use fleetchat_shared::{ChatError, Coordinates, DeliveryStatus, Message, MessageId, MessageType, UserSession};

use crate::platform::PathPicker;

pub const HELP: &str = "\
Type a message and press enter to send it. Commands:
  /image <path>          stage a photo or video
  /file <path>           stage a document
  /record, /stop         record a voice message
  /send, /cancel         send or discard the staged attachment
  /location <lat> <lon>  share a location
  /play <id>, /pause     play or pause an audio message
  /seek <id> <seconds>   move an audio message's position
  /download <id>         save a file message to the download directory
  /retry <id>            send a failed message again
  /reload                refetch the conversation
  /show                  print the conversation
  /quit                  leave the conversation";

/// One line of user input
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Text(String),
    Image(String),
    File(String),
    Record,
    StopRecording,
    Send,
    Cancel,
    Location(Coordinates),
    Play(MessageId),
    Pause,
    Seek(MessageId, u64),
    Download(MessageId),
    Retry(MessageId),
    Reload,
    Show,
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_input(line: &str) -> Input {
    let Some(command) = line.trim().strip_prefix('/') else {
        return Input::Text(line.to_string());
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        ("image", [path]) => Input::Image(path.to_string()),
        ("file", [path]) => Input::File(path.to_string()),
        ("record", []) => Input::Record,
        ("stop", []) => Input::StopRecording,
        ("send", []) => Input::Send,
        ("cancel", []) => Input::Cancel,
        ("location", [lat, lon]) => match (lat.parse(), lon.parse()) {
            (Ok(latitude), Ok(longitude)) => Input::Location(Coordinates {
                latitude,
                longitude,
            }),
            _ => Input::Invalid("coordinates must be numbers".into()),
        },
        ("play", [id]) => Input::Play(MessageId::from(*id)),
        ("pause", []) => Input::Pause,
        ("seek", [id, seconds]) => match seconds.parse::<u64>() {
            Ok(seconds) => Input::Seek(MessageId::from(*id), seconds * 1000),
            Err(_) => Input::Invalid("seconds must be a whole number".into()),
        },
        ("download", [id]) => Input::Download(MessageId::from(*id)),
        ("retry", [id]) => Input::Retry(MessageId::from(*id)),
        ("reload", []) => Input::Reload,
        ("show", []) => Input::Show,
        ("help", []) => Input::Help,
        ("quit", []) | ("exit", []) => Input::Quit,
        _ => Input::Invalid(format!("unknown command /{}", command)),
    }
}

/// Everything the chat loop needs
pub struct ChatView {
    pub handle: SessionHandle,
    pub api: ApiClient,
    pub picker: Arc<PathPicker>,
    pub user: UserSession,
    pub mapbox_token: Option<String>,
}

impl ChatView {
    /// Drive the session from stdin until `/quit` or end of input
    pub async fn run(
        &self,
        mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    ) -> anyhow::Result<()> {
        println!("{}", HELP);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read input")? else {
                        break;
                    };
                    if !self.handle_input(parse_input(&line)).await? {
                        break;
                    }
                }
                Some(event) = events.recv() => self.on_event(event).await?,
            }
        }

        let last = self.handle.close().await?;
        tracing::debug!(messages = last.messages.len(), "Conversation left");
        Ok(())
    }

    /// Returns false when the user asked to leave
    async fn handle_input(&self, input: Input) -> anyhow::Result<bool> {
        match input {
            Input::Text(body) => self.handle.send_text(body)?,
            Input::Image(path) => {
                self.picker.queue(path);
                self.handle.pick_image_or_video()?;
            }
            Input::File(path) => {
                self.picker.queue(path);
                self.handle.pick_document()?;
            }
            Input::Record => self.handle.start_recording()?,
            Input::StopRecording => self.handle.stop_recording()?,
            Input::Send => self.handle.send_attachment()?,
            Input::Cancel => self.handle.cancel_attachment()?,
            Input::Location(at) => self.handle.send_location(at)?,
            Input::Play(id) => match self.find(&id).await? {
                Some(Message {
                    message_type: MessageType::Audio,
                    file_path: Some(path),
                    ..
                }) => self.handle.play(self.api.storage_url(&path), id)?,
                _ => println!("! {} is not an audio message", id),
            },
            Input::Pause => self.handle.pause()?,
            Input::Seek(id, position_ms) => self.handle.seek(id, position_ms)?,
            Input::Download(id) => match self.find(&id).await? {
                Some(Message {
                    file_path: Some(path),
                    content,
                    ..
                }) => {
                    let name = content.unwrap_or_else(|| "file".to_string());
                    self.handle.download(path, name)?;
                }
                _ => println!("! {} has no attachment", id),
            },
            Input::Retry(id) => self.handle.retry(id)?,
            Input::Reload => self.handle.reload()?,
            Input::Show => self.render(&self.handle.snapshot().await?),
            Input::Help => println!("{}", HELP),
            Input::Quit => return Ok(false),
            Input::Invalid(reason) => println!("! {}", reason),
        }
        Ok(true)
    }

    async fn find(&self, id: &MessageId) -> anyhow::Result<Option<Message>> {
        let snapshot = self.handle.snapshot().await?;
        Ok(snapshot.messages.into_iter().find(|m| m.id == *id))
    }

    async fn on_event(&self, event: SessionEvent) -> anyhow::Result<()> {
        match event {
            SessionEvent::StateChanged { phase, realtime } => {
                tracing::debug!(phase = ?phase, realtime = ?realtime, "Session state changed");
            }
            SessionEvent::StoreChanged { .. } => self.render(&self.handle.snapshot().await?),
            SessionEvent::FetchFailed(e) => {
                print_failure(&e, "Type /reload to try again.")
            }
            SessionEvent::SendFailed(e) => {
                print_failure(&e, "Use /retry <id> or /send again.")
            }
            SessionEvent::Alert(e) => print_failure(&e, "Try again."),
            SessionEvent::PlaybackChanged(state) => println!("~ audio {}", state),
            SessionEvent::ProgressChanged {
                message_id,
                progress,
            } => println!(
                "~ {} {} / {}",
                message_id,
                format_time(progress.position_ms),
                format_time(progress.duration_ms)
            ),
            SessionEvent::StagingChanged(Some(staged)) => {
                println!(
                    "+ staged {} {}; /send or /cancel",
                    MessageType::from(staged.kind).as_str(),
                    staged.name
                )
            }
            SessionEvent::StagingChanged(None) => println!("+ nothing staged"),
            SessionEvent::RecordingTick(seconds) => println!("* recording {}", format_duration(seconds)),
            SessionEvent::Downloaded(path) => println!("File downloaded to {}", path.display()),
        }
        Ok(())
    }

    fn render(&self, snapshot: &SessionSnapshot) {
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        let now = OffsetDateTime::now_utc().to_offset(offset);

        for section in group_by_day(&snapshot.messages, now) {
            println!("--- {} ---", section.label);
            for message in section.messages {
                println!(
                    "[{}] {:>12} {} {}",
                    format_clock(message.created_at, offset),
                    sender_label(message, &self.user).unwrap_or("You"),
                    self.describe(message),
                    status_marker(message),
                );
            }
        }
    }

    fn describe(&self, message: &Message) -> String {
        let id = &message.id;
        match message.message_type {
            MessageType::Text => message.content.clone().unwrap_or_default(),
            MessageType::Image | MessageType::Video => match &message.file_path {
                Some(path) => format!("<{} {}> #{}", message.message_type.as_str(), self.api.storage_url(path), id),
                None => format!("<{}> #{}", message.message_type.as_str(), id),
            },
            MessageType::Audio => format!("<voice message> /play {}", id),
            MessageType::File => {
                let name = message.content.as_deref().unwrap_or("File attached");
                match message.file_path.as_deref().map(file_action) {
                    Some(FileAction::Preview) => format!("<{}> tap to preview: /download {}", name, id),
                    _ => format!("<{}> tap to download: /download {}", name, id),
                }
            }
            MessageType::Location => match message.coordinates() {
                Some(at) => match &self.mapbox_token {
                    Some(token) => format!("<location {}> preview {}", maps_url(at), static_map_url(at, token)),
                    None => format!("<location {}>", maps_url(at)),
                },
                None => "<location>".to_string(),
            },
        }
    }
}

/// Line shown for a failure, or `None` when it is only logged
fn failure_line(error: &ChatError, retry_hint: &str) -> Option<String> {
    if !error.is_user_visible() {
        return None;
    }
    Some(if error.is_retryable() {
        format!("! {}. {}", error, retry_hint)
    } else {
        format!("! {}", error)
    })
}

fn print_failure(error: &ChatError, retry_hint: &str) {
    match failure_line(error, retry_hint) {
        Some(line) => println!("{}", line),
        None => tracing::debug!(error = %error, "Failure not shown"),
    }
}

fn status_marker(message: &Message) -> &'static str {
    match message.status {
        DeliveryStatus::Sending => "(sending)",
        DeliveryStatus::Sent => "",
        DeliveryStatus::Failed => "(failed)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(parse_input("hello /there"), Input::Text("hello /there".into()));
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse_input("/image ./photo.jpg"), Input::Image("./photo.jpg".into()));
        assert_eq!(parse_input("/send"), Input::Send);
        assert_eq!(
            parse_input("/location 33.5 -7.6"),
            Input::Location(Coordinates {
                latitude: 33.5,
                longitude: -7.6
            })
        );
        assert_eq!(
            parse_input("/seek 42 3"),
            Input::Seek(MessageId::from("42"), 3_000)
        );
        assert_eq!(parse_input("  /quit "), Input::Quit);
    }

    #[test]
    fn test_bad_commands() {
        assert!(matches!(parse_input("/location north south"), Input::Invalid(_)));
        assert!(matches!(parse_input("/seek 42 soon"), Input::Invalid(_)));
        assert!(matches!(parse_input("/teleport"), Input::Invalid(_)));
        assert!(matches!(parse_input("/play"), Input::Invalid(_)));
    }

    #[test]
    fn test_failure_lines() {
        assert_eq!(
            failure_line(&ChatError::Fetch("timeout".into()), "Type /reload to try again.").as_deref(),
            Some("! Fetch failed: timeout. Type /reload to try again.")
        );
        assert_eq!(
            failure_line(&ChatError::Permission("microphone access denied".into()), "Try again.").as_deref(),
            Some("! Permission denied: microphone access denied")
        );
        assert_eq!(
            failure_line(&ChatError::ChannelUnavailable("no token".into()), "Try again."),
            None
        );
    }
}
