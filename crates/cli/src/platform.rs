//! Terminal stand-ins for the phone's media services

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use fleetchat_client::attachments::MediaPicker;
use fleetchat_client::playback::{AudioBackend, LoadedSound, StatusSink};
use fleetchat_shared::{AttachmentKind, ChatError, ChatResult, PendingAttachment};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "webm"];

/// Picker fed by file paths typed at the prompt
///
/// The chat loop queues a path, then asks the session to pick; an empty
/// queue behaves like a dismissed picker.
#[derive(Debug, Default)]
pub struct PathPicker {
    queued: Mutex<Option<PathBuf>>,
}

impl PathPicker {
    pub fn queue(&self, path: impl Into<PathBuf>) {
        if let Ok(mut queued) = self.queued.lock() {
            *queued = Some(path.into());
        }
    }

    fn take(&self) -> ChatResult<Option<PathBuf>> {
        let path = self
            .queued
            .lock()
            .map_err(|_| ChatError::Platform("picker state poisoned".into()))?
            .take();

        match path {
            Some(path) if !path.is_file() => Err(ChatError::Platform(format!(
                "{} is not a readable file",
                path.display()
            ))),
            other => Ok(other),
        }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl MediaPicker for PathPicker {
    async fn pick_image_or_video(&self) -> ChatResult<Option<PendingAttachment>> {
        Ok(self.take()?.map(|path| {
            let kind = if is_video(&path) {
                AttachmentKind::Video
            } else {
                AttachmentKind::Image
            };
            // The library hands out generic names, not the original ones
            PendingAttachment::new(path.to_string_lossy(), kind, None)
        }))
    }

    async fn pick_document(&self) -> ChatResult<Option<PendingAttachment>> {
        Ok(self.take()?.map(|path| {
            let name = file_name(&path);
            PendingAttachment::new(path.to_string_lossy(), AttachmentKind::File, name)
        }))
    }
}

/// Audio output for terminals; every load fails
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudioOutput;

#[async_trait]
impl AudioBackend for NoAudioOutput {
    async fn load(&self, uri: &str, _sink: StatusSink) -> ChatResult<Box<dyn LoadedSound>> {
        Err(ChatError::Playback(format!(
            "no audio output available to play {}",
            uri
        )))
    }
}
