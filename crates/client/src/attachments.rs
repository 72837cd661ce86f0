//! Attachment pipeline
//!
//! Acquires local media through the platform and keeps at most one staged
//! attachment until it is sent or cancelled. Uploads themselves go through
//! the session so they never block it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use fleetchat_shared::{AttachmentKind, ChatError, ChatResult, PendingAttachment};

/// Interval of the recording duration counter
pub const RECORDING_TICK: Duration = Duration::from_secs(1);

/// Platform media pickers
///
/// `Ok(None)` means the user dismissed the picker.
#[async_trait]
pub trait MediaPicker: Send + Sync {
    async fn pick_image_or_video(&self) -> ChatResult<Option<PendingAttachment>>;

    async fn pick_document(&self) -> ChatResult<Option<PendingAttachment>>;
}

/// Platform microphone
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    /// Ask for microphone access; false when denied
    async fn request_permission(&self) -> bool;

    async fn start(&self) -> ChatResult<()>;

    /// Stop and return the recorded file, if one was produced
    async fn stop(&self) -> ChatResult<Option<String>>;
}

/// Where a pick comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickSource {
    /// Photo/video library
    Library,
    Documents,
}

/// Elapsed seconds of one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingTick {
    pub recording: u64,
    pub seconds: u32,
}

struct Recording {
    id: u64,
    seconds: u32,
    ticker: JoinHandle<()>,
}

/// Staging area for the one attachment a session may hold
pub struct AttachmentPipeline {
    picker: Arc<dyn MediaPicker>,
    recorder: Arc<dyn AudioRecorder>,
    staged: Option<PendingAttachment>,
    recording: Option<Recording>,
    recordings: u64,
    starting: bool,
    uploading: bool,
}

impl AttachmentPipeline {
    pub fn new(picker: Arc<dyn MediaPicker>, recorder: Arc<dyn AudioRecorder>) -> Self {
        Self {
            picker,
            recorder,
            staged: None,
            recording: None,
            recordings: 0,
            starting: false,
            uploading: false,
        }
    }

    pub fn staged(&self) -> Option<&PendingAttachment> {
        self.staged.as_ref()
    }

    /// Seconds counted by the active recording, if any
    pub fn recording_seconds(&self) -> Option<u32> {
        self.recording.as_ref().map(|r| r.seconds)
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    /// Open a platform picker
    ///
    /// The returned future does not borrow the pipeline; feed its output to
    /// [`on_picked`](Self::on_picked).
    pub fn pick(
        &self,
        source: PickSource,
    ) -> impl Future<Output = ChatResult<Option<PendingAttachment>>> + Send + 'static {
        let picker = Arc::clone(&self.picker);
        async move {
            let picked = match source {
                PickSource::Library => picker.pick_image_or_video().await,
                PickSource::Documents => picker.pick_document().await,
            };
            picked.map_err(|e| {
                tracing::error!(source = ?source, error = %e, "Error picking attachment");
                e
            })
        }
    }

    /// Stage a picked attachment; returns true when something was staged
    pub fn on_picked(&mut self, picked: Option<PendingAttachment>) -> bool {
        match picked {
            Some(attachment) => {
                if let Some(previous) = self.staged.replace(attachment) {
                    tracing::debug!(name = %previous.name, "Replaced staged attachment");
                }
                true
            }
            None => false,
        }
    }

    /// Ask for the microphone and start the recorder
    ///
    /// Returns `None` while a recording is running or starting. The future
    /// does not borrow the pipeline; feed its output to
    /// [`on_recording_started`](Self::on_recording_started).
    pub fn begin_recording(&mut self) -> Option<impl Future<Output = ChatResult<()>> + Send + 'static> {
        if self.recording.is_some() || self.starting {
            return None;
        }
        self.starting = true;

        let recorder = Arc::clone(&self.recorder);
        Some(async move {
            if !recorder.request_permission().await {
                tracing::warn!("Microphone permission denied");
                return Err(ChatError::Permission("microphone access denied".into()));
            }
            recorder.start().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to start recording");
                e
            })
        })
    }

    /// Settle a recording start and run its duration counter
    ///
    /// Ticks carry this recording's id so a late tick from an earlier one
    /// is ignored.
    pub fn on_recording_started(
        &mut self,
        started: ChatResult<()>,
        ticks: mpsc::UnboundedSender<RecordingTick>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ChatResult<bool> {
        if !std::mem::replace(&mut self.starting, false) {
            return Ok(false);
        }
        started?;

        self.recordings += 1;
        let recording = self.recordings;
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(RECORDING_TICK);
            interval.tick().await; // completes immediately
            let mut seconds: u32 = 0;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        seconds += 1;
                        if ticks.send(RecordingTick { recording, seconds }).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.recording = Some(Recording {
            id: recording,
            seconds: 0,
            ticker,
        });
        tracing::info!(recording, "Recording started");
        Ok(true)
    }

    /// Record a tick from the timer; ignored unless it belongs to the active recording
    pub fn on_recording_tick(&mut self, tick: RecordingTick) -> bool {
        match self.recording.as_mut() {
            Some(recording) if recording.id == tick.recording => {
                recording.seconds = tick.seconds;
                true
            }
            _ => false,
        }
    }

    /// Stop the active recording and stage it; no-op when not recording
    pub async fn stop_recording(&mut self) -> ChatResult<bool> {
        let Some(recording) = self.recording.take() else {
            return Ok(false);
        };
        recording.ticker.abort();

        let uri = self.recorder.stop().await.map_err(|e| {
            tracing::error!(error = %e, "Error stopping recording");
            e
        })?;

        tracing::info!(seconds = recording.seconds, "Recording stopped");
        Ok(self.on_picked(uri.map(|uri| PendingAttachment::new(uri, AttachmentKind::Audio, None))))
    }

    /// Hand out the staged attachment for upload
    ///
    /// It stays staged until `finish_upload` reports success.
    pub fn begin_upload(&mut self) -> Option<PendingAttachment> {
        if self.uploading {
            return None;
        }
        let pending = self.staged.clone()?;
        self.uploading = true;
        Some(pending)
    }

    /// Settle an upload; on success the attachment is unstaged
    pub fn finish_upload(&mut self, sent: &PendingAttachment, succeeded: bool) {
        self.uploading = false;
        if succeeded && self.staged.as_ref() == Some(sent) {
            self.staged = None;
        }
    }

    /// Discard the staged attachment without sending
    pub fn cancel(&mut self) -> bool {
        self.staged.take().is_some()
    }

    /// Stop the timer and any running recording
    pub async fn close(&mut self) {
        self.starting = false;
        if let Some(recording) = self.recording.take() {
            recording.ticker.abort();
            if let Err(e) = self.recorder.stop().await {
                tracing::warn!(error = %e, "Failed to stop recording on close");
            }
        }
        self.staged = None;
    }
}

/// Recorder for platforms without a microphone
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecorder;

#[async_trait]
impl AudioRecorder for NoRecorder {
    async fn request_permission(&self) -> bool {
        false
    }

    async fn start(&self) -> ChatResult<()> {
        Err(ChatError::Platform("audio recording is not available".into()))
    }

    async fn stop(&self) -> ChatResult<Option<String>> {
        Ok(None)
    }
}
