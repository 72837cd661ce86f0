//! Conversation session
//!
//! One actor task per mounted conversation. It owns the message store,
//! playback slot, attachment pipeline and channel subscription; the UI talks
//! to it through a [`SessionHandle`] and observes [`SessionEvent`]s.
//!
//! Anything that can wait on the network, the user or the platform (HTTP
//! calls, channel setup, pickers, microphone permission, audio loads) runs in
//! spawned tasks that post results back to the actor and stop when the
//! session's cancellation signal fires on close.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use fleetchat_shared::{
    AudioProgress, ChatError, ChatResult, ConversationId, Coordinates, Message, MessageId, PendingAttachment,
    UserSession,
};

use crate::api::{ChatApi, OutgoingMessage};
use crate::attachments::{AttachmentPipeline, AudioRecorder, MediaPicker, PickSource, RecordingTick};
use crate::auth::TokenStore;
use crate::badges::NotificationBadgeStore;
use crate::error::{ClientError, ClientResult};
use crate::playback::{
    AudioBackend, LoadedTrack, PlayStart, PlaybackController, PlaybackState, PlaybackStatus, TrackLoad,
};
use crate::realtime::{self, ChannelClient, ChannelEvent, RealtimeTransport, SubscriptionId, NEW_MESSAGE_EVENT};
use crate::store::MessageStore;

// =============================================================================
// Public Types
// =============================================================================

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// History has not settled yet
    Initializing,
    Ready,
    Closed,
}

/// Whether live updates are flowing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeStatus {
    Connecting,
    Subscribed,
    /// The channel never connected; history still works
    Unsubscribed,
}

/// Collaborators a session is built from
#[derive(Clone)]
pub struct SessionDeps {
    pub api: Arc<dyn ChatApi>,
    pub transport: Arc<dyn RealtimeTransport>,
    pub tokens: Arc<dyn TokenStore>,
    pub badges: Arc<dyn NotificationBadgeStore>,
    pub user: UserSession,
    pub picker: Arc<dyn MediaPicker>,
    pub recorder: Arc<dyn AudioRecorder>,
    pub audio: Arc<dyn AudioBackend>,
    pub download_dir: PathBuf,
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        phase: SessionPhase,
        realtime: RealtimeStatus,
    },
    /// The message list changed; views scroll to the end
    StoreChanged { len: usize },
    /// History could not be loaded; offer a retry
    FetchFailed(ChatError),
    /// A send failed; the failed entry or staged attachment is kept for retry
    SendFailed(ChatError),
    /// Something the user must acknowledge (permission, platform, playback)
    Alert(ChatError),
    PlaybackChanged(PlaybackState),
    ProgressChanged {
        message_id: MessageId,
        progress: AudioProgress,
    },
    StagingChanged(Option<PendingAttachment>),
    /// Elapsed seconds of the active recording
    RecordingTick(u32),
    Downloaded(PathBuf),
}

/// Point-in-time copy of the session's state
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub conversation: ConversationId,
    pub phase: SessionPhase,
    pub realtime: RealtimeStatus,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub fetch_error: Option<ChatError>,
    pub staged: Option<PendingAttachment>,
    pub uploading: bool,
    pub recording_seconds: Option<u32>,
    pub playback: PlaybackState,
    pub progress: HashMap<MessageId, AudioProgress>,
}

enum Command {
    SendText(String),
    Retry(MessageId),
    PickImageOrVideo,
    PickDocument,
    StartRecording,
    StopRecording,
    SendAttachment,
    CancelAttachment,
    SendLocation(Coordinates),
    Download { file_path: String, file_name: String },
    Play { uri: String, message_id: MessageId },
    Pause,
    Seek { message_id: MessageId, position_ms: u64 },
    Reload,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Close(oneshot::Sender<SessionSnapshot>),
}

/// Results posted back by background tasks
enum Internal {
    HistoryLoaded {
        generation: u64,
        result: Result<Vec<Message>, ChatError>,
    },
    ChannelReady(Option<(Arc<dyn ChannelClient>, SubscriptionId)>),
    SendCompleted {
        temp_id: Option<MessageId>,
        attachment: Option<PendingAttachment>,
        result: Result<Message, ChatError>,
    },
    DownloadCompleted(Result<PathBuf, ChatError>),
    Picked(ChatResult<Option<PendingAttachment>>),
    RecordingStarted(ChatResult<()>),
    AudioLoaded(LoadedTrack),
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> ClientResult<()> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    /// Send a text message; blank input is ignored
    pub fn send_text(&self, body: impl Into<String>) -> ClientResult<()> {
        self.send(Command::SendText(body.into()))
    }

    /// Send a failed text message again
    pub fn retry(&self, message_id: MessageId) -> ClientResult<()> {
        self.send(Command::Retry(message_id))
    }

    pub fn pick_image_or_video(&self) -> ClientResult<()> {
        self.send(Command::PickImageOrVideo)
    }

    pub fn pick_document(&self) -> ClientResult<()> {
        self.send(Command::PickDocument)
    }

    pub fn start_recording(&self) -> ClientResult<()> {
        self.send(Command::StartRecording)
    }

    pub fn stop_recording(&self) -> ClientResult<()> {
        self.send(Command::StopRecording)
    }

    /// Upload the staged attachment
    pub fn send_attachment(&self) -> ClientResult<()> {
        self.send(Command::SendAttachment)
    }

    pub fn cancel_attachment(&self) -> ClientResult<()> {
        self.send(Command::CancelAttachment)
    }

    pub fn send_location(&self, at: Coordinates) -> ClientResult<()> {
        self.send(Command::SendLocation(at))
    }

    pub fn download(&self, file_path: impl Into<String>, file_name: impl Into<String>) -> ClientResult<()> {
        self.send(Command::Download {
            file_path: file_path.into(),
            file_name: file_name.into(),
        })
    }

    pub fn play(&self, uri: impl Into<String>, message_id: MessageId) -> ClientResult<()> {
        self.send(Command::Play {
            uri: uri.into(),
            message_id,
        })
    }

    pub fn pause(&self) -> ClientResult<()> {
        self.send(Command::Pause)
    }

    pub fn seek(&self, message_id: MessageId, position_ms: u64) -> ClientResult<()> {
        self.send(Command::Seek {
            message_id,
            position_ms,
        })
    }

    /// Refetch history (the retry affordance after a failed load)
    pub fn reload(&self) -> ClientResult<()> {
        self.send(Command::Reload)
    }

    pub async fn snapshot(&self) -> ClientResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Unmount the session and return its final state
    pub async fn close(&self) -> ClientResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Close(tx))?;
        rx.await.map_err(|_| ClientError::Closed)
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Mount a session for `conversation`
///
/// Starts the history load and channel setup immediately; they race.
pub fn mount(
    conversation: ConversationId,
    deps: SessionDeps,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let actor = SessionActor::new(conversation, deps, event_tx);
    tokio::spawn(actor.run(command_rx));

    (
        SessionHandle {
            commands: command_tx,
        },
        event_rx,
    )
}

struct SessionActor {
    conversation: ConversationId,
    channel_name: String,
    deps: SessionDeps,

    phase: SessionPhase,
    realtime: RealtimeStatus,
    store: MessageStore,
    playback: PlaybackController,
    attachments: AttachmentPipeline,
    channel: Option<(Arc<dyn ChannelClient>, SubscriptionId)>,

    loading: bool,
    fetch_error: Option<ChatError>,
    next_generation: u64,
    applied_generation: u64,

    events: mpsc::UnboundedSender<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    channel_tx: mpsc::UnboundedSender<ChannelEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    status_rx: mpsc::UnboundedReceiver<(MessageId, PlaybackStatus)>,
    tick_tx: mpsc::UnboundedSender<RecordingTick>,
    tick_rx: mpsc::UnboundedReceiver<RecordingTick>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl SessionActor {
    fn new(
        conversation: ConversationId,
        deps: SessionDeps,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        Self {
            channel_name: conversation.channel_name(),
            playback: PlaybackController::new(Arc::clone(&deps.audio), status_tx),
            attachments: AttachmentPipeline::new(Arc::clone(&deps.picker), Arc::clone(&deps.recorder)),
            conversation,
            deps,
            phase: SessionPhase::Initializing,
            realtime: RealtimeStatus::Connecting,
            store: MessageStore::new(),
            channel: None,
            loading: false,
            fetch_error: None,
            next_generation: 0,
            applied_generation: 0,
            events,
            internal_tx,
            internal_rx,
            channel_tx,
            channel_rx,
            status_rx,
            tick_tx,
            tick_rx,
            cancel_tx,
            cancel_rx,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!(conversation_id = %self.conversation, "Mounting chat session");
        self.emit_state();

        self.spawn_fetch();
        self.deps.badges.clear_new_messages(&self.conversation).await;
        self.spawn_channel_setup();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close(reply)) => {
                        self.close().await;
                        let _ = reply.send(self.snapshot());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.close().await;
                        break;
                    }
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal).await,
                Some(event) = self.channel_rx.recv() => self.on_channel_event(event),
                Some((message_id, status)) = self.status_rx.recv() => {
                    self.on_playback_status(message_id, status).await;
                }
                Some(tick) = self.tick_rx.recv() => {
                    if self.attachments.on_recording_tick(tick) {
                        self.emit(SessionEvent::RecordingTick(tick.seconds));
                    }
                }
            }
        }

        tracing::info!(conversation_id = %self.conversation, "Chat session closed");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendText(body) => self.send_text(body),
            Command::Retry(temp_id) => self.retry(temp_id),
            Command::PickImageOrVideo => self.spawn_pick(PickSource::Library),
            Command::PickDocument => self.spawn_pick(PickSource::Documents),
            Command::StartRecording => self.spawn_recording_start(),
            Command::StopRecording => {
                let result = self.attachments.stop_recording().await;
                self.after_staging(result);
            }
            Command::SendAttachment => self.send_attachment(),
            Command::CancelAttachment => {
                if self.attachments.cancel() {
                    self.emit(SessionEvent::StagingChanged(None));
                }
            }
            Command::SendLocation(at) => {
                self.spawn_send(None, None, OutgoingMessage::location(at));
            }
            Command::Download {
                file_path,
                file_name,
            } => self.spawn_download(file_path, file_name),
            Command::Play { uri, message_id } => match self.playback.play(&uri, &message_id).await {
                Ok(PlayStart::Load(load)) => {
                    self.emit(SessionEvent::PlaybackChanged(self.playback.state().clone()));
                    self.spawn_audio_load(load);
                }
                Ok(PlayStart::Resumed) => {
                    self.emit(SessionEvent::PlaybackChanged(self.playback.state().clone()))
                }
                Ok(PlayStart::Unchanged) => {}
                Err(e) => {
                    self.emit(SessionEvent::Alert(e));
                    self.emit(SessionEvent::PlaybackChanged(self.playback.state().clone()));
                }
            },
            Command::Pause => match self.playback.pause().await {
                Ok(true) => self.emit(SessionEvent::PlaybackChanged(self.playback.state().clone())),
                Ok(false) => {}
                Err(e) => self.emit(SessionEvent::Alert(e)),
            },
            Command::Seek {
                message_id,
                position_ms,
            } => match self.playback.seek(&message_id, position_ms).await {
                Ok(()) => {
                    if let Some(progress) = self.playback.progress(&message_id) {
                        self.emit(SessionEvent::ProgressChanged {
                            message_id,
                            progress,
                        });
                    }
                }
                Err(e) => self.emit(SessionEvent::Alert(e)),
            },
            Command::Reload => self.spawn_fetch(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Close(_) => {}
        }
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::HistoryLoaded { generation, result } => {
                self.on_history_loaded(generation, result)
            }
            Internal::ChannelReady(channel) => {
                self.realtime = match channel {
                    Some(channel) => {
                        self.channel = Some(channel);
                        RealtimeStatus::Subscribed
                    }
                    None => RealtimeStatus::Unsubscribed,
                };
                self.emit_state();
            }
            Internal::SendCompleted {
                temp_id,
                attachment,
                result,
            } => self.on_send_completed(temp_id, attachment, result),
            Internal::DownloadCompleted(result) => match result {
                Ok(path) => self.emit(SessionEvent::Downloaded(path)),
                Err(e) => self.emit(SessionEvent::Alert(e)),
            },
            Internal::Picked(picked) => {
                let staged = picked.map(|p| self.attachments.on_picked(p));
                self.after_staging(staged);
            }
            Internal::RecordingStarted(started) => {
                match self
                    .attachments
                    .on_recording_started(started, self.tick_tx.clone(), self.cancel_rx.clone())
                {
                    Ok(true) => self.emit(SessionEvent::RecordingTick(0)),
                    Ok(false) => {}
                    Err(e) => self.emit(SessionEvent::Alert(e)),
                }
            }
            Internal::AudioLoaded(track) => match self.playback.finish_load(track).await {
                Ok(true) => self.emit(SessionEvent::PlaybackChanged(self.playback.state().clone())),
                Ok(false) => {}
                Err(e) => {
                    self.emit(SessionEvent::Alert(e));
                    self.emit(SessionEvent::PlaybackChanged(self.playback.state().clone()));
                }
            },
        }
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    fn spawn_fetch(&mut self) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.loading = true;

        let api = Arc::clone(&self.deps.api);
        let conversation = self.conversation.clone();
        let tx = self.internal_tx.clone();
        let mut cancel = self.cancel_rx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled(&mut cancel) => {
                    tracing::debug!(conversation_id = %conversation, "History fetch cancelled");
                }
                result = api.fetch_messages(&conversation) => {
                    let result = result.map_err(|e| {
                        tracing::error!(conversation_id = %conversation, error = %e, "Error fetching messages");
                        e.into_fetch_error()
                    });
                    let _ = tx.send(Internal::HistoryLoaded { generation, result });
                }
            }
        });
    }

    fn on_history_loaded(&mut self, generation: u64, result: Result<Vec<Message>, ChatError>) {
        if generation < self.applied_generation {
            tracing::debug!(generation, "Discarding superseded history");
            return;
        }
        self.applied_generation = generation;
        if generation == self.next_generation {
            self.loading = false;
        }

        match result {
            Ok(history) => {
                self.store.load(history);
                self.fetch_error = None;
                self.emit(SessionEvent::StoreChanged {
                    len: self.store.len(),
                });
            }
            Err(e) => {
                self.fetch_error = Some(e.clone());
                self.emit(SessionEvent::FetchFailed(e));
            }
        }

        if self.phase == SessionPhase::Initializing {
            self.phase = SessionPhase::Ready;
            self.emit_state();
        }
    }

    // -------------------------------------------------------------------------
    // Realtime
    // -------------------------------------------------------------------------

    fn spawn_channel_setup(&self) {
        let transport = Arc::clone(&self.deps.transport);
        let tokens = Arc::clone(&self.deps.tokens);
        let channel_name = self.channel_name.clone();
        let handler = self.channel_tx.clone();
        let tx = self.internal_tx.clone();
        let cancel = self.cancel_rx.clone();

        tokio::spawn(async move {
            let token = tokens.load_token().await;
            let ready = match realtime::connect(transport.as_ref(), token).await {
                Some(client) => match client.subscribe(&channel_name, NEW_MESSAGE_EVENT, handler).await {
                    Ok(id) => Some((client, id)),
                    Err(e) => {
                        tracing::error!(channel = %channel_name, error = %e.into_channel_error(), "Channel subscription failed");
                        client.disconnect().await;
                        None
                    }
                },
                None => None,
            };

            // Closed while connecting: nobody will own the client
            if *cancel.borrow() {
                if let Some((client, _)) = ready {
                    client.disconnect().await;
                }
                return;
            }

            if let Err(mpsc::error::SendError(Internal::ChannelReady(Some((client, _))))) =
                tx.send(Internal::ChannelReady(ready))
            {
                client.disconnect().await;
            }
        });
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        tracing::debug!(
            conversation_id = %self.conversation,
            event = %event.event,
            "New message announced; refetching history"
        );
        self.spawn_fetch();
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    fn send_text(&mut self, body: String) {
        let body = body.trim();
        if body.is_empty() {
            return;
        }

        let draft = Message::optimistic_text(self.deps.user.user_type.sender_type(), body);
        let temp_id = self.store.append_optimistic(draft);
        self.emit(SessionEvent::StoreChanged {
            len: self.store.len(),
        });
        self.spawn_send(Some(temp_id), None, OutgoingMessage::text(body));
    }

    fn retry(&mut self, temp_id: MessageId) {
        let Some(body) = self.store.resend(&temp_id) else {
            tracing::debug!(message_id = %temp_id, "Nothing to retry");
            return;
        };
        self.emit(SessionEvent::StoreChanged {
            len: self.store.len(),
        });
        self.spawn_send(Some(temp_id), None, OutgoingMessage::text(body));
    }

    fn send_attachment(&mut self) {
        let Some(pending) = self.attachments.begin_upload() else {
            return;
        };
        self.spawn_send(None, Some(pending.clone()), OutgoingMessage::attachment(pending));
    }

    fn spawn_send(
        &self,
        temp_id: Option<MessageId>,
        attachment: Option<PendingAttachment>,
        outgoing: OutgoingMessage,
    ) {
        let api = Arc::clone(&self.deps.api);
        let conversation = self.conversation.clone();
        let tx = self.internal_tx.clone();
        let mut cancel = self.cancel_rx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled(&mut cancel) => {
                    tracing::debug!(conversation_id = %conversation, "Send cancelled");
                }
                result = api.send_message(&conversation, outgoing) => {
                    let result = result.map_err(|e| {
                        tracing::error!(conversation_id = %conversation, error = %e, "Error sending message");
                        e.into_fetch_error()
                    });
                    let _ = tx.send(Internal::SendCompleted { temp_id, attachment, result });
                }
            }
        });
    }

    fn on_send_completed(
        &mut self,
        temp_id: Option<MessageId>,
        attachment: Option<PendingAttachment>,
        result: Result<Message, ChatError>,
    ) {
        let succeeded = result.is_ok();
        match result {
            Ok(message) => match &temp_id {
                Some(temp_id) => self.store.confirm(temp_id, message),
                None => self.store.append(message),
            },
            Err(e) => {
                if let Some(temp_id) = &temp_id {
                    self.store.fail(temp_id);
                }
                self.emit(SessionEvent::SendFailed(e));
            }
        }

        if temp_id.is_some() || succeeded {
            self.emit(SessionEvent::StoreChanged {
                len: self.store.len(),
            });
        }

        if let Some(pending) = attachment {
            self.attachments.finish_upload(&pending, succeeded);
            if succeeded {
                self.emit(SessionEvent::StagingChanged(self.attachments.staged().cloned()));
            }
        }
    }

    fn spawn_download(&self, file_path: String, file_name: String) {
        let api = Arc::clone(&self.deps.api);
        let dest = self.deps.download_dir.clone();
        let tx = self.internal_tx.clone();
        let mut cancel = self.cancel_rx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled(&mut cancel) => {}
                result = api.download(&file_path, &file_name, &dest) => {
                    let result = result.map_err(|e| {
                        tracing::error!(file_path = %file_path, error = %e, "Error downloading file");
                        e.into_fetch_error()
                    });
                    let _ = tx.send(Internal::DownloadCompleted(result));
                }
            }
        });
    }

    // -------------------------------------------------------------------------
    // Attachments & Playback
    // -------------------------------------------------------------------------

    fn spawn_pick(&self, source: PickSource) {
        let pick = self.attachments.pick(source);
        let tx = self.internal_tx.clone();
        let mut cancel = self.cancel_rx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled(&mut cancel) => {}
                picked = pick => {
                    let _ = tx.send(Internal::Picked(picked));
                }
            }
        });
    }

    fn spawn_recording_start(&mut self) {
        let Some(starting) = self.attachments.begin_recording() else {
            return;
        };
        let recorder = Arc::clone(&self.deps.recorder);
        let tx = self.internal_tx.clone();
        let mut cancel = self.cancel_rx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled(&mut cancel) => {}
                started = starting => {
                    if let Err(mpsc::error::SendError(Internal::RecordingStarted(Ok(())))) =
                        tx.send(Internal::RecordingStarted(started))
                    {
                        // Session closed while the recorder was starting
                        if let Err(e) = recorder.stop().await {
                            tracing::warn!(error = %e, "Failed to stop orphaned recording");
                        }
                    }
                }
            }
        });
    }

    fn spawn_audio_load(&self, load: TrackLoad) {
        let message_id = load.message_id().clone();
        let tx = self.internal_tx.clone();
        let mut cancel = self.cancel_rx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled(&mut cancel) => {
                    tracing::debug!(message_id = %message_id, "Audio load cancelled");
                }
                track = load.run() => {
                    if let Err(mpsc::error::SendError(Internal::AudioLoaded(track))) =
                        tx.send(Internal::AudioLoaded(track))
                    {
                        track.discard().await;
                    }
                }
            }
        });
    }

    fn after_staging(&mut self, result: Result<bool, ChatError>) {
        match result {
            Ok(true) => self.emit(SessionEvent::StagingChanged(self.attachments.staged().cloned())),
            Ok(false) => {}
            Err(e) => self.emit(SessionEvent::Alert(e)),
        }
    }

    async fn on_playback_status(&mut self, message_id: MessageId, status: PlaybackStatus) {
        let before = self.playback.state().clone();
        if !self.playback.on_status(&message_id, status).await {
            return;
        }

        if let Some(progress) = self.playback.progress(&message_id) {
            self.emit(SessionEvent::ProgressChanged {
                message_id,
                progress,
            });
        }
        if *self.playback.state() != before {
            self.emit(SessionEvent::PlaybackChanged(self.playback.state().clone()));
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    async fn close(&mut self) {
        let _ = self.cancel_tx.send(true);

        // Results already posted are never applied; only their resources are released
        self.internal_rx.close();
        while let Ok(internal) = self.internal_rx.try_recv() {
            match internal {
                Internal::AudioLoaded(track) => track.discard().await,
                Internal::ChannelReady(Some((client, _))) => client.disconnect().await,
                Internal::RecordingStarted(Ok(())) => {
                    if let Err(e) = self.deps.recorder.stop().await {
                        tracing::warn!(error = %e, "Failed to stop recording on close");
                    }
                }
                _ => {}
            }
        }

        if let Some((client, id)) = self.channel.take() {
            client.unsubscribe(&self.channel_name, &id).await;
            client.disconnect().await;
        }
        self.playback.release().await;
        self.attachments.close().await;

        self.phase = SessionPhase::Closed;
        self.loading = false;
        self.emit_state();
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            conversation: self.conversation.clone(),
            phase: self.phase,
            realtime: self.realtime,
            messages: self.store.messages().to_vec(),
            loading: self.loading,
            fetch_error: self.fetch_error.clone(),
            staged: self.attachments.staged().cloned(),
            uploading: self.attachments.is_uploading(),
            recording_seconds: self.attachments.recording_seconds(),
            playback: self.playback.state().clone(),
            progress: self.playback.all_progress().clone(),
        }
    }

    fn emit_state(&self) {
        self.emit(SessionEvent::StateChanged {
            phase: self.phase,
            realtime: self.realtime,
        });
    }

    fn emit(&self, event: SessionEvent) {
        // The view may have stopped listening; state stays authoritative
        let _ = self.events.send(event);
    }
}

/// Resolves once the cancellation signal is set or its sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
