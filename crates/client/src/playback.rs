//! Audio playback controller
//!
//! One playback slot for the whole session. Starting a message unloads
//! whatever was loaded before; status ticks update that message's progress.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use fleetchat_shared::{AudioProgress, ChatError, ChatResult, MessageId};

/// Periodic status reported by a loaded sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackStatus {
    pub position_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
    pub did_just_finish: bool,
}

/// Where a loaded sound reports its status, tagged with its message id
#[derive(Debug, Clone)]
pub struct StatusSink {
    message_id: MessageId,
    tx: mpsc::UnboundedSender<(MessageId, PlaybackStatus)>,
}

impl StatusSink {
    pub fn new(message_id: MessageId, tx: mpsc::UnboundedSender<(MessageId, PlaybackStatus)>) -> Self {
        Self { message_id, tx }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Report a status tick; returns false once the receiver is gone
    pub fn send(&self, status: PlaybackStatus) -> bool {
        self.tx.send((self.message_id.clone(), status)).is_ok()
    }
}

/// Platform audio output
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Load `uri`; the sound reports status ticks through `sink` until unloaded
    async fn load(&self, uri: &str, sink: StatusSink) -> ChatResult<Box<dyn LoadedSound>>;
}

/// A sound resource held by the playback slot
#[async_trait]
pub trait LoadedSound: Send + Sync {
    async fn play(&mut self) -> ChatResult<()>;

    async fn pause(&mut self) -> ChatResult<()>;

    async fn set_position(&mut self, position_ms: u64) -> ChatResult<()>;

    async fn unload(&mut self);
}

/// State of the playback slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading(MessageId),
    Playing(MessageId),
    Paused(MessageId),
}

impl PlaybackState {
    /// Message currently occupying the slot
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Idle => None,
            Self::Loading(id) | Self::Playing(id) | Self::Paused(id) => Some(id),
        }
    }

    pub fn is_playing(&self, id: &MessageId) -> bool {
        matches!(self, Self::Playing(current) if current == id)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading(id) => write!(f, "loading({})", id),
            Self::Playing(id) => write!(f, "playing({})", id),
            Self::Paused(id) => write!(f, "paused({})", id),
        }
    }
}

/// What `play` decided to do
pub enum PlayStart {
    /// The track is already playing or loading
    Unchanged,
    /// A paused track picked up where it stopped
    Resumed,
    /// A new track must be loaded; run it off the session loop and hand
    /// the result to [`PlaybackController::finish_load`]
    Load(TrackLoad),
}

/// A pending track load, detached from the controller
pub struct TrackLoad {
    backend: Arc<dyn AudioBackend>,
    uri: String,
    sink: StatusSink,
    load: u64,
}

impl TrackLoad {
    pub fn message_id(&self) -> &MessageId {
        self.sink.message_id()
    }

    /// Load the sound and start it
    pub async fn run(self) -> LoadedTrack {
        let message_id = self.sink.message_id().clone();
        let result = match self.backend.load(&self.uri, self.sink).await {
            Ok(mut sound) => match sound.play().await {
                Ok(()) => Ok(sound),
                Err(e) => {
                    tracing::error!(message_id = %message_id, error = %e, "Failed to start audio");
                    sound.unload().await;
                    Err(e)
                }
            },
            Err(e) => {
                tracing::error!(message_id = %message_id, uri = %self.uri, error = %e, "Failed to load audio");
                Err(e)
            }
        };

        LoadedTrack {
            message_id,
            load: self.load,
            result,
        }
    }
}

/// Result of a [`TrackLoad`]
pub struct LoadedTrack {
    message_id: MessageId,
    load: u64,
    result: ChatResult<Box<dyn LoadedSound>>,
}

impl LoadedTrack {
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Unload a sound that will never occupy the slot
    pub async fn discard(self) {
        if let Ok(mut sound) = self.result {
            sound.unload().await;
            tracing::debug!(message_id = %self.message_id, "Discarded superseded audio");
        }
    }
}

/// Single-slot audio player
pub struct PlaybackController {
    backend: Arc<dyn AudioBackend>,
    status_tx: mpsc::UnboundedSender<(MessageId, PlaybackStatus)>,
    state: PlaybackState,
    sound: Option<Box<dyn LoadedSound>>,
    progress: HashMap<MessageId, AudioProgress>,
    loads: u64,
}

impl PlaybackController {
    /// Create a controller whose sounds report into `status_tx`
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        status_tx: mpsc::UnboundedSender<(MessageId, PlaybackStatus)>,
    ) -> Self {
        Self {
            backend,
            status_tx,
            state: PlaybackState::Idle,
            sound: None,
            progress: HashMap::new(),
            loads: 0,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Last known progress for a message
    pub fn progress(&self, id: &MessageId) -> Option<AudioProgress> {
        self.progress.get(id).copied()
    }

    pub fn all_progress(&self) -> &HashMap<MessageId, AudioProgress> {
        &self.progress
    }

    /// Start playing `uri` for message `id`
    ///
    /// A paused track with the same id resumes in place. Otherwise any loaded
    /// track is unloaded, the slot moves to `Loading(id)` and the load is
    /// returned to the caller; any load still outstanding is superseded.
    pub async fn play(&mut self, uri: &str, id: &MessageId) -> ChatResult<PlayStart> {
        if self.state.is_playing(id) || self.state == PlaybackState::Loading(id.clone()) {
            return Ok(PlayStart::Unchanged);
        }

        if self.state == PlaybackState::Paused(id.clone()) {
            if let Some(sound) = self.sound.as_mut() {
                sound.play().await.map_err(as_playback_error)?;
                self.state = PlaybackState::Playing(id.clone());
                tracing::debug!(message_id = %id, "Resumed audio");
                return Ok(PlayStart::Resumed);
            }
        }

        self.unload_current().await;
        self.loads += 1;
        self.state = PlaybackState::Loading(id.clone());

        Ok(PlayStart::Load(TrackLoad {
            backend: Arc::clone(&self.backend),
            uri: uri.to_string(),
            sink: StatusSink::new(id.clone(), self.status_tx.clone()),
            load: self.loads,
        }))
    }

    /// Install a finished load
    ///
    /// Returns false when the load was superseded by another `play` or a
    /// `release`; its sound is unloaded.
    pub async fn finish_load(&mut self, track: LoadedTrack) -> ChatResult<bool> {
        if track.load != self.loads || self.state != PlaybackState::Loading(track.message_id.clone()) {
            track.discard().await;
            return Ok(false);
        }

        match track.result {
            Ok(sound) => {
                self.sound = Some(sound);
                self.state = PlaybackState::Playing(track.message_id.clone());
                self.progress.entry(track.message_id.clone()).or_default();
                tracing::info!(message_id = %track.message_id, "Playing audio message");
                Ok(true)
            }
            Err(e) => {
                self.state = PlaybackState::Idle;
                Err(as_playback_error(e))
            }
        }
    }

    /// Pause the playing track; returns false when nothing is playing
    pub async fn pause(&mut self) -> ChatResult<bool> {
        let PlaybackState::Playing(id) = &self.state else {
            return Ok(false);
        };
        let id = id.clone();

        if let Some(sound) = self.sound.as_mut() {
            sound.pause().await.map_err(as_playback_error)?;
        }
        self.state = PlaybackState::Paused(id);
        Ok(true)
    }

    /// Move the position of `id`
    ///
    /// Only the loaded track is actually repositioned. For any other id just
    /// the displayed position changes and nothing starts playing.
    pub async fn seek(&mut self, id: &MessageId, position_ms: u64) -> ChatResult<()> {
        let loaded = matches!(
            &self.state,
            PlaybackState::Playing(current) | PlaybackState::Paused(current) if current == id
        );

        if loaded {
            if let Some(sound) = self.sound.as_mut() {
                sound
                    .set_position(position_ms)
                    .await
                    .map_err(as_playback_error)?;
            }
        } else {
            tracing::debug!(message_id = %id, position_ms, "Seek on track that is not loaded");
        }

        self.progress.entry(id.clone()).or_default().position_ms = position_ms;
        Ok(())
    }

    /// Apply a status tick; returns true when anything visible changed
    ///
    /// Ticks from a track that no longer occupies the slot are ignored, so
    /// its progress stays at the last value it reported.
    pub async fn on_status(&mut self, id: &MessageId, status: PlaybackStatus) -> bool {
        let current = match &self.state {
            PlaybackState::Playing(current) | PlaybackState::Paused(current) => current,
            PlaybackState::Loading(_) | PlaybackState::Idle => return false,
        };
        if current != id {
            tracing::trace!(message_id = %id, "Ignoring stale playback status");
            return false;
        }

        self.progress.insert(
            id.clone(),
            AudioProgress {
                position_ms: status.position_ms,
                duration_ms: status.duration_ms,
            },
        );

        if status.did_just_finish {
            tracing::debug!(message_id = %id, "Audio finished");
            self.unload_current().await;
            self.state = PlaybackState::Idle;
        }
        true
    }

    /// Unload any loaded track and return to `Idle`
    ///
    /// A load still in flight is superseded.
    pub async fn release(&mut self) {
        self.unload_current().await;
        self.loads += 1;
        self.state = PlaybackState::Idle;
    }

    async fn unload_current(&mut self) {
        if let Some(mut sound) = self.sound.take() {
            sound.unload().await;
            if let Some(id) = self.state.message_id() {
                tracing::debug!(message_id = %id, "Unloaded audio");
            }
        }
    }
}

fn as_playback_error(error: ChatError) -> ChatError {
    match error {
        ChatError::Playback(_) => error,
        other => ChatError::Playback(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Journal {
        calls: Mutex<Vec<String>>,
    }

    impl Journal {
        fn push(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct FakeBackend {
        journal: Arc<Journal>,
        fail_uri: Option<String>,
    }

    struct FakeSound {
        uri: String,
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl AudioBackend for FakeBackend {
        async fn load(&self, uri: &str, _sink: StatusSink) -> ChatResult<Box<dyn LoadedSound>> {
            if self.fail_uri.as_deref() == Some(uri) {
                return Err(ChatError::Playback("unsupported codec".into()));
            }
            self.journal.push(format!("load {}", uri));
            Ok(Box::new(FakeSound {
                uri: uri.to_string(),
                journal: Arc::clone(&self.journal),
            }))
        }
    }

    #[async_trait]
    impl LoadedSound for FakeSound {
        async fn play(&mut self) -> ChatResult<()> {
            self.journal.push(format!("play {}", self.uri));
            Ok(())
        }

        async fn pause(&mut self) -> ChatResult<()> {
            self.journal.push(format!("pause {}", self.uri));
            Ok(())
        }

        async fn set_position(&mut self, position_ms: u64) -> ChatResult<()> {
            self.journal.push(format!("seek {} {}", self.uri, position_ms));
            Ok(())
        }

        async fn unload(&mut self) {
            self.journal.push(format!("unload {}", self.uri));
        }
    }

    fn controller(fail_uri: Option<&str>) -> (PlaybackController, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let backend = FakeBackend {
            journal: Arc::clone(&journal),
            fail_uri: fail_uri.map(str::to_string),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        (PlaybackController::new(Arc::new(backend), tx), journal)
    }

    async fn play(player: &mut PlaybackController, uri: &str, id: &MessageId) -> ChatResult<()> {
        match player.play(uri, id).await? {
            PlayStart::Load(load) => player.finish_load(load.run().await).await.map(|_| ()),
            PlayStart::Unchanged | PlayStart::Resumed => Ok(()),
        }
    }

    fn tick(position_ms: u64) -> PlaybackStatus {
        PlaybackStatus {
            position_ms,
            duration_ms: 10_000,
            is_playing: true,
            did_just_finish: false,
        }
    }

    #[tokio::test]
    async fn test_second_play_preempts_first() {
        let (mut player, journal) = controller(None);
        let a = MessageId::from("a");
        let b = MessageId::from("b");

        play(&mut player, "a.m4a", &a).await.unwrap();
        player.on_status(&a, tick(1_500)).await;
        play(&mut player, "b.m4a", &b).await.unwrap();

        assert_eq!(player.state(), &PlaybackState::Playing(b.clone()));
        assert_eq!(
            journal.calls(),
            vec!["load a.m4a", "play a.m4a", "unload a.m4a", "load b.m4a", "play b.m4a"]
        );

        // Late tick from A must not move its frozen progress
        assert!(!player.on_status(&a, tick(4_000)).await);
        assert_eq!(player.progress(&a).map(|p| p.position_ms), Some(1_500));
    }

    #[tokio::test]
    async fn test_pause_and_resume_same_track() {
        let (mut player, journal) = controller(None);
        let a = MessageId::from("a");

        assert!(!player.pause().await.unwrap());

        play(&mut player, "a.m4a", &a).await.unwrap();
        assert!(player.pause().await.unwrap());
        assert_eq!(player.state(), &PlaybackState::Paused(a.clone()));

        play(&mut player, "a.m4a", &a).await.unwrap();
        assert_eq!(player.state(), &PlaybackState::Playing(a.clone()));
        assert_eq!(
            journal.calls(),
            vec!["load a.m4a", "play a.m4a", "pause a.m4a", "play a.m4a"]
        );
    }

    #[tokio::test]
    async fn test_seek_on_unloaded_track_only_updates_display() {
        let (mut player, journal) = controller(None);
        let a = MessageId::from("a");
        let b = MessageId::from("b");

        play(&mut player, "a.m4a", &a).await.unwrap();
        player.seek(&b, 3_000).await.unwrap();

        assert_eq!(player.state(), &PlaybackState::Playing(a));
        assert_eq!(player.progress(&b).map(|p| p.position_ms), Some(3_000));
        assert!(!journal.calls().iter().any(|c| c.starts_with("seek")));
    }

    #[tokio::test]
    async fn test_seek_on_loaded_track() {
        let (mut player, journal) = controller(None);
        let a = MessageId::from("a");

        play(&mut player, "a.m4a", &a).await.unwrap();
        player.seek(&a, 2_000).await.unwrap();

        assert!(journal.calls().contains(&"seek a.m4a 2000".to_string()));
        assert_eq!(player.progress(&a).map(|p| p.position_ms), Some(2_000));
    }

    #[tokio::test]
    async fn test_natural_finish_returns_to_idle() {
        let (mut player, _journal) = controller(None);
        let a = MessageId::from("a");

        play(&mut player, "a.m4a", &a).await.unwrap();
        player
            .on_status(
                &a,
                PlaybackStatus {
                    position_ms: 10_000,
                    duration_ms: 10_000,
                    is_playing: false,
                    did_just_finish: true,
                },
            )
            .await;

        assert_eq!(player.state(), &PlaybackState::Idle);
        assert_eq!(
            player.progress(&a),
            Some(AudioProgress {
                position_ms: 10_000,
                duration_ms: 10_000
            })
        );
    }

    #[tokio::test]
    async fn test_load_failure_returns_to_idle() {
        let (mut player, _journal) = controller(Some("broken.m4a"));
        let a = MessageId::from("a");

        let err = play(&mut player, "broken.m4a", &a).await.unwrap_err();
        assert!(matches!(err, ChatError::Playback(_)));
        assert_eq!(player.state(), &PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_release_unloads() {
        let (mut player, journal) = controller(None);
        play(&mut player, "a.m4a", &MessageId::from("a")).await.unwrap();
        player.release().await;

        assert_eq!(player.state(), &PlaybackState::Idle);
        assert_eq!(journal.calls().last().map(String::as_str), Some("unload a.m4a"));
    }

    #[tokio::test]
    async fn test_slot_is_loading_until_the_load_lands() {
        let (mut player, journal) = controller(None);
        let a = MessageId::from("a");

        let PlayStart::Load(load) = player.play("a.m4a", &a).await.unwrap() else {
            panic!("expected a load");
        };
        assert_eq!(player.state(), &PlaybackState::Loading(a.clone()));
        assert!(matches!(player.play("a.m4a", &a).await.unwrap(), PlayStart::Unchanged));
        assert!(journal.calls().is_empty());

        assert!(player.finish_load(load.run().await).await.unwrap());
        assert_eq!(player.state(), &PlaybackState::Playing(a));
    }

    #[tokio::test]
    async fn test_superseded_load_is_unloaded() {
        let (mut player, journal) = controller(None);
        let a = MessageId::from("a");
        let b = MessageId::from("b");

        let PlayStart::Load(load_a) = player.play("a.m4a", &a).await.unwrap() else {
            panic!("expected a load");
        };
        let PlayStart::Load(load_b) = player.play("b.m4a", &b).await.unwrap() else {
            panic!("expected a load");
        };

        assert!(!player.finish_load(load_a.run().await).await.unwrap());
        assert_eq!(player.state(), &PlaybackState::Loading(b.clone()));
        assert!(journal.calls().contains(&"unload a.m4a".to_string()));

        assert!(player.finish_load(load_b.run().await).await.unwrap());
        assert_eq!(player.state(), &PlaybackState::Playing(b));
    }

    #[tokio::test]
    async fn test_release_during_load_discards_it() {
        let (mut player, journal) = controller(None);
        let a = MessageId::from("a");

        let PlayStart::Load(load) = player.play("a.m4a", &a).await.unwrap() else {
            panic!("expected a load");
        };
        player.release().await;

        assert!(!player.finish_load(load.run().await).await.unwrap());
        assert_eq!(player.state(), &PlaybackState::Idle);
        assert_eq!(journal.calls().last().map(String::as_str), Some("unload a.m4a"));
    }
}
