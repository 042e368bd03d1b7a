use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use poise::serenity_prelude as serenity;
use songbird::{
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
    error::JoinError,
    input::File,
    tracks::{PlayMode, Track, TrackHandle},
};
use tokio::sync::oneshot;
use tracing::debug;

use super::{Playback, PlaybackControl, PlaybackEnd, VoiceBackend, VoiceConnection};
use crate::common::{
    errors::VoiceError,
    types::{ChannelId, GuildId},
};

/// Voice backend driven by songbird on top of the serenity gateway.
pub struct SongbirdBackend {
    manager: Arc<Songbird>,
}

impl SongbirdBackend {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceBackend for SongbirdBackend {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, VoiceError> {
        let guild = serenity::GuildId::new(guild_id.0);
        let channel = serenity::ChannelId::new(channel_id.0);

        match self.manager.join(guild, channel).await {
            Ok(call) => Ok(Box::new(SongbirdConnection {
                manager: self.manager.clone(),
                guild,
                call,
            })),
            Err(e) => {
                // A failed join still leaves a Call behind.
                if let Err(cleanup) = self.manager.remove(guild).await {
                    debug!("[{}] Cleanup after failed join: {}", guild_id, cleanup);
                }
                Err(VoiceError::Join(e.to_string()))
            }
        }
    }
}

struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild: serenity::GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn is_alive(&self) -> bool {
        self.call.lock().await.current_channel().is_some()
    }

    async fn play(&self, path: &Path) -> Result<Playback, VoiceError> {
        if !path.is_file() {
            return Err(VoiceError::MissingFile(path.display().to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let notifier = TrackEndNotifier::new(tx);

        // Queued paused and only started once both end events are attached.
        let track = {
            let mut call = self.call.lock().await;
            call.play(Track::new(File::new(path.to_path_buf()).into()).pause())
        };

        let started = track
            .add_event(Event::Track(TrackEvent::End), notifier.clone())
            .and_then(|_| track.add_event(Event::Track(TrackEvent::Error), notifier))
            .and_then(|_| track.play());
        if let Err(e) = started {
            let _ = track.stop();
            return Err(VoiceError::Play(e.to_string()));
        }

        Ok(Playback::new(Box::new(SongbirdPlayback(track)), rx))
    }

    async fn leave(&self) -> Result<(), VoiceError> {
        match self.manager.remove(self.guild).await {
            Ok(()) | Err(JoinError::NoCall) => Ok(()),
            Err(e) => Err(VoiceError::Leave(e.to_string())),
        }
    }
}

struct SongbirdPlayback(TrackHandle);

impl PlaybackControl for SongbirdPlayback {
    fn stop(&self) {
        if let Err(e) = self.0.stop() {
            // Already finished.
            debug!("Track stop ignored: {}", e);
        }
    }
}

/// Forwards the first end-or-error event of a track to the session.
#[derive(Clone)]
struct TrackEndNotifier {
    tx: Arc<Mutex<Option<oneshot::Sender<PlaybackEnd>>>>,
}

impl TrackEndNotifier {
    fn new(tx: oneshot::Sender<PlaybackEnd>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Only the first report reaches the session.
    fn report(&self, end: PlaybackEnd) {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(end);
            }
            None => debug!("Track end already reported"),
        }
    }

    fn end_of(mode: &PlayMode) -> PlaybackEnd {
        match mode {
            PlayMode::Stop => PlaybackEnd::Stopped,
            PlayMode::Errored(e) => PlaybackEnd::Errored(format!("{:?}", e)),
            _ => PlaybackEnd::Finished,
        }
    }
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(tracks) = ctx else {
            return None;
        };

        let end = tracks
            .first()
            .map(|(state, _)| Self::end_of(&state.playing))
            .unwrap_or(PlaybackEnd::Finished);

        self.report(end);
        Some(Event::Cancel)
    }
}
