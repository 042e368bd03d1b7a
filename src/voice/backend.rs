use std::path::Path;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::common::{
    errors::VoiceError,
    types::{ChannelId, GuildId},
};

/// How a playback came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEnd {
    Finished,
    Stopped,
    Errored(String),
}

/// Stops a playback that is still running.
pub trait PlaybackControl: Send + Sync {
    fn stop(&self);
}

/// A playback in flight: a stop control plus a one-shot completion signal.
pub struct Playback {
    pub control: Box<dyn PlaybackControl>,
    pub ended: oneshot::Receiver<PlaybackEnd>,
}

impl Playback {
    pub fn new(control: Box<dyn PlaybackControl>, ended: oneshot::Receiver<PlaybackEnd>) -> Self {
        Self { control, ended }
    }

    /// Resolves when the backend reports the end. A backend that drops the
    /// sender without reporting is treated as a failed playback.
    pub async fn wait(ended: oneshot::Receiver<PlaybackEnd>) -> PlaybackEnd {
        ended
            .await
            .unwrap_or_else(|_| PlaybackEnd::Errored("playback ended without a report".into()))
    }
}

/// Joins voice channels.
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, VoiceError>;
}

/// A live voice connection, owned by exactly one session.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// False once the platform no longer considers the bot connected.
    async fn is_alive(&self) -> bool;

    /// Starts playing `path`. Returns once playback has started; the end is
    /// reported through the returned [`Playback`].
    async fn play(&self, path: &Path) -> Result<Playback, VoiceError>;

    async fn leave(&self) -> Result<(), VoiceError>;
}
