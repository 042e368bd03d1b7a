use thiserror::Error;

use crate::common::types::GuildId;

/// Failures reported by a voice backend.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("failed to join voice channel: {0}")]
    Join(String),
    #[error("failed to leave voice channel: {0}")]
    Leave(String),
    #[error("audio file not found: {0}")]
    MissingFile(String),
    #[error("failed to start playback: {0}")]
    Play(String),
}

/// Errors surfaced by the session registry.
///
/// The first three are user-correctable and are answered with a reply; the
/// environment-level ones are logged and, when a user is waiting, reported.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("guild {0} already has an active session")]
    AlreadyConnected(GuildId),
    #[error("guild {0} has no active session")]
    NotConnected(GuildId),
    #[error("requester is not in a voice channel")]
    NoChannelForUser,
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("playback could not start: {0}")]
    PlaybackInitFailure(String),
}

impl SessionError {
    /// True for errors caused by the caller rather than the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyConnected(_) | Self::NotConnected(_) | Self::NoChannelForUser
        )
    }
}

impl From<VoiceError> for SessionError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::Join(_) | VoiceError::Leave(_) => Self::ConnectionFailure(e.to_string()),
            VoiceError::MissingFile(_) | VoiceError::Play(_) => {
                Self::PlaybackInitFailure(e.to_string())
            }
        }
    }
}
