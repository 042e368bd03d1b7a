use time::{OffsetDateTime, macros::format_description};

use crate::{
    chime::{ClipIndex, HourSlot},
    common::types::{ChannelId, GuildId, SessionId},
};

/// Read-only view of a session, published by its actor after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub is_playing: bool,
    pub connected_at: OffsetDateTime,
    pub last_chime: Option<HourSlot>,
}

impl SessionSnapshot {
    /// `connected_at` as `2024-05-01 13:05:09 +09:00`.
    pub fn connected_since(&self) -> String {
        let format = format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
        );
        self.connected_at
            .format(&format)
            .unwrap_or_else(|_| self.connected_at.to_string())
    }
}

/// What a session did with one chime request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChimeOutcome {
    Started(ClipIndex),
    SkippedPlaying,
    SkippedDisconnected,
    SkippedAlreadyChimed,
    /// The session ended before it could answer.
    SessionGone,
    Failed(String),
}

impl ChimeOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}
