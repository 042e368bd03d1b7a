use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{Playback, PlaybackControl, PlaybackEnd, VoiceBackend, VoiceConnection};
use crate::common::{
    errors::VoiceError,
    types::{ChannelId, GuildId},
};

/// Shared bookkeeping between the fake backend and the connections it hands out.
#[derive(Default)]
pub struct FakeVoiceState {
    pub joins: Mutex<Vec<(GuildId, ChannelId)>>,
    pub plays: Mutex<Vec<(GuildId, PathBuf)>>,
    pub leaves: Mutex<Vec<GuildId>>,
    /// Joins and leaves in the order they happened.
    pub calls: Mutex<Vec<(&'static str, GuildId)>>,
    pub stops: AtomicUsize,
    pub fail_join: AtomicBool,
    pub fail_play: AtomicBool,
    dead: Mutex<Vec<GuildId>>,
    pending: Mutex<Vec<(GuildId, oneshot::Sender<PlaybackEnd>)>>,
}

impl FakeVoiceState {
    pub fn play_count(&self) -> usize {
        self.plays.lock().len()
    }

    pub fn last_play(&self) -> Option<(GuildId, PathBuf)> {
        self.plays.lock().last().cloned()
    }

    /// Makes the guild's connection report itself as no longer alive.
    pub fn kill(&self, guild_id: GuildId) {
        self.dead.lock().push(guild_id);
    }

    /// Completes every pending playback for `guild_id`.
    pub fn finish(&self, guild_id: GuildId, end: PlaybackEnd) -> usize {
        let mut pending = self.pending.lock();
        let (done, rest): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|(guild, _)| *guild == guild_id);
        *pending = rest;
        let count = done.len();
        for (_, tx) in done {
            let _ = tx.send(end.clone());
        }
        count
    }
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub state: Arc<FakeVoiceState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoiceBackend for FakeBackend {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, VoiceError> {
        tokio::task::yield_now().await;
        if self.state.fail_join.load(Ordering::SeqCst) {
            return Err(VoiceError::Join("missing permissions".into()));
        }
        self.state.joins.lock().push((guild_id, channel_id));
        self.state.calls.lock().push(("join", guild_id));
        Ok(Box::new(FakeConnection {
            guild_id,
            state: self.state.clone(),
        }))
    }
}

struct FakeConnection {
    guild_id: GuildId,
    state: Arc<FakeVoiceState>,
}

struct FakeControl {
    state: Arc<FakeVoiceState>,
}

impl PlaybackControl for FakeControl {
    fn stop(&self) {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn is_alive(&self) -> bool {
        !self.state.dead.lock().contains(&self.guild_id)
    }

    async fn play(&self, path: &Path) -> Result<Playback, VoiceError> {
        if self.state.fail_play.load(Ordering::SeqCst) {
            return Err(VoiceError::Play("codec unavailable".into()));
        }
        self.state
            .plays
            .lock()
            .push((self.guild_id, path.to_path_buf()));
        let (tx, rx) = oneshot::channel();
        self.state.pending.lock().push((self.guild_id, tx));
        Ok(Playback::new(
            Box::new(FakeControl {
                state: self.state.clone(),
            }),
            rx,
        ))
    }

    async fn leave(&self) -> Result<(), VoiceError> {
        tokio::task::yield_now().await;
        self.state.leaves.lock().push(self.guild_id);
        self.state.calls.lock().push(("leave", self.guild_id));
        Ok(())
    }
}
