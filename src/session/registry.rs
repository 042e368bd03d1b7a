use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    chime::{ClipIndex, ClipLibrary, Clock, HourSlot},
    common::{
        errors::SessionError,
        types::{ChannelId, GuildId, SessionId},
    },
    session::{
        actor::{SessionActor, SessionCommand, SessionHandle},
        types::{ChimeOutcome, SessionSnapshot},
    },
    voice::VoiceBackend,
};

/// Registry entry for one guild.
pub(crate) enum SessionSlot {
    /// A `start` is joining the channel; the guild is taken but has no session yet.
    Connecting,
    Active(SessionId, SessionHandle),
    /// Told to stop; the actor is leaving the channel and will drop the entry.
    Closing(SessionId, SessionHandle),
}

impl SessionSlot {
    pub(crate) fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Connecting => None,
            Self::Active(id, _) | Self::Closing(id, _) => Some(*id),
        }
    }

    fn handle(&self) -> Option<&SessionHandle> {
        match self {
            Self::Active(_, handle) => Some(handle),
            Self::Connecting | Self::Closing(..) => None,
        }
    }
}

/// Releases a `Connecting` reservation unless the join completed.
struct Reservation<'a> {
    sessions: &'a DashMap<GuildId, SessionSlot>,
    guild_id: GuildId,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.sessions
                .remove_if(&self.guild_id, |_, slot| matches!(slot, SessionSlot::Connecting));
        }
    }
}

/// All active sessions, keyed by guild.
///
/// Each session is owned by its own actor task; this map only holds the
/// handles used to reach them, so guilds never contend on a shared lock.
pub struct SessionRegistry {
    sessions: Arc<DashMap<GuildId, SessionSlot>>,
    backend: Arc<dyn VoiceBackend>,
    clips: Arc<ClipLibrary>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(
        backend: Arc<dyn VoiceBackend>,
        clips: Arc<ClipLibrary>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            backend,
            clips,
            clock,
        }
    }

    pub fn clips(&self) -> &ClipLibrary {
        &self.clips
    }

    /// Joins `channel_id` and opens a session for `guild_id`.
    ///
    /// `channel_id` is the requester's current voice channel, if any.
    pub async fn start(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
    ) -> Result<SessionSnapshot, SessionError> {
        self.wait_closed(guild_id).await;
        if self.sessions.contains_key(&guild_id) {
            return Err(SessionError::AlreadyConnected(guild_id));
        }
        let channel_id = channel_id.ok_or(SessionError::NoChannelForUser)?;

        match self.sessions.entry(guild_id) {
            Entry::Occupied(_) => return Err(SessionError::AlreadyConnected(guild_id)),
            Entry::Vacant(entry) => {
                entry.insert(SessionSlot::Connecting);
            }
        }
        let mut reservation = Reservation {
            sessions: &self.sessions,
            guild_id,
            armed: true,
        };

        let connection = self.backend.join(guild_id, channel_id).await?;

        let snapshot = SessionSnapshot {
            id: SessionId::next(),
            guild_id,
            channel_id,
            is_playing: false,
            connected_at: self.clock.now(),
            last_chime: None,
        };
        let handle = SessionActor::spawn(
            snapshot.clone(),
            connection,
            self.clips.clone(),
            self.sessions.clone(),
        );
        self.sessions
            .insert(guild_id, SessionSlot::Active(snapshot.id, handle));
        reservation.armed = false;

        info!(
            "[{}] Session {} joined channel {} at {}",
            guild_id,
            snapshot.id,
            channel_id,
            snapshot.connected_since()
        );
        Ok(snapshot)
    }

    /// Stops playback, leaves the channel and removes the session.
    pub async fn stop(&self, guild_id: GuildId) -> Result<(), SessionError> {
        let (id, handle) = self
            .begin_closing(guild_id)
            .ok_or(SessionError::NotConnected(guild_id))?;

        let (reply, done) = oneshot::channel();
        if handle.tx.send(SessionCommand::Stop { reply }).is_err() {
            self.forget(guild_id, id);
            return Err(SessionError::NotConnected(guild_id));
        }
        done.await.map_err(|_| SessionError::NotConnected(guild_id))
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionSnapshot> {
        self.sessions
            .get(&guild_id)
            .and_then(|slot| slot.handle().map(SessionHandle::snapshot))
    }

    /// Reconciles an involuntary disconnect reported by the platform.
    /// Returns whether a session was open.
    pub fn disconnected(&self, guild_id: GuildId) -> bool {
        let Some((id, handle)) = self.begin_closing(guild_id) else {
            return false;
        };
        if handle.tx.send(SessionCommand::Disconnected).is_err() {
            self.forget(guild_id, id);
        }
        true
    }

    /// Asks the guild's session to chime `clip` for `slot`.
    pub async fn chime(&self, guild_id: GuildId, slot: HourSlot, clip: ClipIndex) -> ChimeOutcome {
        let Some((id, handle)) = self.active(guild_id) else {
            return ChimeOutcome::SessionGone;
        };

        let (reply, outcome) = oneshot::channel();
        if handle
            .tx
            .send(SessionCommand::Chime { slot, clip, reply })
            .is_err()
        {
            self.forget(guild_id, id);
            return ChimeOutcome::SessionGone;
        }
        outcome.await.unwrap_or(ChimeOutcome::SessionGone)
    }

    pub fn active_guilds(&self) -> Vec<GuildId> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().handle().is_some())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active_guilds().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every session.
    pub async fn shutdown(&self) {
        let guilds = self.active_guilds();
        if guilds.is_empty() {
            return;
        }
        info!("Closing {} session(s)", guilds.len());
        for (guild_id, result) in join_all(
            guilds
                .into_iter()
                .map(|guild_id| async move { (guild_id, self.stop(guild_id).await) }),
        )
        .await
        {
            if let Err(e) = result {
                debug!("[{}] Session already closed: {}", guild_id, e);
            }
        }
    }

    fn active(&self, guild_id: GuildId) -> Option<(SessionId, SessionHandle)> {
        let slot = self.sessions.get(&guild_id)?;
        match slot.value() {
            SessionSlot::Active(id, handle) => Some((*id, handle.clone())),
            SessionSlot::Connecting | SessionSlot::Closing(..) => None,
        }
    }

    /// Flips an active session to `Closing`, so it no longer counts as
    /// connected while its actor tears down.
    fn begin_closing(&self, guild_id: GuildId) -> Option<(SessionId, SessionHandle)> {
        let mut slot = self.sessions.get_mut(&guild_id)?;
        let (id, handle) = match slot.value() {
            SessionSlot::Active(id, handle) => (*id, handle.clone()),
            SessionSlot::Connecting | SessionSlot::Closing(..) => return None,
        };
        *slot.value_mut() = SessionSlot::Closing(id, handle.clone());
        Some((id, handle))
    }

    /// Waits for a closing session's actor to leave the channel.
    async fn wait_closed(&self, guild_id: GuildId) {
        let closing = match self.sessions.get(&guild_id).as_deref() {
            Some(SessionSlot::Closing(id, handle)) => Some((*id, handle.clone())),
            _ => None,
        };
        let Some((id, handle)) = closing else {
            return;
        };

        debug!("[{}] Waiting for session {} to close", guild_id, id);
        handle.tx.closed().await;
        self.sessions.remove_if(&guild_id, |_, slot| {
            matches!(slot, SessionSlot::Closing(closing, _) if *closing == id)
        });
    }

    /// Drops an entry whose actor is no longer running.
    fn forget(&self, guild_id: GuildId, id: SessionId) {
        warn!("[{}] Session {} actor is gone; removing it", guild_id, id);
        self.sessions
            .remove_if(&guild_id, |_, slot| slot.session_id() == Some(id));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use time::macros::{date, datetime};

    use super::*;
    use crate::{
        chime::testing::ManualClock,
        voice::{PlaybackEnd, testing::FakeBackend},
    };

    const GUILD: GuildId = GuildId(10);
    const CHANNEL: ChannelId = ChannelId(20);

    struct Fixture {
        registry: SessionRegistry,
        backend: FakeBackend,
        _dir: TempClips,
    }

    struct TempClips(std::path::PathBuf);

    impl Drop for TempClips {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn fixture(name: &str) -> Fixture {
        let dir = std::env::temp_dir().join(format!(
            "chimebot-registry-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        for clip in ClipIndex::all() {
            std::fs::write(dir.join(format!("{}.wav", clip)), b"RIFF").unwrap();
        }

        let backend = FakeBackend::new();
        let registry = SessionRegistry::new(
            Arc::new(backend.clone()),
            Arc::new(ClipLibrary::new(&dir, "wav")),
            Arc::new(ManualClock::new(datetime!(2024-05-01 13:30:00 +09:00))),
        );
        Fixture {
            registry,
            backend,
            _dir: TempClips(dir),
        }
    }

    fn slot(hour: u8) -> HourSlot {
        HourSlot {
            date: date!(2024 - 05 - 01),
            hour,
        }
    }

    /// Lets spawned actor and waiter tasks run.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_start_creates_idle_session() {
        let f = fixture("start");
        let session = f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();

        assert_eq!(session.guild_id, GUILD);
        assert_eq!(session.channel_id, CHANNEL);
        assert!(!session.is_playing);
        assert_eq!(f.registry.get(GUILD), Some(session));
        assert_eq!(f.backend.state.joins.lock().as_slice(), &[(GUILD, CHANNEL)]);
    }

    #[tokio::test]
    async fn test_start_twice_is_already_connected() {
        let f = fixture("start-twice");
        let first = f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();

        let second = f.registry.start(GUILD, Some(ChannelId(99))).await;
        assert!(matches!(second, Err(SessionError::AlreadyConnected(g)) if g == GUILD));
        assert_eq!(f.registry.get(GUILD), Some(first));
        assert_eq!(f.backend.state.joins.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_starts_join_once() {
        let f = fixture("start-race");
        let (a, b) = tokio::join!(
            f.registry.start(GUILD, Some(CHANNEL)),
            f.registry.start(GUILD, Some(CHANNEL))
        );

        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(f.backend.state.joins.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_start_without_channel() {
        let f = fixture("no-channel");
        let result = f.registry.start(GUILD, None).await;
        assert!(matches!(result, Err(SessionError::NoChannelForUser)));
        assert!(f.registry.get(GUILD).is_none());
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_failed_join_leaves_no_session() {
        let f = fixture("join-fails");
        f.backend.state.fail_join.store(true, Ordering::SeqCst);

        let result = f.registry.start(GUILD, Some(CHANNEL)).await;
        assert!(matches!(result, Err(SessionError::ConnectionFailure(_))));
        assert!(f.registry.get(GUILD).is_none());

        f.backend.state.fail_join.store(false, Ordering::SeqCst);
        assert!(f.registry.start(GUILD, Some(CHANNEL)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_without_session_is_not_connected() {
        let f = fixture("stop-none");
        let result = f.registry.stop(GUILD).await;
        assert!(matches!(result, Err(SessionError::NotConnected(g)) if g == GUILD));
        assert!(f.registry.is_empty());
        assert!(f.backend.state.leaves.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_leaves_and_removes() {
        let f = fixture("stop");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();

        f.registry.stop(GUILD).await.unwrap();
        assert!(f.registry.get(GUILD).is_none());
        assert_eq!(f.backend.state.leaves.lock().as_slice(), &[GUILD]);

        let again = f.registry.stop(GUILD).await;
        assert!(matches!(again, Err(SessionError::NotConnected(_))));
        assert_eq!(f.backend.state.leaves.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_chime_sets_and_clears_playing() {
        let f = fixture("chime");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();

        let outcome = f.registry.chime(GUILD, slot(14), ClipIndex::for_hour(14)).await;
        assert_eq!(outcome, ChimeOutcome::Started(ClipIndex::for_hour(14)));
        assert!(f.registry.get(GUILD).unwrap().is_playing);

        let (_, path) = f.backend.state.last_play().unwrap();
        assert!(path.ends_with("14.wav"));

        assert_eq!(f.backend.state.finish(GUILD, PlaybackEnd::Finished), 1);
        settle().await;
        assert!(!f.registry.get(GUILD).unwrap().is_playing);
    }

    #[tokio::test]
    async fn test_chime_while_playing_is_skipped() {
        let f = fixture("overlap");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();
        f.registry.chime(GUILD, slot(14), ClipIndex::for_hour(14)).await;

        let outcome = f.registry.chime(GUILD, slot(15), ClipIndex::for_hour(15)).await;
        assert_eq!(outcome, ChimeOutcome::SkippedPlaying);
        assert_eq!(f.backend.state.play_count(), 1);
    }

    #[tokio::test]
    async fn test_same_hour_chimes_once() {
        let f = fixture("same-hour");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();
        f.registry.chime(GUILD, slot(14), ClipIndex::for_hour(14)).await;
        f.backend.state.finish(GUILD, PlaybackEnd::Finished);
        settle().await;

        let outcome = f.registry.chime(GUILD, slot(14), ClipIndex::for_hour(14)).await;
        assert_eq!(outcome, ChimeOutcome::SkippedAlreadyChimed);
        assert_eq!(f.backend.state.play_count(), 1);
    }

    #[tokio::test]
    async fn test_errored_playback_still_clears_playing() {
        let f = fixture("errored");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();
        f.registry.chime(GUILD, slot(9), ClipIndex::for_hour(9)).await;

        f.backend
            .state
            .finish(GUILD, PlaybackEnd::Errored("decoder died".into()));
        settle().await;
        assert!(!f.registry.get(GUILD).unwrap().is_playing);
    }

    #[tokio::test]
    async fn test_failed_play_resets_playing() {
        let f = fixture("play-fails");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();
        f.backend.state.fail_play.store(true, Ordering::SeqCst);

        let outcome = f.registry.chime(GUILD, slot(14), ClipIndex::for_hour(14)).await;
        assert!(matches!(outcome, ChimeOutcome::Failed(_)));
        assert!(!f.registry.get(GUILD).unwrap().is_playing);

        f.backend.state.fail_play.store(false, Ordering::SeqCst);
        let next = f.registry.chime(GUILD, slot(15), ClipIndex::for_hour(15)).await;
        assert!(next.is_started());
    }

    #[tokio::test]
    async fn test_missing_clip_resets_playing() {
        let f = fixture("missing-clip");
        std::fs::remove_file(f.registry.clips().path_for(ClipIndex::for_hour(3))).unwrap();
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();

        let outcome = f.registry.chime(GUILD, slot(3), ClipIndex::for_hour(3)).await;
        assert!(matches!(outcome, ChimeOutcome::Failed(_)));
        assert!(!f.registry.get(GUILD).unwrap().is_playing);
        assert_eq!(f.backend.state.play_count(), 0);
    }

    #[tokio::test]
    async fn test_dead_connection_is_skipped() {
        let f = fixture("dead");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();
        f.backend.state.kill(GUILD);

        let outcome = f.registry.chime(GUILD, slot(14), ClipIndex::for_hour(14)).await;
        assert_eq!(outcome, ChimeOutcome::SkippedDisconnected);
        assert!(!f.registry.get(GUILD).unwrap().is_playing);
    }

    #[tokio::test]
    async fn test_stop_interrupts_playback() {
        let f = fixture("stop-playing");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();
        f.registry.chime(GUILD, slot(14), ClipIndex::for_hour(14)).await;

        f.registry.stop(GUILD).await.unwrap();
        assert_eq!(f.backend.state.stops.load(Ordering::SeqCst), 1);
        assert!(f.registry.get(GUILD).is_none());

        // The late completion must land nowhere.
        f.backend.state.finish(GUILD, PlaybackEnd::Stopped);
        settle().await;
        assert!(f.registry.get(GUILD).is_none());
    }

    #[tokio::test]
    async fn test_disconnected_removes_session() {
        let f = fixture("disconnect");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();

        assert!(f.registry.disconnected(GUILD));
        settle().await;
        assert!(f.registry.get(GUILD).is_none());
        assert!(!f.registry.disconnected(GUILD));

        let outcome = f.registry.chime(GUILD, slot(14), ClipIndex::for_hour(14)).await;
        assert_eq!(outcome, ChimeOutcome::SessionGone);
        assert!(f.registry.start(GUILD, Some(CHANNEL)).await.is_ok());
    }

    #[tokio::test]
    async fn test_start_right_after_disconnect_reconnects() {
        let f = fixture("disconnect-restart");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();

        assert!(f.registry.disconnected(GUILD));
        assert!(f.registry.get(GUILD).is_none());
        assert!(f.registry.is_empty());

        let session = f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();
        assert_eq!(f.registry.get(GUILD), Some(session));
        assert_eq!(
            f.backend.state.calls.lock().as_slice(),
            &[("join", GUILD), ("leave", GUILD), ("join", GUILD)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_stops_leave_once() {
        let f = fixture("stop-race");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();

        let (a, b) = tokio::join!(f.registry.stop(GUILD), f.registry.stop(GUILD));
        assert!(a.is_ok() ^ b.is_ok());
        assert!(f.registry.get(GUILD).is_none());
        assert_eq!(f.backend.state.leaves.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_guilds_are_isolated() {
        let f = fixture("isolated");
        let other = GuildId(11);
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();
        f.registry.start(other, Some(ChannelId(21))).await.unwrap();
        f.registry.chime(GUILD, slot(14), ClipIndex::for_hour(14)).await;

        assert!(f.registry.get(GUILD).unwrap().is_playing);
        assert!(!f.registry.get(other).unwrap().is_playing);

        f.registry.stop(other).await.unwrap();
        assert!(f.registry.get(GUILD).is_some());
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let f = fixture("shutdown");
        f.registry.start(GUILD, Some(CHANNEL)).await.unwrap();
        f.registry.start(GuildId(11), Some(ChannelId(21))).await.unwrap();

        f.registry.shutdown().await;
        assert!(f.registry.is_empty());
        assert_eq!(f.backend.state.leaves.lock().len(), 2);
    }
}
