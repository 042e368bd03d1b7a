use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    chime::{ClipIndex, ClipLibrary, HourSlot},
    common::{errors::SessionError, types::GuildId},
    session::{
        registry::SessionSlot,
        types::{ChimeOutcome, SessionSnapshot},
    },
    voice::{Playback, PlaybackControl, PlaybackEnd, VoiceConnection},
};

/// Messages serialized through a session's actor. Every mutation of a
/// session's state happens while handling one of these.
pub(crate) enum SessionCommand {
    Chime {
        slot: HourSlot,
        clip: ClipIndex,
        reply: oneshot::Sender<ChimeOutcome>,
    },
    PlaybackEnded {
        generation: u64,
        end: PlaybackEnd,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Disconnected,
}

/// What the registry keeps for a live session.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    pub(crate) tx: mpsc::UnboundedSender<SessionCommand>,
    pub(crate) state: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }
}

struct ActivePlayback {
    generation: u64,
    control: Box<dyn PlaybackControl>,
}

pub(crate) struct SessionActor {
    connection: Box<dyn VoiceConnection>,
    clips: Arc<ClipLibrary>,
    sessions: Arc<DashMap<GuildId, SessionSlot>>,
    state: watch::Sender<SessionSnapshot>,
    self_tx: mpsc::WeakUnboundedSender<SessionCommand>,
    current: Option<ActivePlayback>,
    generation: u64,
}

impl SessionActor {
    /// Spawns the actor for a freshly joined connection.
    pub(crate) fn spawn(
        snapshot: SessionSnapshot,
        connection: Box<dyn VoiceConnection>,
        clips: Arc<ClipLibrary>,
        sessions: Arc<DashMap<GuildId, SessionSlot>>,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(snapshot.clone());

        let actor = Self {
            connection,
            clips,
            sessions,
            state: state_tx,
            self_tx: tx.downgrade(),
            current: None,
            generation: 0,
        };

        let span = info_span!("session", guild = %snapshot.guild_id, id = %snapshot.id);
        tokio::spawn(actor.run(rx).instrument(span));

        SessionHandle {
            tx,
            state: state_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                SessionCommand::Chime { slot, clip, reply } => {
                    let outcome = self.chime(slot, clip).await;
                    let _ = reply.send(outcome);
                }
                SessionCommand::PlaybackEnded { generation, end } => {
                    self.playback_ended(generation, end);
                }
                SessionCommand::Stop { reply } => {
                    self.teardown().await;
                    info!("Session stopped");
                    let _ = reply.send(());
                    return;
                }
                SessionCommand::Disconnected => {
                    self.teardown().await;
                    warn!("Session closed after the voice connection was dropped");
                    return;
                }
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    fn set_playing(&self, is_playing: bool) {
        self.state.send_modify(|s| s.is_playing = is_playing);
    }

    async fn chime(&mut self, slot: HourSlot, clip: ClipIndex) -> ChimeOutcome {
        if self.current.is_some() {
            debug!("Skipping chime for {}: still playing", slot);
            return ChimeOutcome::SkippedPlaying;
        }
        if self.snapshot().last_chime == Some(slot) {
            debug!("Skipping chime for {}: already chimed", slot);
            return ChimeOutcome::SkippedAlreadyChimed;
        }
        if !self.connection.is_alive().await {
            warn!("Skipping chime for {}: voice connection is gone", slot);
            return ChimeOutcome::SkippedDisconnected;
        }

        self.state.send_modify(|s| {
            s.is_playing = true;
            s.last_chime = Some(slot);
        });

        match self.start_playback(clip).await {
            Ok(playback) => {
                self.generation += 1;
                let generation = self.generation;
                self.current = Some(ActivePlayback {
                    generation,
                    control: playback.control,
                });
                self.watch_playback(generation, playback.ended);
                info!("Chiming {} with clip {}", slot, clip);
                ChimeOutcome::Started(clip)
            }
            Err(e) => {
                self.set_playing(false);
                error!("Chime for {} failed: {}", slot, e);
                ChimeOutcome::Failed(e.to_string())
            }
        }
    }

    async fn start_playback(&self, clip: ClipIndex) -> Result<Playback, SessionError> {
        let path = self.clips.resolve(clip)?;
        Ok(self.connection.play(&path).await?)
    }

    /// Waits for the end signal off the actor so other commands keep flowing.
    fn watch_playback(&self, generation: u64, ended: oneshot::Receiver<PlaybackEnd>) {
        let self_tx = self.self_tx.clone();
        tokio::spawn(
            async move {
                let end = Playback::wait(ended).await;
                // The session may be gone by now; nothing to clear then.
                if let Some(tx) = self_tx.upgrade() {
                    let _ = tx.send(SessionCommand::PlaybackEnded { generation, end });
                }
            }
            .in_current_span(),
        );
    }

    fn playback_ended(&mut self, generation: u64, end: PlaybackEnd) {
        match &self.current {
            Some(active) if active.generation == generation => {}
            _ => {
                debug!("Ignoring end of stale playback {}", generation);
                return;
            }
        }

        self.current = None;
        self.set_playing(false);
        match end {
            PlaybackEnd::Finished => debug!("Chime finished"),
            PlaybackEnd::Stopped => debug!("Chime stopped"),
            PlaybackEnd::Errored(e) => error!("Chime playback failed: {}", e),
        }
    }

    /// Stops playback, releases the connection and drops the registry entry.
    async fn teardown(&mut self) {
        if let Some(active) = self.current.take() {
            active.control.stop();
        }
        self.set_playing(false);

        if let Err(e) = self.connection.leave().await {
            warn!("Leaving the voice channel failed: {}", e);
        }

        let snapshot = self.snapshot();
        self.sessions.remove_if(&snapshot.guild_id, |_, slot| {
            slot.session_id() == Some(snapshot.id)
        });
    }
}
