use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt, future::join_all};
use time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    chime::{
        ClipIndex, Clock, MinuteSlot,
        clock::{next_minute_boundary, resolve_slot},
    },
    common::types::GuildId,
    session::{ChimeOutcome, SessionRegistry},
};

/// Result of evaluating one minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub slot: MinuteSlot,
    /// Set when the minute was the top of an hour and was not a repeat.
    pub clip: Option<ClipIndex>,
    pub outcomes: Vec<(GuildId, ChimeOutcome)>,
}

impl TickReport {
    fn idle(slot: MinuteSlot) -> Self {
        Self {
            slot,
            clip: None,
            outcomes: Vec::new(),
        }
    }

    pub fn started(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_started()).count()
    }
}

/// Wakes on every minute boundary and chimes active sessions at `:00`.
pub struct HourlyScheduler {
    registry: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    tolerance: Duration,
    last_slot: Option<MinuteSlot>,
}

impl HourlyScheduler {
    pub fn new(registry: Arc<SessionRegistry>, clock: Arc<dyn Clock>, tolerance: Duration) -> Self {
        Self {
            registry,
            clock,
            tolerance,
            last_slot: None,
        }
    }

    /// Evaluates one minute. A minute already evaluated is ignored, so a
    /// timer that fires twice for the same boundary cannot chime twice.
    pub async fn tick_at(&mut self, slot: MinuteSlot) -> TickReport {
        if self.last_slot == Some(slot) {
            debug!("Minute {} already evaluated", slot);
            return TickReport::idle(slot);
        }
        self.last_slot = Some(slot);

        if !slot.is_top_of_hour() {
            return TickReport::idle(slot);
        }

        let clip = ClipIndex::for_hour(slot.hour);
        let guilds = self.registry.active_guilds();
        if guilds.is_empty() {
            debug!("Top of the hour {} with no active sessions", slot);
            return TickReport {
                slot,
                clip: Some(clip),
                outcomes: Vec::new(),
            };
        }

        let hour = slot.hour_slot();
        let registry = &self.registry;
        let outcomes = join_all(guilds.into_iter().map(|guild_id| async move {
            (guild_id, registry.chime(guild_id, hour, clip).await)
        }))
        .await;

        let report = TickReport {
            slot,
            clip: Some(clip),
            outcomes,
        };
        info!(
            "Chime {} (clip {}): started in {}/{} session(s)",
            slot,
            clip,
            report.started(),
            report.outcomes.len()
        );
        report
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Hourly scheduler started");
        loop {
            let now = self.clock.now();
            let target = next_minute_boundary(now);
            let wait = std::time::Duration::try_from(target - now).unwrap_or_default();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let slot = resolve_slot(target, self.clock.now(), self.tolerance);
            if slot != MinuteSlot::of(target) {
                warn!("Timer drifted: armed for {}, woke in {}", MinuteSlot::of(target), slot);
            }

            // A panicking tick must not end the loop.
            if AssertUnwindSafe(self.tick_at(slot))
                .catch_unwind()
                .await
                .is_err()
            {
                error!("Scheduler tick for {} panicked", slot);
            }
        }
        info!("Hourly scheduler stopped");
    }
}
