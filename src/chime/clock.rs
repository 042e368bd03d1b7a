use std::sync::Arc;

use chrono::{Local, TimeZone};
use time::{Date, Duration, OffsetDateTime, UtcOffset};

/// Source of wall-clock time for the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Maps an instant to the UTC offset in force at that instant.
pub trait Zone: Send + Sync {
    fn offset_at(&self, utc: OffsetDateTime) -> UtcOffset;
}

impl Zone for UtcOffset {
    fn offset_at(&self, _utc: OffsetDateTime) -> UtcOffset {
        *self
    }
}

/// The host's time zone, daylight saving included.
#[derive(Debug, Clone, Copy)]
pub struct HostZone;

impl Zone for HostZone {
    fn offset_at(&self, utc: OffsetDateTime) -> UtcOffset {
        let seconds = chrono::DateTime::from_timestamp(utc.unix_timestamp(), 0)
            .map(|at| Local.offset_from_utc_datetime(&at.naive_utc()).local_minus_utc())
            .unwrap_or(0);
        UtcOffset::from_whole_seconds(seconds).unwrap_or(UtcOffset::UTC)
    }
}

/// Wall clock that looks the offset up again on every reading, so a
/// daylight saving change moves the local hour without a restart.
#[derive(Clone)]
pub struct SystemClock {
    zone: Arc<dyn Zone>,
}

impl SystemClock {
    pub fn new(zone: impl Zone + 'static) -> Self {
        Self {
            zone: Arc::new(zone),
        }
    }

    /// A configured fixed offset wins over the host's time zone.
    pub fn detect(configured: Option<UtcOffset>) -> Self {
        match configured {
            Some(offset) => Self::new(offset),
            None => Self::new(HostZone),
        }
    }

    /// Local time at the instant `utc`.
    pub fn localize(&self, utc: OffsetDateTime) -> OffsetDateTime {
        utc.to_offset(self.zone.offset_at(utc))
    }

    /// The offset in force right now.
    pub fn offset(&self) -> UtcOffset {
        self.now().offset()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        self.localize(OffsetDateTime::now_utc())
    }
}

/// One calendar hour; at most one chime per session per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HourSlot {
    pub date: Date,
    pub hour: u8,
}

impl std::fmt::Display for HourSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:02}:00", self.date, self.hour)
    }
}

/// One calendar minute; the scheduler evaluates each at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MinuteSlot {
    pub date: Date,
    pub hour: u8,
    pub minute: u8,
}

impl MinuteSlot {
    pub fn of(at: OffsetDateTime) -> Self {
        Self {
            date: at.date(),
            hour: at.hour(),
            minute: at.minute(),
        }
    }

    pub fn is_top_of_hour(&self) -> bool {
        self.minute == 0
    }

    pub fn hour_slot(&self) -> HourSlot {
        HourSlot {
            date: self.date,
            hour: self.hour,
        }
    }
}

impl std::fmt::Display for MinuteSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:02}:{:02}", self.date, self.hour, self.minute)
    }
}

/// The first whole minute strictly after `now`.
pub fn next_minute_boundary(now: OffsetDateTime) -> OffsetDateTime {
    let truncated = now
        .replace_second(0)
        .and_then(|t| t.replace_nanosecond(0))
        .unwrap_or(now);
    truncated + Duration::minutes(1)
}

/// Decides which minute a wakeup belongs to.
///
/// Timers fire a little early or late; a wakeup within `tolerance` of the
/// boundary it was armed for counts as that boundary's minute.
pub fn resolve_slot(
    target: OffsetDateTime,
    observed: OffsetDateTime,
    tolerance: Duration,
) -> MinuteSlot {
    if (observed - target).abs() <= tolerance {
        MinuteSlot::of(target)
    } else {
        MinuteSlot::of(observed)
    }
}
