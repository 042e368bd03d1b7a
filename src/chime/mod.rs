pub mod clip;
pub mod clock;
pub mod scheduler;

pub use clip::{ClipIndex, ClipLibrary};
#[cfg(test)]
pub(crate) use clock::testing;
pub use clock::{Clock, HostZone, HourSlot, MinuteSlot, SystemClock, Zone};
pub use scheduler::{HourlyScheduler, TickReport};
