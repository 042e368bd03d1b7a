pub mod backend;
pub mod songbird;
#[cfg(test)]
pub(crate) mod testing;

pub use self::songbird::SongbirdBackend;
pub use backend::{Playback, PlaybackControl, PlaybackEnd, VoiceBackend, VoiceConnection};
