use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::{Duration, UtcOffset, macros::format_description};

use crate::common::types::AnyResult;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChimeConfig {
    /// Directory holding `1.<ext>` through `24.<ext>`.
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Fixed offset such as `+09:00`. When unset the host time zone is used,
    /// daylight saving included.
    #[serde(default)]
    pub utc_offset: Option<String>,
    /// How far a wakeup may drift from the minute boundary and still count
    /// as that minute.
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: u64,
}

impl ChimeConfig {
    /// Parses `utc_offset`, if configured.
    pub fn offset(&self) -> AnyResult<Option<UtcOffset>> {
        let Some(raw) = self.utc_offset.as_deref() else {
            return Ok(None);
        };
        let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
        UtcOffset::parse(raw.trim(), &format)
            .map(Some)
            .map_err(|e| format!("invalid chime.utc_offset '{}': {}", raw, e).into())
    }

    /// Drift tolerance; must stay under a minute or a wakeup could be
    /// counted as a minute it is not in.
    pub fn tolerance(&self) -> AnyResult<Duration> {
        match i64::try_from(self.tolerance_secs) {
            Ok(secs) if secs < 60 => Ok(Duration::seconds(secs)),
            _ => Err(format!(
                "chime.tolerance_secs must be below 60, got {}",
                self.tolerance_secs
            )
            .into()),
        }
    }
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
            extension: default_extension(),
            utc_offset: None,
            tolerance_secs: default_tolerance_secs(),
        }
    }
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("audio")
}

fn default_extension() -> String {
    "wav".to_string()
}

fn default_tolerance_secs() -> u64 {
    30
}
