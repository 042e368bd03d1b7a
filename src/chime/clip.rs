use std::path::{Path, PathBuf};

use crate::common::errors::VoiceError;

/// Number of clips in a full day's cycle.
pub const CLIPS_PER_DAY: u8 = 24;

/// Identifies one of the 24 clip files (`1..=24`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClipIndex(u8);

impl ClipIndex {
    /// Maps a wall-clock hour to its clip. Midnight is the last chime of the
    /// cycle, so hour 0 plays clip 24.
    pub fn for_hour(hour: u8) -> Self {
        match hour % CLIPS_PER_DAY {
            0 => Self(CLIPS_PER_DAY),
            h => Self(h),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (1..=CLIPS_PER_DAY).map(Self)
    }
}

impl std::fmt::Display for ClipIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolves clip indexes to files on disk.
#[derive(Debug, Clone)]
pub struct ClipLibrary {
    dir: PathBuf,
    extension: String,
}

impl ClipLibrary {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension: String = extension.into();
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, clip: ClipIndex) -> PathBuf {
        self.dir.join(format!("{}.{}", clip.get(), self.extension))
    }

    /// Returns the clip path, failing when the file is absent.
    pub fn resolve(&self, clip: ClipIndex) -> Result<PathBuf, VoiceError> {
        let path = self.path_for(clip);
        if path.is_file() {
            Ok(path)
        } else {
            Err(VoiceError::MissingFile(path.display().to_string()))
        }
    }

    /// Clips whose files are absent.
    pub fn missing(&self) -> Vec<ClipIndex> {
        ClipIndex::all()
            .filter(|clip| !self.path_for(*clip).is_file())
            .collect()
    }
}
