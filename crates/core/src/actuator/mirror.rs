use crate::emotion::{Mood, UnsupportedMood};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const LOG_TARGET: &str = "actuator::mirror";

#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    #[error("mood file io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] UnsupportedMood),
}

pub fn read_mood(path: &Path) -> Result<Mood, MirrorError> {
    let text = std::fs::read_to_string(path)?;
    Ok(text.parse()?)
}

fn write_atomic(path: &Path, mood: Mood) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, mood.as_str())?;
    std::fs::rename(&tmp, path)
}

/// The actuator's current mood, kept in memory and mirrored to a file other
/// processes can read. All writes go through here.
#[derive(Debug)]
pub struct MoodMirror {
    path: PathBuf,
    current: Mutex<Mood>,
}

impl MoodMirror {
    /// Creates the file (and its directory) holding `neutral`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, MirrorError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&path, Mood::Neutral)?;
        tracing::debug!(target: LOG_TARGET, path = %path.display(), "mood file created");
        Ok(Self {
            path,
            current: Mutex::new(Mood::Neutral),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Mood {
        *self.lock()
    }

    /// Writes `mood` through to the file. Returns `false` without touching the
    /// file when it already holds that value.
    pub fn set(&self, mood: Mood) -> Result<bool, MirrorError> {
        Ok(self.replace_if_different(mood)?.is_some())
    }

    /// Compare-and-write under one lock: returns the previous mood when the
    /// value changed, `None` when `mood` was already current.
    pub fn replace_if_different(&self, mood: Mood) -> Result<Option<Mood>, MirrorError> {
        let mut current = self.lock();
        if *current == mood {
            return Ok(None);
        }
        write_atomic(&self.path, mood)?;
        tracing::debug!(target: LOG_TARGET, from = %*current, to = %mood, "mood mirrored");
        let previous = std::mem::replace(&mut *current, mood);
        Ok(Some(previous))
    }

    fn lock(&self) -> MutexGuard<'_, Mood> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for MoodMirror {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(target: LOG_TARGET, path = %self.path.display(), "mood file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(target: LOG_TARGET, error = %e, "failed to remove mood file"),
        }
    }
}
