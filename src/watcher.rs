//! Modification-time polling of the watched configuration artifact.

use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// The last artifact modification time the supervisor acted on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkStore {
    watermark: Option<SystemTime>,
}

impl WatermarkStore {
    /// A store that has never observed the artifact.
    pub fn new() -> Self {
        Self { watermark: None }
    }

    pub fn get(&self) -> Option<SystemTime> {
        self.watermark
    }

    /// Moves the watermark forward. Older timestamps are ignored so the
    /// watermark never goes backwards.
    pub fn advance(&mut self, observed: SystemTime) {
        match self.watermark {
            Some(current) if current >= observed => {}
            _ => self.watermark = Some(observed),
        }
    }
}

/// Result of one poll of the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub changed: bool,
    /// Modification time seen by this poll, `None` when the artifact is absent.
    pub observed: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    artifact: PathBuf,
}

impl ConfigWatcher {
    pub fn new(artifact: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
        }
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Compares the artifact's mtime with `watermark`. Never mutates state.
    pub async fn poll(&self, watermark: &WatermarkStore) -> Poll {
        let observed = artifact_mtime(&self.artifact).await;
        let changed = match (observed, watermark.get()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(mtime), Some(mark)) => mtime > mark,
        };
        if changed {
            debug!(artifact = %self.artifact.display(), "artifact is newer than the watermark");
        }
        Poll { changed, observed }
    }
}

/// Modification time of `path`, `None` if it does not exist or cannot be read.
pub async fn artifact_mtime(path: &Path) -> Option<SystemTime> {
    match tokio::fs::metadata(path).await.and_then(|meta| meta.modified()) {
        Ok(mtime) => Some(mtime),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!(artifact = %path.display(), error = %e, "unable to read artifact mtime");
            None
        }
    }
}

/// Human-readable local time for log lines.
pub fn format_mtime(mtime: SystemTime) -> String {
    let dt: DateTime<Local> = mtime.into();
    dt.format("%Y-%m-%d %H:%M:%S%.f %z").to_string()
}
