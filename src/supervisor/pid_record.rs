use crate::error::{Result, SupervisorError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_PID_FILE: &str = "/tmp/pgadmin4.pid";

/// Plain-text file holding the pid of the current managed process.
///
/// Only the supervisor writes it; health probes read it.
#[derive(Debug, Clone)]
pub struct PidRecord {
    path: PathBuf,
}

impl PidRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the recorded pid. Written through a sibling file and renamed
    /// so readers never see a partial write.
    pub fn write(&self, pid: u32) -> Result<()> {
        let staging = self.path.with_extension("pid.tmp");
        fs::write(&staging, format!("{}\n", pid))
            .and_then(|_| fs::rename(&staging, &self.path))
            .map_err(|source| SupervisorError::PidRecord {
                path: self.path.clone(),
                source,
            })?;
        debug!(pid, path = %self.path.display(), "pid record updated");
        Ok(())
    }

    /// The recorded pid, `None` if the file is missing or does not hold one.
    pub fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse::<u32>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_overwrites_previous_pid() {
        let dir = TempDir::new().unwrap();
        let record = PidRecord::new(dir.path().join("pgadmin4.pid"));
        assert_eq!(record.read(), None);

        record.write(4821).unwrap();
        assert_eq!(record.read(), Some(4821));
        assert_eq!(fs::read_to_string(record.path()).unwrap(), "4821\n");

        record.write(5102).unwrap();
        assert_eq!(record.read(), Some(5102));
    }

    #[test]
    fn garbled_record_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let record = PidRecord::new(dir.path().join("pgadmin4.pid"));
        fs::write(record.path(), "not-a-pid").unwrap();
        assert_eq!(record.read(), None);
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let dir = TempDir::new().unwrap();
        let record = PidRecord::new(dir.path().join("missing").join("pgadmin4.pid"));
        assert!(matches!(
            record.write(1),
            Err(SupervisorError::PidRecord { .. })
        ));
    }
}
