use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Conditions that end the supervisor. Anything recoverable inside a tick
/// is logged instead of being returned as one of these.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("setup command `{command}` exited with {code:?}")]
    Setup { command: String, code: Option<i32> },

    #[error("failed to write pid record {path}: {source}")]
    PidRecord {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("service command is empty")]
    EmptyCommand,

    #[error("managed process died {restarts} times, giving up")]
    RestartLimit { restarts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
