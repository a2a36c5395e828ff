use std::path::{Path, PathBuf};

use thiserror::Error;

/// Top-level error type for the mailbox/delivery/handoff fabric.
#[derive(Error, Debug)]
pub enum CcccError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("pane driver failed to run tmux: {0}")]
    PaneDriver(String),

    #[error("lock contention on {0}")]
    LockContention(PathBuf),

    #[error("invalid mailbox state in {0}: {1}")]
    InvalidMailbox(PathBuf, String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CcccError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CcccError>;
