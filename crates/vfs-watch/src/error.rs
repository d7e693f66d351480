use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not watch: {path}")]
    Unwatchable { path: String },

    #[error("already watching {root}")]
    AlreadyWatching { root: String },

    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("failed to release {} watch(es): {}", .0.len(), summarize(.0))]
    Release(Vec<ReleaseFailure>),

    #[error("invalid PnP manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("invalid watch options: {0}")]
    Options(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A native handle that could not be released during `stop()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFailure {
    /// Physical path the handle was watching.
    pub path: String,
    pub reason: String,
}

fn summarize(failures: &[ReleaseFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.path, failure.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, WatchError>;
