use std::path::PathBuf;

use thiserror::Error;

use backup_status_core::{AccessError, ParseError};

/// Error surface for the watcher, orchestrator, daemon runtime and protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("store error: {0}")]
    Store(#[from] backup_status_store::StoreError),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    /// The chosen file is not a readable backup preferences document.
    #[error("incorrect file {path}: {source}")]
    IncorrectFile {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("failed to parse config at {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("cannot watch {path}: {reason}")]
    Watch { path: PathBuf, reason: String },

    /// A runtime task failed outside its own error handling.
    #[error("daemon task {task} failed: {reason}")]
    Task { task: &'static str, reason: String },

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
