//! Error types for backup-status-store.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from shared-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("shared store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Keys map to file names and must stay within `[A-Za-z0-9._-]`.
    #[error("invalid shared store key '{0}'")]
    InvalidKey(String),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
