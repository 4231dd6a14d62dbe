//! Error types for backup-status-core.

use std::path::PathBuf;

use thiserror::Error;

/// Failures to obtain read access to the preferences file.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The OS refused to open the file for reading.
    #[error("read access denied for {path}")]
    Denied { path: PathBuf },

    /// The file was deleted or moved away from the granted location.
    #[error("preferences file missing at {path}")]
    Missing { path: PathBuf },

    /// The granted location exists but is not a regular file.
    #[error("not a regular file: {path}")]
    NotAFile { path: PathBuf },

    /// No access token has been granted yet.
    #[error("no access token has been granted")]
    NoToken,

    /// A persisted token could not be resolved.
    #[error("access token could not be resolved: {reason}")]
    BrokenToken { reason: String },
}

/// All errors that abort a parse. Field-level problems never surface here.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Structurally invalid document or missing mandatory array.
    #[error("invalid preferences document at {path}: {reason}")]
    Format { path: PathBuf, reason: String },
}

impl ParseError {
    /// Short label for logs and status payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::Access(_) => "access",
            ParseError::Io { .. } => "io",
            ParseError::Format { .. } => "format",
        }
    }
}

pub(crate) fn format_err(path: impl Into<PathBuf>, reason: impl Into<String>) -> ParseError {
    ParseError::Format {
        path: path.into(),
        reason: reason.into(),
    }
}
