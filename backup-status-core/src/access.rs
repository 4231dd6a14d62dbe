//! Scoped read access to the watched file.
//!
//! Access is modelled as an opaque [`Token`] handed out by an
//! [`AccessProvider`]. Reading requires an [`AccessScope`], a guard that is
//! released when dropped so every exit path gives the access back.
//!
//! [`FileAccessProvider`] is the plain-permission implementation used on
//! platforms without sandboxing: the token records the canonical path and
//! access is granted whenever the OS lets us open the file.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AccessError;

/// Opaque, serializable capability granting read access to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    path: PathBuf,
    granted_at: DateTime<Utc>,
}

impl Token {
    /// Build a token for `path`. Intended for [`AccessProvider`] implementations.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            granted_at: Utc::now(),
        }
    }

    /// The location this token was granted for.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn granted_at(&self) -> DateTime<Utc> {
        self.granted_at
    }
}

/// Source of read permission for the watched file.
pub trait AccessProvider: Send + Sync {
    /// Create a durable token for `path`.
    fn create_token(&self, path: &Path) -> Result<Token, AccessError>;

    /// Resolve a previously created token back to a readable location.
    fn resolve(&self, token: &Token) -> Result<PathBuf, AccessError>;

    /// Whether `token` still resolves.
    fn is_valid(&self, token: &Token) -> bool {
        self.resolve(token).is_ok()
    }

    /// Start reading `path`. Paired with [`AccessProvider::end_access`].
    fn begin_access(&self, path: &Path) -> Result<(), AccessError>;

    /// Stop reading `path`.
    fn end_access(&self, path: &Path);
}

/// Guard for an open access window. Dropping it releases the access.
pub struct AccessScope<'a> {
    provider: &'a dyn AccessProvider,
    path: PathBuf,
}

impl<'a> AccessScope<'a> {
    /// Begin access to `path`; fails when the provider denies it.
    pub fn acquire(provider: &'a dyn AccessProvider, path: &Path) -> Result<Self, AccessError> {
        provider.begin_access(path)?;
        Ok(Self {
            provider,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AccessScope<'_> {
    fn drop(&mut self) {
        self.provider.end_access(&self.path);
    }
}

/// Access governed purely by filesystem permissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileAccessProvider;

impl FileAccessProvider {
    pub fn new() -> Self {
        Self
    }
}

impl AccessProvider for FileAccessProvider {
    fn create_token(&self, path: &Path) -> Result<Token, AccessError> {
        check_readable(path)?;
        let canonical = std::fs::canonicalize(path).map_err(|e| classify(path, e))?;
        Ok(Token::new(canonical))
    }

    fn resolve(&self, token: &Token) -> Result<PathBuf, AccessError> {
        if token.path.as_os_str().is_empty() {
            return Err(AccessError::BrokenToken {
                reason: "token has no path".to_string(),
            });
        }
        let meta = std::fs::metadata(&token.path).map_err(|e| classify(&token.path, e))?;
        if !meta.is_file() {
            return Err(AccessError::NotAFile {
                path: token.path.clone(),
            });
        }
        Ok(token.path.clone())
    }

    fn begin_access(&self, path: &Path) -> Result<(), AccessError> {
        check_readable(path)?;
        tracing::trace!(path = %path.display(), "began file access");
        Ok(())
    }

    fn end_access(&self, path: &Path) {
        tracing::trace!(path = %path.display(), "ended file access");
    }
}

fn check_readable(path: &Path) -> Result<(), AccessError> {
    let meta = std::fs::metadata(path).map_err(|e| classify(path, e))?;
    if !meta.is_file() {
        return Err(AccessError::NotAFile {
            path: path.to_path_buf(),
        });
    }
    File::open(path).map(|_| ()).map_err(|e| classify(path, e))
}

fn classify(path: &Path, err: std::io::Error) -> AccessError {
    match err.kind() {
        ErrorKind::NotFound => AccessError::Missing {
            path: path.to_path_buf(),
        },
        _ => AccessError::Denied {
            path: path.to_path_buf(),
        },
    }
}
