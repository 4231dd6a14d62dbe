//! Shared defaults: a cross-process key-value namespace on disk.
//!
//! Each key is one JSON document at `<dir>/<key>.json`. Writes use the
//! `.tmp` + rename pattern so readers in other processes only ever observe
//! a complete value.
//!
//! ```text
//! ~/.backup-status/
//!   shared/
//!     preferences.json
//!     access_token.json
//!     refresh.signal
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, StoreError};

/// Directory name of the namespace under the app root.
pub const SUITE_DIR: &str = "shared";

/// `<home>/.backup-status/shared`; pure, no I/O.
pub fn shared_dir_at(home: &Path) -> PathBuf {
    home.join(".backup-status").join(SUITE_DIR)
}

/// Handle to a shared namespace directory.
#[derive(Debug, Clone)]
pub struct SharedDefaults {
    dir: PathBuf,
}

impl SharedDefaults {
    /// Open the namespace rooted at `dir`. The directory is created lazily.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Open the namespace under `<home>/.backup-status/shared`.
    pub fn open_at(home: &Path) -> Self {
        Self::open(shared_dir_at(home))
    }

    /// `open_at` convenience wrapper using `dirs::home_dir()`.
    pub fn open_default() -> Result<Self, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeNotFound)?;
        Ok(Self::open_at(&home))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<key>.json`
    pub fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_path(key).map(|p| p.exists()).unwrap_or(false)
    }

    /// Read and decode `key`. Returns `Ok(None)` when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let path = self.key_path(key)?;
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&path, err)),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Encode and store `value` under `key` atomically.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        let json = serde_json::to_string_pretty(value)?;
        write_atomic(&path, json.as_bytes())
    }

    /// Remove `key`. Returns whether a value was present.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.key_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(&path, err)),
        }
    }
}

/// Write `bytes` to `<path>.tmp` then rename onto `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("shared store path has no parent"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
