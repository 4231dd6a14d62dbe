//! Refresh signal: a payload-free "reload now" broadcast to consumers.
//!
//! Consumers never receive data through the signal; they re-read the store
//! when it fires. [`FileRefreshSignal`] bumps a generation counter in
//! `<shared>/refresh.signal`, which other processes can watch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults::write_atomic;
use crate::error::{io_err, StoreError};

pub const SIGNAL_FILE: &str = "refresh.signal";

/// Anything that can tell consumers to reload.
pub trait RefreshSignal: Send + Sync {
    fn post(&self) -> Result<(), StoreError>;
}

/// Contents of the signal file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub generation: u64,
    pub posted_at: DateTime<Utc>,
}

/// File-backed refresh signal.
#[derive(Debug, Clone)]
pub struct FileRefreshSignal {
    path: PathBuf,
}

impl FileRefreshSignal {
    /// Signal file inside the shared namespace directory `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(SIGNAL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last posted record, or `None` if nothing was posted yet or the file
    /// is unreadable.
    pub fn current(&self) -> Option<SignalRecord> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

impl RefreshSignal for FileRefreshSignal {
    fn post(&self) -> Result<(), StoreError> {
        let generation = self.current().map(|r| r.generation + 1).unwrap_or(1);
        let record = SignalRecord {
            generation,
            posted_at: Utc::now(),
        };
        let json = serde_json::to_vec(&record)?;
        write_atomic(&self.path, &json).map_err(|err| match err {
            StoreError::Io { source, .. } => io_err(&self.path, source),
            other => other,
        })?;
        tracing::debug!("refresh signal generation {}", generation);
        Ok(())
    }
}

/// In-memory signal that only counts posts. Clones share the counter.
#[derive(Debug, Clone, Default)]
pub struct RecordingSignal {
    posts: Arc<AtomicUsize>,
}

impl RecordingSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }
}

impl RefreshSignal for RecordingSignal {
    fn post(&self) -> Result<(), StoreError> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
