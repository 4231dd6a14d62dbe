//! Domain types for parsed backup preferences.
//!
//! A [`Snapshot`] is the immutable result of one successful parse. It is never
//! patched in place; every parse produces a fresh value that replaces the
//! previous one wholesale. All types are serializable via serde so the store
//! can hand them to other processes.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque, stable identifier of a backup destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DestinationId(pub String);

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DestinationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DestinationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Outcome of the most recent backup attempt to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "code")]
pub enum BackupResult {
    Ok,
    Failed(i64),
}

impl BackupResult {
    /// Map the raw result code; `0` is success, anything else a failure.
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            BackupResult::Ok
        } else {
            BackupResult::Failed(code)
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, BackupResult::Ok)
    }
}

impl fmt::Display for BackupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupResult::Ok => write!(f, "ok"),
            BackupResult::Failed(code) => write!(f, "failed ({code})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One backup target volume and its metadata.
///
/// Every field has a zero value; the parser substitutes it whenever the
/// source field is missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Destination {
    pub id: DestinationId,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub is_network: bool,
    #[serde(default)]
    pub bytes_available: i64,
    #[serde(default)]
    pub bytes_used: i64,
    #[serde(default)]
    pub volume_name: String,
    #[serde(default)]
    pub snapshots: BTreeSet<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: BTreeSet<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<BackupResult>,
}

impl Destination {
    /// Newest snapshot timestamp, if any snapshot exists.
    pub fn last_snapshot(&self) -> Option<DateTime<Utc>> {
        self.snapshots.last().copied()
    }

    /// Newest attempt timestamp, if any attempt was recorded.
    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.attempts.last().copied()
    }

    /// Total size of the volume as seen by the backup system.
    pub fn capacity(&self) -> i64 {
        self.bytes_used.saturating_add(self.bytes_available)
    }

    /// Fraction of the capacity in use, `0.0` when the capacity is unknown.
    pub fn usage_fraction(&self) -> f64 {
        let capacity = self.capacity();
        if capacity <= 0 {
            return 0.0;
        }
        self.bytes_used as f64 / capacity as f64
    }
}

/// Immutable parsed result of one read of the preferences file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    /// Destinations in source document order; ids are unique.
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_destination_id: Option<DestinationId>,
}

impl Snapshot {
    /// Look up a destination by id.
    pub fn destination(&self, id: &DestinationId) -> Option<&Destination> {
        self.destinations.iter().find(|d| &d.id == id)
    }

    /// The destination the most recent backup went to.
    pub fn last_destination(&self) -> Option<&Destination> {
        self.last_destination_id
            .as_ref()
            .and_then(|id| self.destination(id))
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
