//! Preferences store: the latest [`Snapshot`] published for consumers.
//!
//! ## `save` protocol
//!
//! 1. Serialize the snapshot and SHA-256 hash it.
//! 2. Compare with the digest of the stored entry → skip if identical.
//! 3. Write the entry atomically under [`PREFERENCES_KEY`].
//! 4. Post the refresh signal.
//!
//! Any failure in steps 1–3 clears the key instead, so a stale or partial
//! value never outlives a failed save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use backup_status_core::Snapshot;

use crate::defaults::SharedDefaults;
use crate::error::StoreError;
use crate::signal::RefreshSignal;

/// The single well-known key holding the published snapshot.
pub const PREFERENCES_KEY: &str = "preferences";

/// Schema version of [`StoredPreferences`].
pub const SCHEMA_VERSION: u32 = 1;

/// On-disk entry under [`PREFERENCES_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPreferences {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub digest: String,
    pub snapshot: Snapshot,
}

/// Outcome of [`PreferencesStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The entry was written and consumers were signalled.
    Written,
    /// The stored entry already holds an identical snapshot.
    Unchanged,
}

/// Single-writer store for the published snapshot.
pub struct PreferencesStore {
    defaults: SharedDefaults,
    signal: Box<dyn RefreshSignal>,
}

impl PreferencesStore {
    pub fn new(defaults: SharedDefaults, signal: Box<dyn RefreshSignal>) -> Self {
        Self { defaults, signal }
    }

    pub fn defaults(&self) -> &SharedDefaults {
        &self.defaults
    }

    /// Publish `snapshot`. A snapshot whose digest matches the stored one is
    /// not rewritten and posts no refresh signal. On failure the key is
    /// cleared before returning the error.
    pub fn save(&self, snapshot: &Snapshot) -> Result<SaveOutcome, StoreError> {
        match self.try_save(snapshot) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::warn!("saving preferences failed, clearing store: {}", err);
                if let Err(clear_err) = self.clear() {
                    tracing::error!("clearing preferences after failed save: {}", clear_err);
                }
                Err(err)
            }
        }
    }

    fn try_save(&self, snapshot: &Snapshot) -> Result<SaveOutcome, StoreError> {
        let digest = snapshot_digest(snapshot)?;

        if let Some(stored) = self.load_entry() {
            if stored.version == SCHEMA_VERSION && stored.digest == digest {
                tracing::debug!("preferences unchanged ({})", digest);
                return Ok(SaveOutcome::Unchanged);
            }
        }

        let entry = StoredPreferences {
            version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            digest,
            snapshot: snapshot.clone(),
        };
        self.defaults.set(PREFERENCES_KEY, &entry)?;
        tracing::info!(
            "published preferences with {} destination(s)",
            snapshot.destinations.len()
        );
        self.notify();
        Ok(SaveOutcome::Written)
    }

    /// Remove the published snapshot and signal consumers.
    pub fn clear(&self) -> Result<(), StoreError> {
        let removed = self.defaults.remove(PREFERENCES_KEY)?;
        if removed {
            tracing::info!("cleared published preferences");
        }
        self.notify();
        Ok(())
    }

    /// Best-effort read of the published snapshot; `None` means "not configured".
    pub fn load(&self) -> Option<Snapshot> {
        self.load_entry().map(|entry| entry.snapshot)
    }

    /// Best-effort read of the full stored entry.
    pub fn load_entry(&self) -> Option<StoredPreferences> {
        match self.defaults.get::<StoredPreferences>(PREFERENCES_KEY) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!("ignoring unreadable preferences entry: {}", err);
                None
            }
        }
    }

    fn notify(&self) {
        if let Err(err) = self.signal.post() {
            tracing::warn!("posting refresh signal failed: {}", err);
        }
    }
}

fn snapshot_digest(snapshot: &Snapshot) -> Result<String, StoreError> {
    let bytes = serde_json::to_vec(snapshot)?;
    let mut h = Sha256::new();
    h.update(&bytes);
    Ok(hex::encode(h.finalize()))
}
