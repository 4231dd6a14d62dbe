//! Daemon configuration, read from `~/.backup-status/config.yaml`.
//!
//! Every field is optional; a missing file yields [`DaemonConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use backup_status_store::shared_dir_at;

use crate::error::{io_err, DaemonError};
use crate::paths::{config_path, DEFAULT_COOLDOWN, DEFAULT_PREFERENCES_PATH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// File suggested when granting access without an explicit path.
    pub preferences_path: PathBuf,
    /// Minimum interval between two accepted change events.
    pub cooldown_ms: u64,
    /// Drop the first raw notification after each watcher start.
    pub ignore_initial_event: bool,
    /// Override for the shared namespace directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_dir: Option<PathBuf>,
    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            preferences_path: PathBuf::from(DEFAULT_PREFERENCES_PATH),
            cooldown_ms: DEFAULT_COOLDOWN.as_millis() as u64,
            ignore_initial_event: true,
            shared_dir: None,
            json_logs: false,
        }
    }
}

impl DaemonConfig {
    /// Load `<home>/.backup-status/config.yaml`, falling back to defaults
    /// when the file does not exist.
    pub fn load_at(home: &Path) -> Result<Self, DaemonError> {
        let path = config_path(home);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(io_err(&path, err)),
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| DaemonError::Config { path, source })
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Shared namespace directory, honouring the override.
    pub fn shared_dir_at(&self, home: &Path) -> PathBuf {
        self.shared_dir
            .clone()
            .unwrap_or_else(|| shared_dir_at(home))
    }
}
