pub mod daemon;
pub mod grant;
pub mod parse;
pub mod show;

use std::path::PathBuf;

use anyhow::{Context, Result};

use backup_status_daemon::DaemonConfig;

/// Home directory plus the config loaded from it.
pub(crate) fn home_and_config() -> Result<(PathBuf, DaemonConfig)> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let config = DaemonConfig::load_at(&home).context("failed to load config")?;
    Ok((home, config))
}
