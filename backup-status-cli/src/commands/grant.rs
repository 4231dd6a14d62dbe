//! `backup-status grant` / `revoke`: manage the persisted access token.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use backup_status_daemon::{open_gate, DaemonError};

use super::daemon::notify_access_changed;
use super::home_and_config;

/// Arguments for `backup-status grant`.
#[derive(Args, Debug)]
pub struct GrantArgs {
    /// Preferences file to grant access to (defaults to `preferences_path`
    /// from the config).
    pub path: Option<PathBuf>,
}

impl GrantArgs {
    pub fn run(self) -> Result<()> {
        let (home, config) = home_and_config()?;
        let path = self.path.unwrap_or_else(|| config.preferences_path.clone());

        let token = match open_gate(&home, &config).grant(&path) {
            Ok(token) => token,
            Err(DaemonError::IncorrectFile { path, source }) => {
                anyhow::bail!(
                    "incorrect file {}: not a backup preferences file ({source})",
                    path.display()
                );
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to grant {}", path.display()))
            }
        };

        println!(
            "{} access granted to {}",
            "✓".green().bold(),
            token.path().display()
        );
        notify_access_changed(&home)
    }
}

pub fn revoke() -> Result<()> {
    let (home, config) = home_and_config()?;
    let removed = open_gate(&home, &config)
        .revoke()
        .context("failed to revoke access")?;
    if removed {
        println!("access revoked");
    } else {
        println!("no access grant stored");
    }
    notify_access_changed(&home)
}
