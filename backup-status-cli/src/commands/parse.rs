//! `backup-status parse`: one-shot parse of a preferences file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use backup_status_core::{parse, FileAccessProvider};

use super::show::print_snapshot;

/// Arguments for `backup-status parse`.
#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Preferences file to read.
    pub path: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ParseArgs {
    pub fn run(self) -> Result<()> {
        let snapshot = parse(&self.path, &FileAccessProvider::new())
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).context("failed to serialize snapshot JSON")?
            );
            return Ok(());
        }

        println!(
            "{} destination(s) in {}",
            snapshot.destinations.len(),
            self.path.display()
        );
        print_snapshot(&snapshot);
        Ok(())
    }
}
