//! `backup-status show`: what consumers of the shared store currently see.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use backup_status_core::{Destination, Snapshot};
use backup_status_daemon::open_store;

use super::home_and_config;

/// Arguments for `backup-status show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ShowArgs {
    pub fn run(self) -> Result<()> {
        let (home, config) = home_and_config()?;
        let entry = open_store(&home, &config).load_entry();

        if self.json {
            let payload = match &entry {
                Some(entry) => json!({
                    "configured": true,
                    "saved_at": entry.saved_at,
                    "snapshot": entry.snapshot,
                }),
                None => json!({ "configured": false }),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize snapshot JSON")?
            );
            return Ok(());
        }

        match entry {
            Some(entry) => {
                println!(
                    "{} published {} ago",
                    "Backup status".bold(),
                    format_datetime_age(entry.saved_at)
                );
                print_snapshot(&entry.snapshot);
            }
            None => println!("{}", "not configured".yellow()),
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct DestinationRow {
    #[tabled(rename = "destination")]
    id: String,
    #[tabled(rename = "volume")]
    volume: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "last backup")]
    last_backup: String,
    #[tabled(rename = "result")]
    result: String,
    #[tabled(rename = "used")]
    used: String,
}

/// Render a snapshot as a table; the most recent destination is starred.
pub(crate) fn print_snapshot(snapshot: &Snapshot) {
    if snapshot.is_empty() {
        println!("No backup destinations configured.");
        return;
    }

    let last = snapshot.last_destination().map(|d| d.id.clone());
    let rows: Vec<DestinationRow> = snapshot
        .destinations
        .iter()
        .map(|dest| {
            let marker = if last.as_ref() == Some(&dest.id) { "* " } else { "" };
            DestinationRow {
                id: format!("{marker}{}", dest.id),
                volume: dest.volume_name.clone(),
                kind: destination_kind(dest),
                last_backup: dest
                    .last_snapshot()
                    .map(format_datetime_age)
                    .unwrap_or_else(|| "never".to_string()),
                result: result_label(dest),
                used: format!(
                    "{} / {} ({:.0}%)",
                    format_bytes(dest.bytes_used),
                    format_bytes(dest.capacity()),
                    dest.usage_fraction() * 100.0
                ),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn destination_kind(dest: &Destination) -> String {
    let medium = if dest.is_network { "network" } else { "local" };
    if dest.is_encrypted {
        format!("{medium}, encrypted")
    } else {
        medium.to_string()
    }
}

fn result_label(dest: &Destination) -> String {
    match dest.last_result {
        Some(result) if result.is_ok() => result.to_string().green().to_string(),
        Some(result) => result.to_string().red().to_string(),
        None => "-".to_string(),
    }
}

fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes.max(0))
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
