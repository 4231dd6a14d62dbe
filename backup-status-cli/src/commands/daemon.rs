//! `backup-status daemon`: background monitor lifecycle.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value;

use backup_status_daemon::paths::socket_path;
use backup_status_daemon::{
    request_status, request_stop, request_update_access, start_blocking, DaemonError,
};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the monitor in the foreground (watcher + socket server).
    Start,
    /// Request graceful shutdown over the Unix socket.
    Stop,
    /// Query runtime status over the Unix socket.
    Status,
    /// Ask the running monitor to re-check its access grant.
    UpdateAccess,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::UpdateAccess => {
            notify_access_changed(&home)?;
        }
    }

    Ok(())
}

/// Tell a running daemon to re-query access. Not running is not an error:
/// the next `daemon start` reads the grant anyway.
pub(crate) fn notify_access_changed(home: &Path) -> Result<()> {
    match request_update_access(home) {
        Ok(monitor) => {
            let state = monitor
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            println!("daemon monitor state: {state}");
        }
        Err(DaemonError::DaemonNotRunning { .. }) => {
            println!("daemon is not running; the change applies on next start");
        }
        Err(err) => return Err(err).context("failed to update daemon access"),
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon status JSON")?
    );
    Ok(())
}
