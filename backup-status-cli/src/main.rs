//! backup-status: watch the backup preferences file and publish a snapshot
//! of every destination to the shared store.
//!
//! # Usage
//!
//! ```text
//! backup-status grant [<path>]
//! backup-status revoke
//! backup-status show [--json]
//! backup-status parse <path> [--json]
//! backup-status daemon start|stop|status|update-access
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, grant::GrantArgs, parse::ParseArgs, show::ShowArgs};

#[derive(Parser, Debug)]
#[command(
    name = "backup-status",
    version,
    about = "Publish backup destination status from the preferences file",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Grant read access to the preferences file.
    Grant(GrantArgs),

    /// Revoke the stored access grant.
    Revoke,

    /// Show the snapshot currently published to the shared store.
    Show(ShowArgs),

    /// Parse a preferences file once and print the result.
    Parse(ParseArgs),

    /// Manage the background monitor.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Grant(args) => args.run(),
        Commands::Revoke => commands::grant::revoke(),
        Commands::Show(args) => args.run(),
        Commands::Parse(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
