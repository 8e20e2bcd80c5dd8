//! Rollcall CLI
//!
//! Maintenance tools for a device replica directory.
//!
//! # Commands
//!
//! - `inspect` - Display replica statistics and sync metadata
//! - `verify` - Check log framing and replica invariants
//! - `dump-changelog` - Print change-log entries for debugging
//! - `gc` - Purge acknowledged tombstones and compact tables

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Rollcall replica maintenance tools.
#[derive(Parser)]
#[command(name = "rollcall")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display replica statistics and sync metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check log framing and replica invariants
    Verify {
        /// Check record framing of every log file
        #[arg(short, long)]
        logs: bool,

        /// Check the opened replica's invariants
        #[arg(short, long)]
        state: bool,
    },

    /// Print change-log entries for debugging
    DumpChangelog {
        /// Only entries the remote has not acknowledged
        #[arg(long)]
        pending: bool,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Purge acknowledged tombstones and compact tables
    Gc {
        /// Report what would be purged without changing anything
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Replica path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { logs, state } => {
            let path = cli.path.ok_or("Replica path required for verify")?;
            let check_all = !logs && !state;
            commands::verify::run(&path, logs || check_all, state || check_all)?;
        }
        Commands::DumpChangelog {
            pending,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Replica path required for dump-changelog")?;
            commands::dump_changelog::run(&path, pending, limit, &format)?;
        }
        Commands::Gc { dry_run } => {
            let path = cli.path.ok_or("Replica path required for gc")?;
            commands::gc::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("Rollcall CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Replica format v{}", rollcall_core::FORMAT_VERSION);
        }
    }

    Ok(())
}
