//! driftsync CLI
//!
//! Command-line tools for inspecting and maintaining a driftsync local store.
//!
//! # Commands
//!
//! - `inspect` - Show per-collection row counts by sync status
//! - `pending` - List the rows of a collection awaiting acknowledgement
//! - `clear-pending` - Discard unsent creates and revert pending deletes
//! - `clear` - Remove every row of a collection

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// driftsync local store tools.
#[derive(Parser)]
#[command(name = "driftsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
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
    /// Show per-collection row counts by sync status
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending rows, oldest first
    Pending {
        /// Collection to list
        #[arg(short, long)]
        collection: String,

        /// Maximum number of rows to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Discard unsent creates and revert pending deletes
    ClearPending {
        /// Collection to clear
        #[arg(short, long)]
        collection: String,
    },

    /// Remove every row of a collection
    Clear {
        /// Collection to clear
        #[arg(short, long)]
        collection: String,

        /// Dry run - show what would be removed
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
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Pending {
            collection,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for pending")?;
            commands::pending::run(&path, &collection, limit, &format)?;
        }
        Commands::ClearPending { collection } => {
            let path = cli.path.ok_or("Store path required for clear-pending")?;
            commands::clear::run_pending(&path, &collection)?;
        }
        Commands::Clear {
            collection,
            dry_run,
        } => {
            let path = cli.path.ok_or("Store path required for clear")?;
            commands::clear::run_all(&path, &collection, dry_run)?;
        }
        Commands::Version => {
            println!("driftsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
