//! silo CLI
//!
//! Command-line tools for inspecting and maintaining volume files.
//!
//! # Commands
//!
//! - `inspect` - Display volume statistics and superblock metadata
//! - `verify` - Verify data log and index integrity
//! - `compact` - Vacuum a volume to reclaim deleted space
//! - `dump-log` - Dump needle records for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// silo command-line volume tools.
#[derive(Parser)]
#[command(name = "silo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Collection the volume belongs to
    #[arg(global = true, short, long, default_value = "")]
    collection: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display volume statistics and superblock metadata
    Inspect {
        /// Volume id
        volume: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify data log and index integrity
    Verify {
        /// Volume id
        volume: u32,
    },

    /// Vacuum a volume to reclaim deleted space
    Compact {
        /// Volume id
        volume: u32,

        /// Garbage ratio below which nothing happens
        #[arg(short, long, default_value = "0.0")]
        threshold: f64,

        /// Dry run - report the garbage ratio and stop
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump needle records for debugging
    DumpLog {
        /// Volume id
        volume: u32,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
        Commands::Inspect { volume, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &cli.collection, volume, &format)?;
        }
        Commands::Verify { volume } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, &cli.collection, volume)?;
        }
        Commands::Compact {
            volume,
            threshold,
            dry_run,
        } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, &cli.collection, volume, threshold, dry_run)?;
        }
        Commands::DumpLog {
            volume,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump-log")?;
            commands::dump_log::run(&path, &cli.collection, volume, limit, &format)?;
        }
        Commands::Version => {
            println!("silo {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
