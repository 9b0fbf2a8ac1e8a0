//! Beacon CLI
//!
//! Command-line tools for on-device action queues.
//!
//! # Commands
//!
//! - `inspect` - Display queue statistics
//! - `dump` - List pending actions with decoded payloads
//! - `compact` - Rewrite the log down to the pending actions
//! - `migrate` - Open the queue, running upgrades, and report what changed
//! - `drain` - Send pending actions to a server once

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Beacon action queue tools.
#[derive(Parser)]
#[command(name = "beacon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue directory
    #[arg(global = true, short, long)]
    queue: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display queue statistics
    Inspect,

    /// List pending actions, oldest first
    Dump {
        /// Maximum number of actions to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Rewrite the log so it only holds pending actions
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Open the queue, run pending upgrades and print the migration report
    Migrate,

    /// Send pending actions to a server in one pass
    Drain {
        /// Base URL of the report API
        #[arg(short, long)]
        server: String,

        /// Attempts per action, first one included
        #[arg(short, long, default_value = "3")]
        attempts: u32,

        /// Delay before the first retry, doubled on each further retry
        #[arg(short, long, default_value = "200")]
        backoff_ms: u64,

        /// Bearer token sent with every request
        #[arg(long)]
        token: Option<String>,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = cli.format;
    match cli.command {
        Commands::Inspect => {
            let path = cli.queue.ok_or("Queue path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Dump { limit } => {
            let path = cli.queue.ok_or("Queue path required for dump")?;
            commands::dump::run(&path, limit, format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.queue.ok_or("Queue path required for compact")?;
            commands::compact::run(&path, dry_run, format)?;
        }
        Commands::Migrate => {
            let path = cli.queue.ok_or("Queue path required for migrate")?;
            commands::migrate::run(&path, format)?;
        }
        Commands::Drain {
            server,
            attempts,
            backoff_ms,
            token,
        } => {
            let path = cli.queue.ok_or("Queue path required for drain")?;
            let options = commands::drain::DrainOptions {
                server,
                attempts,
                backoff_ms,
                token,
            };
            commands::drain::run(&path, &options, format)?;
        }
        Commands::Version => {
            println!("beacon CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("queue format v{}", beacon_queue::FORMAT_VERSION);
        }
    }

    Ok(())
}
