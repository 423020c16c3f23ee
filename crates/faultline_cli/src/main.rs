//! Faultline CLI
//!
//! Command-line tools for remote-backed Faultline stores.
//!
//! # Commands
//!
//! - `model` - Validate a JSON model and print its entities
//! - `fetch` - Fetch from a REST API through the engine into a snapshot
//! - `inspect` - Display snapshot statistics
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Faultline command-line tools.
#[derive(Parser)]
#[command(name = "faultline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a model file and print a summary
    Model {
        /// Path to the JSON model
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Fetch objects from a REST API
    Fetch {
        /// Path to the JSON model
        #[arg(short, long)]
        model: PathBuf,

        /// Base URL of the API
        #[arg(short, long)]
        base_url: String,

        /// Entity to fetch
        #[arg(short, long)]
        entity: String,

        /// Remote identifier of a single object
        #[arg(long)]
        id: Option<String>,

        /// Relationship of the object to fetch (requires --id)
        #[arg(short, long)]
        relationship: Option<String>,

        /// Maximum number of results for a collection fetch
        #[arg(short, long)]
        limit: Option<usize>,

        /// Snapshot file to load before and save after fetching
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        /// Bearer token for the API
        #[arg(long)]
        token: Option<String>,

        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Attempts per request
        #[arg(long, default_value = "3")]
        retries: u32,
    },

    /// Display snapshot statistics
    Inspect {
        /// Path to the JSON model
        #[arg(short, long)]
        model: PathBuf,

        /// Snapshot file
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays clean
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Model { path, format } => {
            commands::model::run(&path, &format)?;
        }
        Commands::Fetch {
            model,
            base_url,
            entity,
            id,
            relationship,
            limit,
            snapshot,
            token,
            timeout,
            retries,
        } => {
            commands::fetch::run(commands::fetch::FetchOptions {
                model,
                base_url,
                entity,
                id,
                relationship,
                limit,
                snapshot,
                token,
                timeout,
                retries,
            })?;
        }
        Commands::Inspect {
            model,
            snapshot,
            format,
        } => {
            commands::inspect::run(&model, &snapshot, &format)?;
        }
        Commands::Version => {
            println!("Faultline CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
