//! proglog - record store inspection tool
//!
//! Appends to, reads from, and checks the integrity of proglog store files.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proglog")]
#[command(about = "Inspect and edit proglog record store files")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, env = "PROGLOG_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Append records to a store
    Append {
        /// Store file
        file: PathBuf,

        /// Payloads to append, one record each
        payloads: Vec<String>,

        /// Read a single record from stdin instead
        #[arg(long, conflicts_with = "payloads")]
        stdin: bool,
    },

    /// Read the record at an offset
    Read {
        /// Store file
        file: PathBuf,

        /// Frame offset returned by append
        offset: u64,

        /// Print the payload as hex
        #[arg(long)]
        hex: bool,
    },

    /// List frames in offset order
    Scan {
        /// Store file
        file: PathBuf,

        /// Maximum frames to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Emit one JSON object per frame
        #[arg(long)]
        json: bool,

        /// Preview payloads as hex
        #[arg(long)]
        hex: bool,
    },

    /// Check that a store file contains only complete frames
    Verify {
        /// Store file
        file: PathBuf,
    },

    /// Truncate a torn tail from a store file
    Repair {
        /// Store file
        file: PathBuf,
    },

    /// Show store size and frame count
    Stat {
        /// Store file
        file: PathBuf,

        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    tracing::debug!("Store config: {:?}", config.store);

    match commands::execute(cli.command, &config.store) {
        Ok(output) => {
            if !output.text.is_empty() {
                println!("{}", output.text);
            }
            if !output.ok {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
