//! Roll CLI - Headless replay harness for the media-session core
//!
//! Features:
//! - Scenario replay through the engine against the simulated host
//! - Real-player classification of candidate lists
//! - Rotation scale and AB-loop timestamp helpers

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;
mod scenario;

/// Roll CLI - media-session replay toolkit
#[derive(Parser)]
#[command(name = "roll-cli")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Replay and inspect Roll media sessions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON scenario and print the notifications
    Replay {
        /// Path to the scenario file
        scenario: PathBuf,
    },

    /// Pick the real player from a JSON candidate list
    Classify {
        /// Path to the candidate list
        candidates: PathBuf,
    },

    /// Scale keeping a rotated video inside its container
    Scale {
        /// Container size, WIDTHxHEIGHT
        #[arg(short, long)]
        container: String,

        /// Intrinsic video size, WIDTHxHEIGHT
        #[arg(short, long)]
        intrinsic: String,

        /// Rotation in degrees
        #[arg(short, long, default_value = "90")]
        deg: u16,
    },

    /// Parse AB-loop timestamps
    Timestamp {
        /// Values in [H:]M:S form
        #[arg(required = true)]
        values: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();
    roll_core::init();

    match cli.command {
        Commands::Replay { scenario } => {
            commands::replay_file(&scenario, &cli.format).await?;
        }
        Commands::Classify { candidates } => {
            commands::classify(&candidates, &cli.format)?;
        }
        Commands::Scale { container, intrinsic, deg } => {
            commands::scale(&container, &intrinsic, deg, &cli.format)?;
        }
        Commands::Timestamp { values } => {
            if !commands::timestamps(&values, &cli.format) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
