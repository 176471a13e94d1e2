//! Hikari CLI - Headless HLS playback harness
//!
//! Features:
//! - Rendition ladder inspection
//! - Full playback sessions against an in-memory surface
//! - Controller event stream as text or JSON

use clap::{Parser, Subcommand};
use hikari_core::PlayerConfig;
use std::path::PathBuf;

mod commands;
mod output;

/// Hikari CLI - adaptive playback controller harness
#[derive(Parser)]
#[command(name = "hikari")]
#[command(author = "Hikari Contributors")]
#[command(version)]
#[command(about = "Inspect HLS ladders and drive headless playback sessions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Player configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the rendition ladder of a master playlist
    Inspect {
        /// URL to manifest
        manifest: String,
    },

    /// Play an episode on a headless surface
    Play {
        /// URL to manifest
        manifest: String,

        /// Episode identifier reported to telemetry
        #[arg(long, default_value = "local")]
        episode_id: String,

        /// Episode title for the overlay
        #[arg(long, default_value = "Untitled")]
        title: String,

        /// Episode number for the overlay
        #[arg(long, default_value = "1")]
        number: u32,

        /// Seconds of playback to simulate
        #[arg(short, long, default_value = "60")]
        seconds: f64,

        /// Playback speed relative to wall clock
        #[arg(long, default_value = "1.0")]
        speed: f64,

        /// Rendition to select once the ladder is known
        #[arg(short, long)]
        level: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => PlayerConfig::from_json_file(path)?,
        None => PlayerConfig::default(),
    };
    hikari_core::init();

    match cli.command {
        Commands::Inspect { manifest } => {
            commands::inspect(&manifest, &config, &cli.format).await?;
        }
        Commands::Play {
            manifest,
            episode_id,
            title,
            number,
            seconds,
            speed,
            level,
        } => {
            let options = commands::PlayOptions {
                episode_id,
                title,
                number,
                seconds,
                speed,
                level,
            };
            commands::play(&manifest, options, config, &cli.format).await?;
        }
    }

    Ok(())
}
