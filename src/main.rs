//! ImageDeck - image acquisition pipeline feeding a slideshow
//!
//! Runs the downloader, reaper, slideshow and control server in one
//! process until interrupted.

use anyhow::Result;
use clap::{Parser, Subcommand};
use imagedeck::{config::ImageDeckConfig, ImageDeckBuilder};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "imagedeck")]
#[command(version)]
#[command(about = "Image acquisition pipeline with a line-oriented control server")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "IMAGEDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pipeline and control server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Image root directory
        #[arg(long)]
        image_dir: Option<PathBuf>,

        /// Disable the slideshow loop
        #[arg(long)]
        no_slideshow: bool,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("IMAGEDECK_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| format!("imagedeck={}", log_level).into());
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load configuration
    let config = if let Some(config_path) = cli.config {
        ImageDeckConfig::load(&config_path)?
    } else {
        ImageDeckConfig::default()
    };

    match cli.command {
        Commands::Serve {
            host,
            port,
            image_dir,
            no_slideshow,
        } => {
            run_serve(config, host, port, image_dir, !no_slideshow).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn run_serve(
    config: ImageDeckConfig,
    host: Option<String>,
    port: Option<u16>,
    image_dir: Option<PathBuf>,
    slideshow: bool,
) -> Result<()> {
    let slideshow = slideshow && config.slideshow.enabled;
    let mut builder = ImageDeckBuilder::new().config(config).slideshow(slideshow);
    if let Some(host) = host {
        builder = builder.host(host);
    }
    if let Some(port) = port {
        builder = builder.port(port);
    }
    if let Some(dir) = image_dir {
        builder = builder.image_dir(dir);
    }
    let deck = builder.build()?;

    deck.start().await?;

    let status = deck.status().await;
    tracing::info!(
        addr = ?status.local_addr,
        images = status.image_count,
        terms = ?status.search_terms,
        "ImageDeck is running. Press Ctrl+C to stop."
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    deck.stop().await?;

    Ok(())
}

fn show_config(config: Option<&ImageDeckConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
