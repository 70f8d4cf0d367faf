//! imgpipe - Main Entry Point
//! Catalog producer and image compression workers over AMQP

mod app;
mod config;
mod logging;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::app::Mode;
use crate::config::Config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "imgpipe")]
#[command(about = "Compress catalog product images through a durable work queue", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML). Defaults to ./imgpipe.toml when present
    #[arg(long, short, global = true, env = "IMGPIPE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Start the worker pool, publish pending catalog images once, serve until Ctrl-C
    Run,
    /// Publish pending catalog images once and exit
    Produce,
    /// Start the worker pool only
    Consume,
}

impl From<Commands> for Mode {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Run => Mode::Run,
            Commands::Produce => Mode::Produce,
            Commands::Consume => Mode::Consume,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    logging::init()?;
    info!("imgpipe v{} starting...", VERSION);

    // 2. Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // 3. Run
    app::run(cli.command.into(), config).await
}
