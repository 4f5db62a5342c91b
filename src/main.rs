mod commands;
mod state;

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};

use state::{AppState, SyncConfig};

/// Local-first cache, quota management and asset migration for site records
#[derive(Debug, Parser)]
#[command(name = "sitesync", version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Cache directory, overrides SYNC_DATA_DIR
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load env
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let mut config = SyncConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let state = AppState::init(config).await?;
    info!("Running {:?}", cli.command);

    commands::run(cli.command, &state).await
}
