mod cli;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = std::env::var("TASKFLOW_DATA_DIR").unwrap_or_else(|_| ".".to_string());
    let _log_guard = logging::init_logging(&data_dir, cli.verbose);

    match cli.command {
        Commands::Run { config } => commands::run::run(config, &cli.db_path).await,
        Commands::Task { command } => commands::task::run(command, &cli.db_path).await,
    }
}
