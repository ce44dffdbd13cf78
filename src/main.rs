use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use spvcore_lib::{AppConfig, Node, logging};

#[derive(Debug, Parser)]
#[command(name = "spvcore-node", version, about = "Transaction lifecycle and chain sync node")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long, default_value = "spvcore.json")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let node = match Node::start(&config) {
        Ok(node) => node,
        Err(e) => {
            log::error!("Failed to start node: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
    }
    log::info!("Shutting down");
    node.shutdown().await;
    ExitCode::SUCCESS
}
