//! edgeship agent - per-host deployment agent

use clap::Parser;
use edgeship_agent::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    edgeship_common::valkey::install_crypto_provider();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
