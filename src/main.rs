mod auth;
mod browser;
mod cli;
mod config;
mod error;
mod git;
mod notify;
mod output;
mod providers;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting buildkite {}", env!("CARGO_PKG_VERSION"));
    cli.execute().await?;

    Ok(())
}
