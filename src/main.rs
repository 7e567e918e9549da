mod api;
mod auth;
mod cli;
mod config;
mod error;
mod jobs;
mod metadata;
mod rehearse;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting rehearse");
    cli.execute().await?;

    Ok(())
}
