mod cli;
mod clock;
mod config;
mod controller;
mod database;
mod domain;
mod error;
mod hardware;
mod planner;
mod repo;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use config::AppConfig;
use telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let config = AppConfig::load()?;
    init_tracing(&config.telemetry);

    let exit_code = cli::run(args, config).await?;
    std::process::exit(exit_code);
}
