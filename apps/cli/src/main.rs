//! `faunakeys` - development host for the faunakeys engine
//!
//! Every invocation loads the mount from a JSON state file, runs one request
//! through the engine against a live Fauna endpoint and writes the mount
//! back. Output is JSON on stdout.

mod cli;
mod commands;
mod config;
mod state;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use faunakeys_engine::issuer::fauna::FaunaConnector;

use crate::cli::Cli;
use crate::config::CliConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(&cli.global)?;
    faunakeys_log::init_with(config.log.clone())?;

    let connector = Arc::new(FaunaConnector::new(config.issuer.clone())?);
    let output = commands::execute(cli.command, &config, &cli.global.caller, connector).await?;

    if let Some(output) = output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}
