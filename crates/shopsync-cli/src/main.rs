//! shopsync CLI - drive the offline sync engine from a terminal
//!
//! Queue mutations while offline, inspect the action log, replay it, and
//! follow tenant change notifications.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;
use shopsync_core::config::ClientConfig;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::enqueue::run_enqueue;
use crate::commands::listen::run_listen;
use crate::commands::queue::run_queue;
use crate::commands::requeue::run_requeue;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shopsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    match cli.command {
        Commands::Enqueue {
            method,
            url,
            body,
            sales,
        } => {
            run_enqueue(&config, method, &url, body.as_deref(), &sales).await?;
        }
        Commands::Queue { json } => run_queue(&config, json).await?,
        Commands::Sync => run_sync(&config).await?,
        Commands::Requeue { id } => run_requeue(&config, &id).await?,
        Commands::Cache { refresh, json } => run_cache(&config, refresh, json).await?,
        Commands::Listen => run_listen(&config).await?,
    }

    Ok(())
}
