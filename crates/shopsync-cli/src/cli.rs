use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shopsync_core::models::StockDelta;
use shopsync_core::HttpMethod;

#[derive(Parser)]
#[command(name = "shopsync")]
#[command(about = "Queue, replay, and watch shop mutations while offline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file (overrides SHOPSYNC_DB_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation for replay
    Enqueue {
        /// Replay method: POST, PUT, PATCH or DELETE
        #[arg(long, default_value = "POST", value_parser = parse_method)]
        method: HttpMethod,
        /// Absolute URL, or a path resolved against SHOPSYNC_API_BASE_URL
        #[arg(long)]
        url: String,
        /// JSON request body
        #[arg(long, value_name = "JSON")]
        body: Option<String>,
        /// Units sold by this action, applied to cached stock right away
        #[arg(long = "sell", value_name = "ITEM_ID=QTY", value_parser = parse_sale)]
        sales: Vec<StockDelta>,
    },
    /// List queued actions
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay eligible actions once and print the sync status
    Sync,
    /// Return a failed or dead-lettered action to pending
    Requeue {
        /// Action ID or unique ID prefix
        id: String,
    },
    /// Show cached inventory for the configured tenant
    Cache {
        /// Read live inventory first and cache it
        #[arg(long)]
        refresh: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow tenant changes; replay the queue and re-read inventory on each
    Listen,
}

fn parse_method(value: &str) -> Result<HttpMethod, String> {
    value.parse().map_err(|error: shopsync_core::Error| error.to_string())
}

fn parse_sale(value: &str) -> Result<StockDelta, String> {
    let (item_id, quantity) = value
        .split_once('=')
        .ok_or_else(|| format!("`{value}` must look like ITEM_ID=QTY"))?;
    let item_id = item_id.trim();
    if item_id.is_empty() {
        return Err("item id cannot be empty".to_string());
    }
    let quantity = quantity
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|quantity| *quantity > 0)
        .ok_or_else(|| format!("quantity in `{value}` must be a positive integer"))?;
    Ok(StockDelta::sale(item_id, quantity))
}
