use shopsync_core::config::ClientConfig;
use shopsync_core::db::ActionLog;
use shopsync_core::SyncAction;

use crate::commands::common::{normalize_action_identifier, open_database, resolve_action};
use crate::error::CliError;

pub async fn run_requeue(config: &ClientConfig, id: &str) -> Result<(), CliError> {
    let action = requeue_action(config, id).await?;
    println!("{} {}", action.id, action.status);
    Ok(())
}

pub async fn requeue_action(config: &ClientConfig, id: &str) -> Result<SyncAction, CliError> {
    let query = normalize_action_identifier(id)?;
    let db = open_database(config).await?;
    let log = db.action_log();
    let action = resolve_action(&query, &log).await?;

    Ok(log.requeue(&action.id).await?)
}
