use chrono::Utc;
use shopsync_core::config::ClientConfig;
use shopsync_core::db::ActionLog;

use crate::commands::common::{
    action_to_list_item, format_action_lines, open_database, ActionListItem,
};
use crate::error::CliError;

pub async fn run_queue(config: &ClientConfig, as_json: bool) -> Result<(), CliError> {
    let db = open_database(config).await?;
    let actions = db.action_log().list_all().await?;

    if as_json {
        let json_items = actions
            .iter()
            .map(action_to_list_item)
            .collect::<Vec<ActionListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if actions.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_action_lines(&actions, Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    Ok(())
}
