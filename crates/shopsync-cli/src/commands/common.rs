use chrono::Utc;
use serde::Serialize;
use shopsync_core::cache::{CacheSource, CacheView};
use shopsync_core::config::ClientConfig;
use shopsync_core::db::{ActionLog, Database};
use shopsync_core::models::InventoryItem;
use shopsync_core::sync::SyncStatus;
use shopsync_core::{ActionId, SyncAction};

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct ActionListItem {
    pub id: String,
    pub method: String,
    pub url: String,
    pub status: String,
    pub retry_count: u32,
    pub created_at: i64,
    pub relative_time: String,
    pub last_tried_at: Option<i64>,
    pub error: Option<String>,
}

pub async fn open_database(config: &ClientConfig) -> Result<Database, CliError> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::open(&config.db_path).await?)
}

pub fn parse_body(body: Option<&str>) -> Result<Option<serde_json::Value>, CliError> {
    body.map(str::trim)
        .filter(|body| !body.is_empty())
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(CliError::InvalidBody)
}

pub fn normalize_action_identifier(id: &str) -> Result<String, CliError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::EmptyActionId);
    }
    Ok(id.to_ascii_lowercase())
}

/// Resolve a full action ID or a unique prefix of one
pub async fn resolve_action(query: &str, log: &impl ActionLog) -> Result<SyncAction, CliError> {
    if let Ok(action_id) = query.parse::<ActionId>() {
        if let Some(action) = log.get(&action_id).await? {
            return Ok(action);
        }
    }

    let mut matches = log
        .list_all()
        .await?
        .into_iter()
        .filter(|action| action.id.to_string().starts_with(query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::ActionNotFound(query.to_string())),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|action| short_id(&action.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousActionId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &ActionId) -> String {
    id.to_string().chars().take(SHORT_ID_LEN).collect()
}

pub fn format_action_lines(actions: &[SyncAction], now_ms: i64) -> Vec<String> {
    actions
        .iter()
        .map(|action| {
            let short_id = short_id(&action.id);
            let method = action.method.as_str();
            let status = action.status.as_str();
            let relative_time = format_relative_time(action.created_at, now_ms);
            let line = format!(
                "{short_id:<13}  {method:<6}  {status:<13}  {relative_time:<10}  {}",
                action.url
            );

            match &action.error {
                Some(error) if action.retry_count > 0 => {
                    format!("{line}  (tries: {}, last error: {error})", action.retry_count)
                }
                _ => line,
            }
        })
        .collect()
}

pub fn action_to_list_item(action: &SyncAction) -> ActionListItem {
    ActionListItem {
        id: action.id.to_string(),
        method: action.method.to_string(),
        url: action.url.clone(),
        status: action.status.to_string(),
        retry_count: action.retry_count,
        created_at: action.created_at,
        relative_time: format_relative_time(action.created_at, Utc::now().timestamp_millis()),
        last_tried_at: action.last_tried_at,
        error: action.error.clone(),
    }
}

pub fn format_status_line(status: &SyncStatus) -> String {
    if status.fully_synced {
        return "All changes synced".to_string();
    }

    let mut parts = vec![format!("{} pending", status.pending)];
    if status.failed > 0 {
        parts.push(format!("{} failed", status.failed));
    }
    if status.dead_lettered > 0 {
        parts.push(format!("{} dead-lettered", status.dead_lettered));
    }
    let summary = parts.join(", ");

    if status.is_syncing {
        format!("Syncing: {summary}")
    } else {
        format!("Waiting to sync: {summary}")
    }
}

pub fn format_inventory_lines(items: &[InventoryItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            format!(
                "{:<16}  {:<32}  {:>6}  {}",
                item.sku,
                item.name,
                item.stock,
                format_price(item.unit_price_cents)
            )
        })
        .collect()
}

/// One line describing where a read-path result came from
pub fn format_view_line(view: &CacheView<InventoryItem>) -> String {
    let count = view.data.len();
    match (view.source, view.is_online) {
        (CacheSource::Live, _) => format!("Inventory refreshed: {count} items"),
        (CacheSource::Cache, true) => {
            format!("Inventory read failed; showing {count} cached items")
        }
        (CacheSource::Cache, false) => format!("Offline; showing {count} cached items"),
    }
}

fn format_price(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
