use shopsync_core::cache::InventoryCache;
use shopsync_core::config::ClientConfig;
use shopsync_core::db::ActionLog;
use shopsync_core::models::StockDelta;
use shopsync_core::{HttpMethod, NewAction, SyncAction};

use crate::commands::common::{open_database, parse_body};
use crate::error::CliError;

pub async fn run_enqueue(
    config: &ClientConfig,
    method: HttpMethod,
    url: &str,
    body: Option<&str>,
    sales: &[StockDelta],
) -> Result<(), CliError> {
    let action = enqueue_action(config, method, url, body, sales).await?;
    println!("{}", action.id);
    Ok(())
}

/// Queue the action, then reflect any sold units in the cached inventory
/// so offline reads show them before the replay lands.
pub async fn enqueue_action(
    config: &ClientConfig,
    method: HttpMethod,
    url: &str,
    body: Option<&str>,
    sales: &[StockDelta],
) -> Result<SyncAction, CliError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(CliError::EmptyUrl);
    }

    let mut request = NewAction::new(method, url);
    if let Some(body) = parse_body(body)? {
        request = request.with_body(body);
    }

    let db = open_database(config).await?;
    let action = db.action_log().enqueue(request).await?;
    tracing::debug!(action_id = %action.id, method = %action.method, url = %action.url, "Queued action");

    if !sales.is_empty() {
        let cache = InventoryCache::new(db.cache_store(), config.tenant_id.clone());
        cache.apply_local_sale(sales).await?;
    }
    Ok(action)
}
