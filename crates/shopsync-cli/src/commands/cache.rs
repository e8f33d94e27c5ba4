use shopsync_core::cache::InventoryCache;
use shopsync_core::config::ClientConfig;

use crate::commands::common::{
    format_inventory_lines, format_sync_timestamp, format_view_line, open_database,
};
use crate::error::CliError;

pub async fn run_cache(config: &ClientConfig, refresh: bool, as_json: bool) -> Result<(), CliError> {
    let db = open_database(config).await?;
    let cache = InventoryCache::new(db.cache_store(), config.tenant_id.clone());
    let items = if refresh {
        let view = cache.refresh(&config.inventory_reader()?).await?;
        if !as_json {
            println!("{}", format_view_line(&view));
        }
        view.data
    } else {
        cache.load().await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    let Some(cached_at) = cache.cached_at().await? else {
        println!("No cached inventory for tenant {}.", cache.tenant_id());
        return Ok(());
    };

    println!(
        "Inventory for tenant {} (cached {})",
        cache.tenant_id(),
        format_sync_timestamp(cached_at)
    );
    for line in format_inventory_lines(&items) {
        println!("{line}");
    }
    Ok(())
}
