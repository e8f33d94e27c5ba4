use std::sync::Arc;

use shopsync_core::cache::{CacheView, InventoryCache, LiveReader};
use shopsync_core::config::ClientConfig;
use shopsync_core::db::{ActionLog, CacheStore};
use shopsync_core::listener::{SyncListener, SyncSignal};
use shopsync_core::models::InventoryItem;
use shopsync_core::sync::{DrainOutcome, SyncProcessor, SyncStatus, Transport};
use tokio::sync::{mpsc, watch};

use crate::commands::common::{format_status_line, format_view_line, open_database};
use crate::commands::sync::{drain_once, format_outcome_line};
use crate::error::CliError;

const SIGNAL_BUFFER: usize = 16;

pub async fn run_listen(config: &ClientConfig) -> Result<(), CliError> {
    let db = open_database(config).await?;
    let processor = Arc::new(SyncProcessor::new(
        db.action_log(),
        config.transport()?,
        config.sync_policy(),
    ));
    let cache = InventoryCache::new(db.cache_store(), config.tenant_id.clone());
    let reader = config.inventory_reader()?;
    println!("{}", format_view_line(&cache.refresh(&reader).await?));
    let listener = SyncListener::new(config.event_source()?);

    // A terminal session is treated as online; failed replays back off.
    let (online_tx, online_rx) = watch::channel(true);
    let runner = tokio::spawn({
        let processor = Arc::clone(&processor);
        let retry_tick = config.retry_tick;
        async move { processor.run(online_rx, retry_tick).await }
    });

    let (signal_tx, signals) = mpsc::channel(SIGNAL_BUFFER);
    let (_focus_tx, focus_rx) = watch::channel(true);
    let listener_task = tokio::spawn(listener.run(signal_tx, focus_rx));
    tracing::info!(tenant = %config.tenant_id, "Listening for tenant changes");

    let stopped_by_listener = tokio::select! {
        result = follow_signals(processor.as_ref(), &cache, &reader, signals) => {
            result?;
            true
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            false
        }
    };

    drop(online_tx);
    runner.await?;

    if stopped_by_listener {
        listener_task.await??;
    } else {
        listener_task.abort();
        println!("Stopped listening");
    }
    Ok(())
}

/// Per signal: push queued mutations first, then re-run the read path so
/// the cache reflects the server after it has seen them.
pub async fn follow_signals<L, T, S, R>(
    processor: &SyncProcessor<L, T>,
    cache: &InventoryCache<S>,
    reader: &R,
    mut signals: mpsc::Receiver<SyncSignal>,
) -> Result<(), CliError>
where
    L: ActionLog,
    T: Transport,
    S: CacheStore,
    R: LiveReader<InventoryItem>,
{
    while let Some(signal) = signals.recv().await {
        let (outcome, status) = drain_once(processor).await?;
        let view = cache.refresh(reader).await?;
        for line in signal_lines(signal, outcome, &status, &view) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn signal_lines(
    signal: SyncSignal,
    outcome: DrainOutcome,
    status: &SyncStatus,
    view: &CacheView<InventoryItem>,
) -> Vec<String> {
    let mut lines = vec![match signal {
        SyncSignal::Refresh => "Tenant data changed; refreshing".to_string(),
        SyncSignal::FullReload => "Server requested a full reload".to_string(),
    }];
    lines.extend(format_outcome_line(outcome));
    lines.push(format_status_line(status));
    lines.push(format_view_line(view));
    lines
}
