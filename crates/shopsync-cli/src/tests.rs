use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use pretty_assertions::assert_eq;
use shopsync_core::cache::{CacheSource, CacheView, InventoryCache, LiveReader};
use shopsync_core::config::ClientConfig;
use shopsync_core::db::{ActionLog, CacheStore, Database, MemoryActionLog};
use shopsync_core::listener::SyncSignal;
use shopsync_core::models::{InventoryItem, StockDelta};
use shopsync_core::sync::{
    DrainOutcome, DrainReport, SyncPolicy, SyncProcessor, SyncStatus, Transport, TransportError,
};
use shopsync_core::{ActionStatus, HttpMethod, NewAction, SyncAction};
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::common::{
    format_action_lines, format_inventory_lines, format_relative_time, format_status_line,
    format_view_line, normalize_action_identifier, open_database, parse_body, resolve_action,
};
use crate::commands::enqueue::enqueue_action;
use crate::commands::listen::{follow_signals, signal_lines};
use crate::commands::queue::run_queue;
use crate::commands::requeue::requeue_action;
use crate::commands::sync::format_outcome_line;
use crate::error::CliError;

fn test_config(dir: &TempDir) -> ClientConfig {
    let db_path = dir.path().join("nested").join("shopsync.db");
    let values = HashMap::from([
        ("SHOPSYNC_API_BASE_URL", "http://127.0.0.1:9".to_string()),
        ("SHOPSYNC_TENANT_ID", "T1".to_string()),
        ("SHOPSYNC_DB_PATH", db_path.display().to_string()),
    ]);
    ClientConfig::from_lookup(|name| values.get(name).cloned()).unwrap()
}

#[derive(Default)]
struct AcceptingTransport {
    sent: AtomicUsize,
}

impl Transport for AcceptingTransport {
    async fn send(&self, _action: &SyncAction) -> Result<(), TransportError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Answers every inventory read with the same rows
struct FixedInventory(Vec<InventoryItem>);

impl LiveReader<InventoryItem> for FixedInventory {
    async fn fetch(&self) -> Result<Vec<InventoryItem>, TransportError> {
        Ok(self.0.clone())
    }
}

fn item(id: &str, stock: i64) -> InventoryItem {
    InventoryItem {
        id: id.to_string(),
        sku: format!("SKU-{id}"),
        name: format!("Item {id}"),
        stock,
        unit_price_cents: 250,
    }
}

#[test]
fn enqueue_parses_method_case_insensitively() {
    let cli = Cli::try_parse_from([
        "shopsync",
        "enqueue",
        "--method",
        "put",
        "--url",
        "/v1/inventory/sku-1",
    ])
    .unwrap();

    let Commands::Enqueue {
        method,
        url,
        body,
        sales,
    } = cli.command
    else {
        panic!("expected enqueue command");
    };
    assert_eq!(method, HttpMethod::Put);
    assert_eq!(url, "/v1/inventory/sku-1");
    assert_eq!(body, None);
    assert!(sales.is_empty());
}

#[test]
fn enqueue_defaults_to_post_and_rejects_get() {
    let cli = Cli::try_parse_from(["shopsync", "enqueue", "--url", "/v1/sales"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Enqueue {
            method: HttpMethod::Post,
            ..
        }
    ));

    assert!(
        Cli::try_parse_from(["shopsync", "enqueue", "--method", "GET", "--url", "/v1/sales"])
            .is_err()
    );
}

#[test]
fn db_path_flag_is_global() {
    let cli = Cli::try_parse_from(["shopsync", "queue", "--db-path", "/tmp/shop.db"]).unwrap();
    assert_eq!(cli.db_path.as_deref(), Some(std::path::Path::new("/tmp/shop.db")));
}

#[test]
fn parse_body_accepts_json_and_skips_blank() {
    assert_eq!(
        parse_body(Some(r#"{"sku":"A1","quantity":2}"#)).unwrap(),
        Some(serde_json::json!({ "sku": "A1", "quantity": 2 }))
    );
    assert_eq!(parse_body(Some("   ")).unwrap(), None);
    assert_eq!(parse_body(None).unwrap(), None);
    assert!(matches!(
        parse_body(Some("{not json")),
        Err(CliError::InvalidBody(_))
    ));
}

#[test]
fn normalize_action_identifier_rejects_empty() {
    assert!(matches!(
        normalize_action_identifier("  "),
        Err(CliError::EmptyActionId)
    ));
    assert_eq!(
        normalize_action_identifier(" 0192ABC ").unwrap(),
        "0192abc".to_string()
    );
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn status_line_summarizes_queue() {
    let synced = SyncStatus {
        fully_synced: true,
        ..SyncStatus::default()
    };
    assert_eq!(format_status_line(&synced), "All changes synced");

    let waiting = SyncStatus {
        pending: 2,
        failed: 1,
        dead_lettered: 1,
        ..SyncStatus::default()
    };
    assert_eq!(
        format_status_line(&waiting),
        "Waiting to sync: 2 pending, 1 failed, 1 dead-lettered"
    );

    let syncing = SyncStatus {
        is_syncing: true,
        pending: 1,
        ..SyncStatus::default()
    };
    assert_eq!(format_status_line(&syncing), "Syncing: 1 pending");
}

#[test]
fn outcome_line_reports_drain() {
    assert_eq!(format_outcome_line(DrainOutcome::AlreadyRunning), None);
    assert_eq!(
        format_outcome_line(DrainOutcome::Completed(DrainReport::default())),
        Some("Nothing eligible to replay".to_string())
    );
    assert_eq!(
        format_outcome_line(DrainOutcome::Completed(DrainReport {
            attempted: 3,
            succeeded: 1,
            failed: 1,
            dead_lettered: 1,
        })),
        Some("Replayed 1 of 3 actions, 1 failed, 1 dead-lettered".to_string())
    );
}

#[test]
fn inventory_lines_show_stock_and_price() {
    let items = vec![InventoryItem {
        id: "item-1".to_string(),
        sku: "SKU-1".to_string(),
        name: "Espresso beans".to_string(),
        stock: 12,
        unit_price_cents: 1_905,
    }];

    let lines = format_inventory_lines(&items);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("SKU-1"));
    assert!(lines[0].contains("Espresso beans"));
    assert!(lines[0].ends_with("    12  19.05"));
}

#[test]
fn action_lines_include_last_error_after_retries() {
    let mut action = SyncAction::from_request(NewAction::new(HttpMethod::Post, "/v1/sales"), 0);
    action.status = ActionStatus::Failed;
    action.retry_count = 2;
    action.error = Some("HTTP 500: boom".to_string());

    let lines = format_action_lines(&[action], 120_000);
    assert!(lines[0].contains("POST"));
    assert!(lines[0].contains("failed"));
    assert!(lines[0].contains("2m ago"));
    assert!(lines[0].ends_with("/v1/sales  (tries: 2, last error: HTTP 500: boom)"));
}

#[test]
fn signal_lines_name_the_trigger() {
    let status = SyncStatus {
        fully_synced: true,
        ..SyncStatus::default()
    };
    let view = CacheView {
        data: vec![item("a", 3)],
        is_online: true,
        source: CacheSource::Live,
    };
    assert_eq!(
        signal_lines(
            SyncSignal::FullReload,
            DrainOutcome::AlreadyRunning,
            &status,
            &view
        ),
        vec![
            "Server requested a full reload".to_string(),
            "All changes synced".to_string(),
            "Inventory refreshed: 1 items".to_string(),
        ]
    );
}

#[test]
fn view_line_names_the_source() {
    let view = |source, is_online| CacheView {
        data: vec![item("a", 3), item("b", 1)],
        is_online,
        source,
    };
    assert_eq!(
        format_view_line(&view(CacheSource::Cache, false)),
        "Offline; showing 2 cached items"
    );
    assert_eq!(
        format_view_line(&view(CacheSource::Cache, true)),
        "Inventory read failed; showing 2 cached items"
    );
}

#[test]
fn enqueue_collects_repeated_sales() {
    let cli = Cli::try_parse_from([
        "shopsync",
        "enqueue",
        "--url",
        "/v1/sales",
        "--sell",
        "item-1=2",
        "--sell",
        " item-2 = 1 ",
    ])
    .unwrap();

    let Commands::Enqueue { sales, .. } = cli.command else {
        panic!("expected enqueue command");
    };
    assert_eq!(
        sales,
        vec![StockDelta::sale("item-1", 2), StockDelta::sale("item-2", 1)]
    );
}

#[test]
fn enqueue_rejects_malformed_sales() {
    for sale in ["item-1", "=2", "item-1=0", "item-1=-3", "item-1=two"] {
        let result =
            Cli::try_parse_from(["shopsync", "enqueue", "--url", "/v1/sales", "--sell", sale]);
        assert!(result.is_err(), "accepted {sale}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_persists_action_in_configured_database() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let action = enqueue_action(
        &config,
        HttpMethod::Patch,
        " /v1/inventory/item-1 ",
        Some(r#"{"stock":4}"#),
        &[],
    )
    .await
    .unwrap();
    assert_eq!(action.url, "/v1/inventory/item-1");

    let db = Database::open(&config.db_path).await.unwrap();
    let stored = db.action_log().list_all().await.unwrap();
    assert_eq!(stored, vec![action]);
    run_queue(&config, true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_rejects_empty_url() {
    let dir = TempDir::new().unwrap();
    let result = enqueue_action(&test_config(&dir), HttpMethod::Post, "  ", None, &[]).await;
    assert!(matches!(result, Err(CliError::EmptyUrl)));
}

#[tokio::test(flavor = "multi_thread")]
async fn requeue_resolves_unique_prefix() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let action = enqueue_action(&config, HttpMethod::Post, "/v1/sales", None, &[])
        .await
        .unwrap();

    let db = Database::open(&config.db_path).await.unwrap();
    db.action_log()
        .mark_failed(&action.id, "HTTP 503: unavailable", 1)
        .await
        .unwrap();

    let prefix = action.id.to_string().chars().take(13).collect::<String>();
    let requeued = requeue_action(&config, &prefix).await.unwrap();
    assert_eq!(requeued.id, action.id);
    assert_eq!(requeued.status, ActionStatus::Pending);
    assert_eq!(requeued.retry_count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn requeue_rejects_pending_and_unknown_actions() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let action = enqueue_action(&config, HttpMethod::Post, "/v1/sales", None, &[])
        .await
        .unwrap();

    let result = requeue_action(&config, &action.id.to_string()).await;
    assert!(matches!(
        result,
        Err(CliError::Core(shopsync_core::Error::InvalidInput(_)))
    ));

    let result = requeue_action(&config, "ffffffff").await;
    assert!(matches!(result, Err(CliError::ActionNotFound(_))));
}

#[tokio::test]
async fn ambiguous_prefix_lists_candidates() {
    let log = MemoryActionLog::new();
    log.enqueue(NewAction::new(HttpMethod::Post, "/v1/sales"))
        .await
        .unwrap();
    let second = log
        .enqueue(NewAction::new(HttpMethod::Post, "/v1/sales"))
        .await
        .unwrap();

    let prefix = second.id.to_string().chars().take(4).collect::<String>();
    let result = resolve_action(&prefix, &log).await;
    assert!(matches!(result, Err(CliError::AmbiguousActionId(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_command_handles_empty_cache() {
    let dir = TempDir::new().unwrap();
    run_cache(&test_config(&dir), false, false).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueued_sale_is_reflected_in_cached_stock() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let db = open_database(&config).await.unwrap();
    let cache = InventoryCache::new(db.cache_store(), "T1");
    cache.resolve(Some(vec![item("a", 5)]), true).await.unwrap();

    enqueue_action(
        &config,
        HttpMethod::Post,
        "/v1/sales",
        Some(r#"{"itemId":"a","qty":2}"#),
        &[StockDelta::sale("a", 2)],
    )
    .await
    .unwrap();

    let stored = db.cache_store().get_all::<InventoryItem>("T1").await.unwrap();
    assert_eq!(stored, vec![item("a", 3)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_refresh_against_unreachable_server_keeps_cache() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let db = open_database(&config).await.unwrap();
    InventoryCache::new(db.cache_store(), "T1")
        .resolve(Some(vec![item("a", 5)]), true)
        .await
        .unwrap();

    run_cache(&config, true, false).await.unwrap();

    let stored = db.cache_store().get_all::<InventoryItem>("T1").await.unwrap();
    assert_eq!(stored, vec![item("a", 5)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn follow_signals_drains_then_refreshes_the_cache() {
    let processor = SyncProcessor::new(
        MemoryActionLog::new(),
        AcceptingTransport::default(),
        SyncPolicy::default(),
    );
    processor
        .enqueue(NewAction::new(HttpMethod::Post, "/v1/sales"))
        .await
        .unwrap();
    let db = Database::open_in_memory().await.unwrap();
    let cache = InventoryCache::new(db.cache_store(), "T1");
    let reader = FixedInventory(vec![item("a", 4)]);

    let (signal_tx, signals) = mpsc::channel(4);
    signal_tx.send(SyncSignal::Refresh).await.unwrap();
    drop(signal_tx);

    follow_signals(&processor, &cache, &reader, signals)
        .await
        .unwrap();

    assert!(processor.log().list_all().await.unwrap().is_empty());
    assert!(processor.status().fully_synced);
    assert_eq!(cache.current().await, vec![item("a", 4)]);
    let stored = db.cache_store().get_all::<InventoryItem>("T1").await.unwrap();
    assert_eq!(stored, vec![item("a", 4)]);
}
