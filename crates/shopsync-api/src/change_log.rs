//! Shared, cross-process record of the latest change per tenant

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Builder, Connection, Database};
use shopsync_core::models::ChangePayload;
use tokio::sync::RwLock;

use crate::config::ChangeLogConfig;
use crate::error::AppError;

/// Latest-change record keyed by tenant.
///
/// Writes are unconditional overwrites; the record is advisory only.
#[async_trait]
pub trait ChangeLog: Send + Sync {
    async fn write(&self, change: &ChangePayload) -> Result<(), AppError>;

    async fn read(&self, tenant_id: &str) -> Result<Option<ChangePayload>, AppError>;
}

/// In-process record; other server instances cannot see it
#[derive(Debug, Clone, Default)]
pub struct MemoryChangeLog {
    records: Arc<RwLock<HashMap<String, ChangePayload>>>,
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangeLog for MemoryChangeLog {
    async fn write(&self, change: &ChangePayload) -> Result<(), AppError> {
        self.records
            .write()
            .await
            .insert(change.tenant_id.clone(), change.clone());
        Ok(())
    }

    async fn read(&self, tenant_id: &str) -> Result<Option<ChangePayload>, AppError> {
        Ok(self.records.read().await.get(tenant_id).cloned())
    }
}

/// libSQL-backed record, local file or remote database
pub struct LibSqlChangeLog {
    _db: Database,
    conn: Connection,
}

impl LibSqlChangeLog {
    pub async fn open_local(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|error| {
                    AppError::Config(format!("Cannot create change log directory: {error}"))
                })?;
            }
        }
        let db = Builder::new_local(path.to_string_lossy().to_string())
            .build()
            .await?;
        let log = Self::from_database(db).await?;
        // Several processes share the file.
        log.conn
            .execute("PRAGMA busy_timeout = 5000;", ())
            .await
            .ok();
        Ok(log)
    }

    pub async fn open_remote(url: &str, auth_token: &str) -> Result<Self, AppError> {
        let db = Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await?;
        Self::from_database(db).await
    }

    pub async fn open_in_memory() -> Result<Self, AppError> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self, AppError> {
        let conn = db.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tenant_changes (
                tenant_id TEXT PRIMARY KEY NOT NULL,
                updated_at INTEGER NOT NULL,
                entity TEXT NOT NULL
            )",
            (),
        )
        .await?;
        Ok(Self { _db: db, conn })
    }
}

#[async_trait]
impl ChangeLog for LibSqlChangeLog {
    async fn write(&self, change: &ChangePayload) -> Result<(), AppError> {
        self.conn
            .execute(
                "INSERT INTO tenant_changes (tenant_id, updated_at, entity)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                    updated_at = excluded.updated_at,
                    entity = excluded.entity",
                libsql::params![
                    change.tenant_id.as_str(),
                    change.updated_at,
                    change.entity.as_str()
                ],
            )
            .await?;
        Ok(())
    }

    async fn read(&self, tenant_id: &str) -> Result<Option<ChangePayload>, AppError> {
        let mut rows = self
            .conn
            .query(
                "SELECT updated_at, entity FROM tenant_changes WHERE tenant_id = ?1",
                [tenant_id],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(ChangePayload::new(
            tenant_id,
            row.get::<i64>(0)?,
            row.get::<String>(1)?,
        )))
    }
}

/// Open the change log named by configuration
pub async fn change_log_from_config(
    config: &ChangeLogConfig,
) -> Result<Arc<dyn ChangeLog>, AppError> {
    Ok(match config {
        ChangeLogConfig::Memory => {
            tracing::warn!("Using in-memory change log; run a single server instance only");
            Arc::new(MemoryChangeLog::new())
        }
        ChangeLogConfig::LocalFile(path) => {
            tracing::info!(path = %path.display(), "Using shared local change log");
            Arc::new(LibSqlChangeLog::open_local(path).await?)
        }
        ChangeLogConfig::Remote { url, auth_token } => {
            tracing::info!(url = %url, "Using remote change log");
            Arc::new(LibSqlChangeLog::open_remote(url, auth_token).await?)
        }
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    async fn overwrites_latest_change(log: &dyn ChangeLog) {
        assert_eq!(log.read("T1").await.unwrap(), None);

        log.write(&ChangePayload::new("T1", 10, "inventory"))
            .await
            .unwrap();
        log.write(&ChangePayload::new("T2", 11, "sales")).await.unwrap();
        log.write(&ChangePayload::new("T1", 12, "ledger")).await.unwrap();

        assert_eq!(
            log.read("T1").await.unwrap(),
            Some(ChangePayload::new("T1", 12, "ledger"))
        );
        assert_eq!(
            log.read("T2").await.unwrap(),
            Some(ChangePayload::new("T2", 11, "sales"))
        );
    }

    #[tokio::test]
    async fn memory_log_overwrites_latest_change() {
        overwrites_latest_change(&MemoryChangeLog::new()).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn libsql_log_overwrites_latest_change() {
        let log = LibSqlChangeLog::open_in_memory().await.unwrap();
        overwrites_latest_change(&log).await;
    }

    #[tokio::test]
    async fn memory_config_opens_memory_log() {
        let log = change_log_from_config(&ChangeLogConfig::Memory).await.unwrap();
        assert_eq!(log.read("T1").await.unwrap(), None);
    }
}
