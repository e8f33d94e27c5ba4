//! Read cache: last-known-good server state per tenant and entity type

use std::future::Future;

use libsql::Connection;

use crate::error::Result;
use crate::models::CachedEntity;
use crate::util::unix_millis_now;

/// Storage operations for cached server entities.
///
/// There is no TTL: a cached set stays valid until it is replaced.
pub trait CacheStore: Send + Sync {
    /// Replace the cached set of `T` for a tenant
    fn put<T: CachedEntity>(
        &self,
        tenant_id: &str,
        items: &[T],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Last written set of `T` for a tenant, in the order it was written
    fn get_all<T: CachedEntity>(&self, tenant_id: &str)
        -> impl Future<Output = Result<Vec<T>>> + Send;

    /// When the set of `entity_type` for a tenant was last written (Unix ms)
    fn cached_at(
        &self,
        tenant_id: &str,
        entity_type: &str,
    ) -> impl Future<Output = Result<Option<i64>>> + Send;
}

/// libSQL implementation of `CacheStore`
#[derive(Clone)]
pub struct LibSqlCacheStore {
    conn: Connection,
}

impl LibSqlCacheStore {
    /// Create a new cache store over the given connection
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    async fn replace_rows<T: CachedEntity>(
        &self,
        tenant_id: &str,
        items: &[T],
        cached_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM cache_entries WHERE tenant_id = ? AND entity_type = ?",
                [tenant_id, T::ENTITY_TYPE],
            )
            .await?;

        for (position, item) in items.iter().enumerate() {
            let payload = serde_json::to_string(item)?;
            self.conn
                .execute(
                    "INSERT INTO cache_entries
                        (tenant_id, entity_type, entity_id, position, payload, cached_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    libsql::params![
                        tenant_id,
                        T::ENTITY_TYPE,
                        item.entity_id(),
                        i64::try_from(position).unwrap_or(i64::MAX),
                        payload,
                        cached_at
                    ],
                )
                .await?;
        }
        Ok(())
    }
}

impl CacheStore for LibSqlCacheStore {
    async fn put<T: CachedEntity>(&self, tenant_id: &str, items: &[T]) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        if let Err(e) = self.replace_rows(tenant_id, items, unix_millis_now()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e);
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        tracing::debug!(
            tenant = tenant_id,
            entity_type = T::ENTITY_TYPE,
            count = items.len(),
            "Cached entities"
        );
        Ok(())
    }

    async fn get_all<T: CachedEntity>(&self, tenant_id: &str) -> Result<Vec<T>> {
        let mut rows = self
            .conn
            .query(
                "SELECT payload FROM cache_entries
                 WHERE tenant_id = ? AND entity_type = ?
                 ORDER BY position ASC",
                [tenant_id, T::ENTITY_TYPE],
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let payload: String = row.get(0)?;
            items.push(serde_json::from_str(&payload)?);
        }
        Ok(items)
    }

    async fn cached_at(&self, tenant_id: &str, entity_type: &str) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(cached_at) FROM cache_entries WHERE tenant_id = ? AND entity_type = ?",
                [tenant_id, entity_type],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<i64>>(0)?),
            None => Ok(None),
        }
    }
}
