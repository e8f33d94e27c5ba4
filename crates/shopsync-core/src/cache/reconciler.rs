use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::db::CacheStore;
use crate::error::Result;
use crate::models::{CachedEntity, InventoryItem, StockDelta};

use super::reader::LiveReader;

/// Where the values handed to the UI came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Live,
    Cache,
}

/// Values to render plus the connectivity they were resolved under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheView<T> {
    pub data: Vec<T>,
    pub is_online: bool,
    pub source: CacheSource,
}

/// Keeps one tenant's cached set of `T` in step with live reads.
///
/// The in-memory copy mirrors what was last persisted, so callers can
/// render without touching storage.
pub struct CacheReconciler<S, T> {
    store: S,
    tenant_id: String,
    current: Mutex<Vec<T>>,
}

pub type InventoryCache<S> = CacheReconciler<S, InventoryItem>;

impl<S: CacheStore, T: CachedEntity> CacheReconciler<S, T> {
    pub fn new(store: S, tenant_id: impl Into<String>) -> Self {
        Self {
            store,
            tenant_id: tenant_id.into(),
            current: Mutex::new(Vec::new()),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Hydrate the in-memory copy from storage
    pub async fn load(&self) -> Result<Vec<T>> {
        let mut current = self.current.lock().await;
        *current = self.store.get_all::<T>(&self.tenant_id).await?;
        Ok(current.clone())
    }

    /// Last values handed out
    pub async fn current(&self) -> Vec<T> {
        self.current.lock().await.clone()
    }

    /// When the cached set was last replaced (Unix ms)
    pub async fn cached_at(&self) -> Result<Option<i64>> {
        self.store.cached_at(&self.tenant_id, T::ENTITY_TYPE).await
    }

    /// Pick what to show for a read.
    ///
    /// A non-empty live result while online replaces the cache. Offline, or
    /// when the live read came back empty or missing, the cache is served.
    pub async fn resolve(&self, live: Option<Vec<T>>, is_online: bool) -> Result<CacheView<T>> {
        let mut current = self.current.lock().await;

        if is_online {
            if let Some(live) = live.filter(|items| !items.is_empty()) {
                self.store.put(&self.tenant_id, &live).await?;
                tracing::debug!(
                    tenant = %self.tenant_id,
                    entity = T::ENTITY_TYPE,
                    count = live.len(),
                    "Cached live read"
                );
                current.clone_from(&live);
                return Ok(CacheView {
                    data: live,
                    is_online,
                    source: CacheSource::Live,
                });
            }
        }

        *current = self.store.get_all::<T>(&self.tenant_id).await?;
        Ok(CacheView {
            data: current.clone(),
            is_online,
            source: CacheSource::Cache,
        })
    }

    /// Run the read path once: fetch live values and reconcile them.
    ///
    /// A server that cannot be reached counts as offline. One that answers
    /// with an error is online, but the cache is still what gets served.
    pub async fn refresh<R: LiveReader<T>>(&self, reader: &R) -> Result<CacheView<T>> {
        match reader.fetch().await {
            Ok(live) => self.resolve(Some(live), true).await,
            Err(error) => {
                tracing::warn!(
                    tenant = %self.tenant_id,
                    entity = T::ENTITY_TYPE,
                    "Live read failed: {error}"
                );
                self.resolve(None, !error.is_unreachable()).await
            }
        }
    }
}

impl<S: CacheStore> CacheReconciler<S, InventoryItem> {
    /// Optimistically subtract sold quantities from cached stock.
    ///
    /// Stock clamps at zero. Deltas for items not in the cache are ignored;
    /// the next live read overwrites all of this anyway.
    pub async fn apply_local_sale(&self, deltas: &[StockDelta]) -> Result<Vec<InventoryItem>> {
        let mut current = self.current.lock().await;
        if current.is_empty() {
            *current = self.store.get_all::<InventoryItem>(&self.tenant_id).await?;
        }

        let mut sold: HashMap<&str, i64> = HashMap::new();
        for delta in deltas {
            let total = sold.entry(delta.item_id.as_str()).or_default();
            *total = total.saturating_add(delta.quantity.max(0));
        }

        let mut updated = current.clone();
        let mut touched = 0usize;
        for item in &mut updated {
            if let Some(quantity) = sold.get(item.id.as_str()) {
                item.apply_sale(*quantity);
                touched += 1;
            }
        }

        if touched > 0 {
            self.store.put(&self.tenant_id, &updated).await?;
            *current = updated;
        }
        tracing::debug!(tenant = %self.tenant_id, touched, "Applied local sale to cache");
        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::{Database, LibSqlCacheStore};
    use crate::sync::TransportError;

    /// Serves a fixed answer to every read
    struct FixedReader(std::result::Result<Vec<InventoryItem>, u16>);

    impl LiveReader<InventoryItem> for FixedReader {
        async fn fetch(&self) -> std::result::Result<Vec<InventoryItem>, TransportError> {
            self.0.clone().map_err(|status| TransportError::Status {
                status,
                message: "scripted".to_string(),
            })
        }
    }

    fn item(id: &str, stock: i64) -> InventoryItem {
        InventoryItem {
            id: id.to_string(),
            sku: format!("SKU-{id}"),
            name: format!("Item {id}"),
            stock,
            unit_price_cents: 100,
        }
    }

    fn cache(db: &Database, tenant: &str) -> InventoryCache<LibSqlCacheStore> {
        CacheReconciler::new(db.cache_store(), tenant)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn live_read_is_persisted_and_served() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = cache(&db, "T1");
        let live = vec![item("a", 5), item("b", 1)];

        let view = cache.resolve(Some(live.clone()), true).await.unwrap();
        assert_eq!(view.source, CacheSource::Live);
        assert_eq!(view.data, live);
        assert!(view.is_online);

        let stored = db.cache_store().get_all::<InventoryItem>("T1").await.unwrap();
        assert_eq!(stored, live);
        assert!(cache.cached_at().await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_serves_cache_and_ignores_live() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = cache(&db, "T1");
        cache.resolve(Some(vec![item("a", 5)]), true).await.unwrap();

        let view = cache.resolve(Some(vec![item("z", 9)]), false).await.unwrap();
        assert_eq!(view.source, CacheSource::Cache);
        assert!(!view.is_online);
        assert_eq!(view.data, vec![item("a", 5)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_live_read_falls_back_to_cache() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = cache(&db, "T1");
        cache.resolve(Some(vec![item("a", 5)]), true).await.unwrap();

        let view = cache.resolve(Some(Vec::new()), true).await.unwrap();
        assert_eq!(view.source, CacheSource::Cache);
        assert_eq!(view.data, vec![item("a", 5)]);

        let view = cache.resolve(None, true).await.unwrap();
        assert_eq!(view.data, vec![item("a", 5)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_reconciler_sees_previous_session_cache() {
        let db = Database::open_in_memory().await.unwrap();
        cache(&db, "T1")
            .resolve(Some(vec![item("a", 5)]), true)
            .await
            .unwrap();

        let reopened = cache(&db, "T1");
        assert_eq!(reopened.load().await.unwrap(), vec![item("a", 5)]);
        assert_eq!(reopened.current().await, vec![item("a", 5)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_sale_reduces_stock_and_persists() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = cache(&db, "T1");
        cache
            .resolve(Some(vec![item("a", 5), item("b", 3)]), true)
            .await
            .unwrap();

        let updated = cache
            .apply_local_sale(&[StockDelta::sale("a", 2), StockDelta::sale("a", 1)])
            .await
            .unwrap();
        assert_eq!(updated, vec![item("a", 2), item("b", 3)]);

        let stored = db.cache_store().get_all::<InventoryItem>("T1").await.unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversold_stock_clamps_at_zero() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = cache(&db, "T1");
        cache.resolve(Some(vec![item("a", 2)]), true).await.unwrap();

        for _ in 0..3 {
            let updated = cache
                .apply_local_sale(&[StockDelta::sale("a", 5), StockDelta::sale("missing", 1)])
                .await
                .unwrap();
            assert_eq!(updated, vec![item("a", 0)]);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn next_live_read_replaces_optimistic_values() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = cache(&db, "T1");
        cache.resolve(Some(vec![item("a", 5)]), true).await.unwrap();
        cache.apply_local_sale(&[StockDelta::sale("a", 4)]).await.unwrap();

        let view = cache.resolve(Some(vec![item("a", 3)]), true).await.unwrap();
        assert_eq!(view.data, vec![item("a", 3)]);
        assert_eq!(cache.current().await, vec![item("a", 3)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_caches_what_the_server_returns() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = cache(&db, "T1");

        let view = cache
            .refresh(&FixedReader(Ok(vec![item("a", 5)])))
            .await
            .unwrap();
        assert_eq!(view.source, CacheSource::Live);

        let stored = db.cache_store().get_all::<InventoryItem>("T1").await.unwrap();
        assert_eq!(stored, vec![item("a", 5)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_serves_cache_when_the_read_fails() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = cache(&db, "T1");
        cache.resolve(Some(vec![item("a", 5)]), true).await.unwrap();

        let view = cache.refresh(&FixedReader(Err(503))).await.unwrap();
        assert_eq!(view.source, CacheSource::Cache);
        assert!(view.is_online);
        assert_eq!(view.data, vec![item("a", 5)]);
    }
}
