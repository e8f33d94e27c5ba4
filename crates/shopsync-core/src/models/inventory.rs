//! Inventory rows cached for offline reads

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A server-owned entity that can be kept in the read cache.
pub trait CachedEntity: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Entity type tag used to key the cache (e.g. `inventory`)
    const ENTITY_TYPE: &'static str;

    /// Stable identifier of this entity within its tenant
    fn entity_id(&self) -> String;
}

/// One inventory row as returned by the inventory read endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    pub sku: String,
    pub name: String,
    /// Units on hand; never negative in the cache
    pub stock: i64,
    #[serde(default)]
    pub unit_price_cents: i64,
}

impl InventoryItem {
    /// Reduce on-hand stock by `quantity`, clamping at zero
    pub fn apply_sale(&mut self, quantity: i64) {
        self.stock = self.stock.saturating_sub(quantity.max(0)).max(0);
    }
}

impl CachedEntity for InventoryItem {
    const ENTITY_TYPE: &'static str = "inventory";

    fn entity_id(&self) -> String {
        self.id.clone()
    }
}

/// A locally computable stock change caused by a queued sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDelta {
    pub item_id: String,
    pub quantity: i64,
}

impl StockDelta {
    pub fn sale(item_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
        }
    }
}
