//! Read path: live data when online, the persisted cache otherwise

mod reader;
mod reconciler;

pub use reader::{HttpInventoryReader, HttpReader, LiveReader, INVENTORY_PATH};
pub use reconciler::{CacheReconciler, CacheSource, CacheView, InventoryCache};
