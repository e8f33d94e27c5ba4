//! Data models for the sync engine

mod action;
mod change;
mod inventory;

pub use action::{ActionId, ActionStatus, HttpMethod, NewAction, SyncAction};
pub use change::{ChangePayload, EVENT_FORCE_RESYNC, EVENT_HEARTBEAT, EVENT_SYNC_REQUIRED};
pub use inventory::{CachedEntity, InventoryItem, StockDelta};
