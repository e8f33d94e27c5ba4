//! shopsync-core - client side of the shopsync offline sync engine
//!
//! This crate holds the durable action log, the read cache, the sync
//! processor that replays queued mutations, and the listener that reacts
//! to tenant change notifications. The API server reuses its wire models.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod listener;
pub mod models;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{ActionId, ActionStatus, HttpMethod, NewAction, SyncAction};
