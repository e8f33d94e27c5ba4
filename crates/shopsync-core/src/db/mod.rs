//! Local storage for the client: durable action log and read cache

mod action_log;
mod cache_store;
mod connection;
mod migrations;

pub use action_log::{ActionLog, LibSqlActionLog, MemoryActionLog, QueueCounts};
pub use cache_store::{CacheStore, LibSqlCacheStore};
pub use connection::Database;
