pub mod cache;
pub mod common;
pub mod enqueue;
pub mod listen;
pub mod queue;
pub mod requeue;
pub mod sync;
