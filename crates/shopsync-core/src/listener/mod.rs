//! Client sync listener: reacts to tenant change notifications

mod client;
mod sse;
mod state;

pub use client::{
    ByteStream, EventSource, HttpEventSource, ListenerError, SyncListener, EVENTS_PATH, OPEN_TIMEOUT,
};
pub use sse::{SseDecoder, SseEvent};
pub use state::{ListenerMachine, ListenerState, SyncSignal, POLL_INTERVAL, REFRESH_THROTTLE};
