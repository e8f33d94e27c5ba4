//! Outbound sync: replaying the action log once the network is back

mod backoff;
mod processor;
mod transport;

pub use backoff::{backoff, is_eligible, BACKOFF_BASE, BACKOFF_CEILING};
pub use processor::{DrainOutcome, DrainReport, SyncPolicy, SyncProcessor, SyncStatus};
pub use transport::{HttpTransport, Transport, TransportError};
pub(crate) use transport::parse_api_error;
