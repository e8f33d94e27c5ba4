//! Retry backoff for failed queued actions

use std::time::Duration;

use crate::models::{ActionStatus, SyncAction};

/// Delay before the first retry
pub const BACKOFF_BASE: Duration = Duration::from_millis(1_500);
/// A permanently failing action is retried at most once per ceiling interval
pub const BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// `min(60s, 1.5s * 2^retry_count)`
pub fn backoff(retry_count: u32) -> Duration {
    let base = u64::try_from(BACKOFF_BASE.as_millis()).unwrap_or(u64::MAX);
    let ceiling = u64::try_from(BACKOFF_CEILING.as_millis()).unwrap_or(u64::MAX);
    let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    Duration::from_millis(base.saturating_mul(factor).min(ceiling))
}

/// Whether an action may be attempted at `now` (Unix ms).
///
/// Pending actions always are; failed actions once their backoff elapsed.
pub fn is_eligible(action: &SyncAction, now: i64) -> bool {
    match action.status {
        ActionStatus::Pending => true,
        ActionStatus::Failed => action.last_tried_at.map_or(true, |tried| {
            let wait = i64::try_from(backoff(action.retry_count).as_millis()).unwrap_or(i64::MAX);
            now.saturating_sub(tried) >= wait
        }),
        ActionStatus::Processing | ActionStatus::DeadLettered => false,
    }
}
