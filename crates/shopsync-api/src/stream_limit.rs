//! Caps how many change streams one user may hold open on a tenant.
//!
//! Every open stream pins a task and two timers, so a client that leaks
//! `EventSource` instances is refused instead of growing without bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::auth::user_fingerprint;
use crate::error::AppError;

/// Retry hint sent with a refused stream
const RETRY_AFTER_SECS: u64 = 5;

/// (tenant id, user id) -> streams currently held
type HeldStreams = Arc<Mutex<HashMap<(String, String), usize>>>;

#[derive(Debug, Clone)]
pub struct StreamLimiter {
    held: HeldStreams,
    max_per_user: usize,
}

/// One open stream's slot; released on drop
#[derive(Debug)]
pub struct StreamPermit {
    held: HeldStreams,
    key: (String, String),
}

impl StreamLimiter {
    pub fn new(max_per_user: usize) -> Self {
        Self {
            held: HeldStreams::default(),
            max_per_user,
        }
    }

    pub fn acquire(&self, tenant_id: &str, user_id: &str) -> Result<StreamPermit, AppError> {
        let key = (tenant_id.to_string(), user_id.to_string());
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let count = held.entry(key.clone()).or_insert(0);
        if *count >= self.max_per_user {
            tracing::warn!(
                tenant = tenant_id,
                user = user_fingerprint(user_id),
                open = *count,
                "Stream limit reached"
            );
            return Err(AppError::too_many_requests(
                format!(
                    "At most {} open change streams per user and tenant",
                    self.max_per_user
                ),
                RETRY_AFTER_SECS,
            ));
        }

        *count += 1;
        Ok(StreamPermit {
            held: self.held.clone(),
            key,
        })
    }

    /// Streams `user_id` holds on `tenant_id`
    pub fn held(&self, tenant_id: &str, user_id: &str) -> usize {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.get(&(tenant_id.to_string(), user_id.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for StreamPermit {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = held.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                held.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_streams_past_the_cap() {
        let limiter = StreamLimiter::new(2);
        let _first = limiter.acquire("T1", "user-a").unwrap();
        let _second = limiter.acquire("T1", "user-a").unwrap();

        let err = limiter.acquire("T1", "user-a").unwrap_err();
        assert!(matches!(err, AppError::TooManyRequests(_, RETRY_AFTER_SECS)));
        assert_eq!(limiter.held("T1", "user-a"), 2);
    }

    #[test]
    fn caps_are_per_user_and_tenant() {
        let limiter = StreamLimiter::new(1);
        let _a_t1 = limiter.acquire("T1", "user-a").unwrap();

        assert!(limiter.acquire("T1", "user-b").is_ok());
        assert!(limiter.acquire("T2", "user-a").is_ok());
        assert!(limiter.acquire("T1", "user-a").is_err());
    }

    #[test]
    fn dropped_permit_frees_its_slot() {
        let limiter = StreamLimiter::new(1);
        let permit = limiter.acquire("T1", "user-a").unwrap();
        drop(permit);

        assert_eq!(limiter.held("T1", "user-a"), 0);
        assert!(limiter.acquire("T1", "user-a").is_ok());
    }
}
