//! Change notifier: records a tenant change for every server instance and
//! wakes this instance's subscribers immediately

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use shopsync_core::models::ChangePayload;
use tokio::sync::broadcast;

use crate::change_log::ChangeLog;

const LOCAL_CHANNEL_CAPACITY: usize = 256;

pub struct ChangeNotifier {
    change_log: Arc<dyn ChangeLog>,
    sender: broadcast::Sender<ChangePayload>,
    last_issued: AtomicI64,
}

impl ChangeNotifier {
    pub fn new(change_log: Arc<dyn ChangeLog>) -> Self {
        let (sender, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        Self {
            change_log,
            sender,
            last_issued: AtomicI64::new(0),
        }
    }

    pub fn change_log(&self) -> Arc<dyn ChangeLog> {
        self.change_log.clone()
    }

    /// Subscribe to changes published by this instance
    pub fn subscribe(&self) -> broadcast::Receiver<ChangePayload> {
        self.sender.subscribe()
    }

    /// Announce that `tenant_id` changed.
    ///
    /// Both halves are best-effort: a failed shared write is logged and the
    /// local subscribers are still woken. Never fails the caller.
    pub async fn publish(&self, tenant_id: &str, entity: &str) -> ChangePayload {
        let payload = ChangePayload::new(tenant_id, self.next_timestamp(), entity);

        if let Err(error) = self.change_log.write(&payload).await {
            tracing::warn!(
                tenant = tenant_id,
                entity,
                "Shared change record write failed: {error}"
            );
        }

        // No receivers is fine.
        let _ = self.sender.send(payload.clone());
        tracing::debug!(
            tenant = tenant_id,
            entity,
            updated_at = payload.updated_at,
            "Published tenant change"
        );
        payload
    }

    /// Wall-clock ms, bumped past the previous value so two publishes in
    /// the same millisecond stay distinguishable
    fn next_timestamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut previous = self.last_issued.load(Ordering::Acquire);
        loop {
            let next = now.max(previous.saturating_add(1));
            match self.last_issued.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }
}
