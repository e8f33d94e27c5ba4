//! Change notification payloads shared by the notifier and the listener

use serde::{Deserialize, Serialize};

/// Event name of the keep-alive event
pub const EVENT_HEARTBEAT: &str = "heartbeat";
/// Event name telling subscribers to re-read tenant data
pub const EVENT_SYNC_REQUIRED: &str = "sync_required";
/// Event name telling subscribers to discard local state and fully reload
pub const EVENT_FORCE_RESYNC: &str = "force_resync";

/// "Tenant X changed at time T": a doorbell, never a data delta.
///
/// Two payloads for the same tenant are equivalent only when `updated_at`
/// is identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePayload {
    pub tenant_id: String,
    /// Unix ms
    pub updated_at: i64,
    /// Entity or source hint (e.g. `inventory`, `sales`)
    pub entity: String,
}

impl ChangePayload {
    pub fn new(tenant_id: impl Into<String>, updated_at: i64, entity: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            updated_at,
            entity: entity.into(),
        }
    }
}
