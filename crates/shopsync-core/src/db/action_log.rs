//! Durable action log: the client's persistent queue of unsent mutations

use std::future::Future;
use std::sync::Arc;

use libsql::{Connection, Value};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{ActionId, ActionStatus, NewAction, SyncAction};
use crate::sync::is_eligible;
use crate::util::unix_millis_now;

/// Per-status counts of the queue, used for the sync status indicator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl QueueCounts {
    /// Actions that still have to reach the server
    pub const fn outstanding(&self) -> usize {
        self.pending + self.processing + self.failed + self.dead_lettered
    }

    fn add(&mut self, status: ActionStatus, count: usize) {
        let slot = match status {
            ActionStatus::Pending => &mut self.pending,
            ActionStatus::Processing => &mut self.processing,
            ActionStatus::Failed => &mut self.failed,
            ActionStatus::DeadLettered => &mut self.dead_lettered,
        };
        *slot += count;
    }
}

/// Storage operations for queued mutations.
///
/// Every per-id update is atomic. An action is either absent or present
/// with exactly one status; nothing is ever dropped silently.
pub trait ActionLog: Send + Sync {
    /// Append a `pending` action stamped with the current time
    fn enqueue(&self, request: NewAction) -> impl Future<Output = Result<SyncAction>> + Send;

    /// `pending` actions plus backoff-eligible `failed` ones, oldest first
    fn list_eligible(&self, now: i64) -> impl Future<Output = Result<Vec<SyncAction>>> + Send;

    /// Every action in the log, oldest first
    fn list_all(&self) -> impl Future<Output = Result<Vec<SyncAction>>> + Send;

    fn get(&self, id: &ActionId) -> impl Future<Output = Result<Option<SyncAction>>> + Send;

    /// Claim an action for sending. Returns `false` if it was not claimable
    /// (already processing, dead-lettered, or gone).
    fn mark_processing(&self, id: &ActionId) -> impl Future<Output = Result<bool>> + Send;

    /// Remove a successfully replayed action
    fn mark_succeeded(&self, id: &ActionId) -> impl Future<Output = Result<()>> + Send;

    /// Record a failed attempt: bump `retry_count`, stamp `last_tried_at`
    fn mark_failed(
        &self,
        id: &ActionId,
        error: &str,
        now: i64,
    ) -> impl Future<Output = Result<SyncAction>> + Send;

    /// Stop retrying an action automatically
    fn mark_dead_lettered(&self, id: &ActionId) -> impl Future<Output = Result<()>> + Send;

    /// Return a failed or dead-lettered action to `pending` with a fresh retry count
    fn requeue(&self, id: &ActionId) -> impl Future<Output = Result<SyncAction>> + Send;

    /// Return actions stranded in `processing` by a crashed run to `pending`
    fn recover_interrupted(&self) -> impl Future<Output = Result<u64>> + Send;

    fn counts(&self) -> impl Future<Output = Result<QueueCounts>> + Send;
}

const ACTION_COLUMNS: &str =
    "id, url, method, body, status, retry_count, created_at, last_tried_at, error";

/// libSQL implementation of `ActionLog`
#[derive(Clone)]
pub struct LibSqlActionLog {
    conn: Connection,
}

impl LibSqlActionLog {
    /// Create a new log over the given connection
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn parse_action(row: &libsql::Row) -> Result<SyncAction> {
        let id: String = row.get(0)?;
        let method: String = row.get(2)?;
        let body: Option<String> = row.get(3)?;
        let status: String = row.get(4)?;
        let retry_count: i64 = row.get(5)?;

        Ok(SyncAction {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid action id `{id}`")))?,
            url: row.get(1)?,
            method: method.parse()?,
            body: body.as_deref().map(serde_json::from_str).transpose()?,
            status: status.parse()?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            created_at: row.get(6)?,
            last_tried_at: row.get(7)?,
            error: row.get(8)?,
        })
    }

    async fn query_actions(&self, sql: &str) -> Result<Vec<SyncAction>> {
        let mut rows = self.conn.query(sql, ()).await?;
        let mut actions = Vec::new();
        while let Some(row) = rows.next().await? {
            actions.push(Self::parse_action(&row)?);
        }
        Ok(actions)
    }

    async fn require(&self, id: &ActionId) -> Result<SyncAction> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("queued action {id}")))
    }
}

impl ActionLog for LibSqlActionLog {
    async fn enqueue(&self, request: NewAction) -> Result<SyncAction> {
        let action = SyncAction::from_request(request, unix_millis_now());
        let body = action
            .body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?
            .map_or(Value::Null, Value::Text);

        self.conn
            .execute(
                "INSERT INTO sync_actions (id, url, method, body, status, retry_count, created_at)
                 VALUES (?, ?, ?, ?, ?, 0, ?)",
                libsql::params![
                    action.id.as_str(),
                    action.url.as_str(),
                    action.method.as_str(),
                    body,
                    action.status.as_str(),
                    action.created_at
                ],
            )
            .await?;

        tracing::debug!(action_id = %action.id, method = %action.method, url = %action.url, "Queued action");
        Ok(action)
    }

    async fn list_eligible(&self, now: i64) -> Result<Vec<SyncAction>> {
        let candidates = self
            .query_actions(&format!(
                "SELECT {ACTION_COLUMNS} FROM sync_actions
                 WHERE status IN ('pending', 'failed')
                 ORDER BY created_at ASC, rowid ASC"
            ))
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|action| is_eligible(action, now))
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<SyncAction>> {
        self.query_actions(&format!(
            "SELECT {ACTION_COLUMNS} FROM sync_actions ORDER BY created_at ASC, rowid ASC"
        ))
        .await
    }

    async fn get(&self, id: &ActionId) -> Result<Option<SyncAction>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ACTION_COLUMNS} FROM sync_actions WHERE id = ?"),
                [id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_action(&row)?)),
            None => Ok(None),
        }
    }

    async fn mark_processing(&self, id: &ActionId) -> Result<bool> {
        let claimed = self
            .conn
            .execute(
                "UPDATE sync_actions SET status = 'processing'
                 WHERE id = ? AND status IN ('pending', 'failed')",
                [id.as_str()],
            )
            .await?;
        Ok(claimed == 1)
    }

    async fn mark_succeeded(&self, id: &ActionId) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_actions WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: &ActionId, error: &str, now: i64) -> Result<SyncAction> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_actions
                 SET status = 'failed', retry_count = retry_count + 1, last_tried_at = ?, error = ?
                 WHERE id = ?",
                libsql::params![now, error, id.as_str()],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("queued action {id}")));
        }
        self.require(id).await
    }

    async fn mark_dead_lettered(&self, id: &ActionId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_actions SET status = 'dead_lettered' WHERE id = ?",
                [id.as_str()],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("queued action {id}")));
        }
        Ok(())
    }

    async fn requeue(&self, id: &ActionId) -> Result<SyncAction> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_actions
                 SET status = 'pending', retry_count = 0, last_tried_at = NULL
                 WHERE id = ? AND status IN ('failed', 'dead_lettered')",
                [id.as_str()],
            )
            .await?;
        if rows == 0 {
            let existing = self.require(id).await?;
            return Err(Error::InvalidInput(format!(
                "Action {id} is {} and cannot be requeued",
                existing.status
            )));
        }
        self.require(id).await
    }

    async fn recover_interrupted(&self) -> Result<u64> {
        let recovered = self
            .conn
            .execute(
                "UPDATE sync_actions SET status = 'pending' WHERE status = 'processing'",
                (),
            )
            .await?;
        Ok(recovered)
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM sync_actions GROUP BY status",
                (),
            )
            .await?;
        let mut counts = QueueCounts::default();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.add(status.parse()?, usize::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }
}

/// In-memory `ActionLog` for sessions where local storage is unavailable.
///
/// Keeps the same semantics as the durable log but loses everything on crash.
#[derive(Clone, Default)]
pub struct MemoryActionLog {
    actions: Arc<Mutex<Vec<SyncAction>>>,
}

impl MemoryActionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_fifo(mut actions: Vec<SyncAction>) -> Vec<SyncAction> {
    // Stable sort keeps insertion order for equal timestamps.
    actions.sort_by_key(|action| action.created_at);
    actions
}

impl ActionLog for MemoryActionLog {
    async fn enqueue(&self, request: NewAction) -> Result<SyncAction> {
        let action = SyncAction::from_request(request, unix_millis_now());
        self.actions.lock().await.push(action.clone());
        Ok(action)
    }

    async fn list_eligible(&self, now: i64) -> Result<Vec<SyncAction>> {
        let actions = self.actions.lock().await.clone();
        Ok(sorted_fifo(actions)
            .into_iter()
            .filter(|action| {
                matches!(action.status, ActionStatus::Pending | ActionStatus::Failed)
                    && is_eligible(action, now)
            })
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<SyncAction>> {
        Ok(sorted_fifo(self.actions.lock().await.clone()))
    }

    async fn get(&self, id: &ActionId) -> Result<Option<SyncAction>> {
        let actions = self.actions.lock().await;
        Ok(actions.iter().find(|action| action.id == *id).cloned())
    }

    async fn mark_processing(&self, id: &ActionId) -> Result<bool> {
        let mut actions = self.actions.lock().await;
        let Some(action) = actions.iter_mut().find(|action| action.id == *id) else {
            return Ok(false);
        };
        if matches!(action.status, ActionStatus::Pending | ActionStatus::Failed) {
            action.status = ActionStatus::Processing;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn mark_succeeded(&self, id: &ActionId) -> Result<()> {
        self.actions.lock().await.retain(|action| action.id != *id);
        Ok(())
    }

    async fn mark_failed(&self, id: &ActionId, error: &str, now: i64) -> Result<SyncAction> {
        let mut actions = self.actions.lock().await;
        let action = actions
            .iter_mut()
            .find(|action| action.id == *id)
            .ok_or_else(|| Error::NotFound(format!("queued action {id}")))?;
        action.status = ActionStatus::Failed;
        action.retry_count = action.retry_count.saturating_add(1);
        action.last_tried_at = Some(now);
        action.error = Some(error.to_string());
        Ok(action.clone())
    }

    async fn mark_dead_lettered(&self, id: &ActionId) -> Result<()> {
        let mut actions = self.actions.lock().await;
        let action = actions
            .iter_mut()
            .find(|action| action.id == *id)
            .ok_or_else(|| Error::NotFound(format!("queued action {id}")))?;
        action.status = ActionStatus::DeadLettered;
        Ok(())
    }

    async fn requeue(&self, id: &ActionId) -> Result<SyncAction> {
        let mut actions = self.actions.lock().await;
        let action = actions
            .iter_mut()
            .find(|action| action.id == *id)
            .ok_or_else(|| Error::NotFound(format!("queued action {id}")))?;
        if !matches!(
            action.status,
            ActionStatus::Failed | ActionStatus::DeadLettered
        ) {
            return Err(Error::InvalidInput(format!(
                "Action {id} is {} and cannot be requeued",
                action.status
            )));
        }
        action.status = ActionStatus::Pending;
        action.retry_count = 0;
        action.last_tried_at = None;
        Ok(action.clone())
    }

    async fn recover_interrupted(&self) -> Result<u64> {
        let mut actions = self.actions.lock().await;
        let mut recovered = 0;
        for action in actions
            .iter_mut()
            .filter(|action| action.status == ActionStatus::Processing)
        {
            action.status = ActionStatus::Pending;
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let actions = self.actions.lock().await;
        let mut counts = QueueCounts::default();
        for action in actions.iter() {
            counts.add(action.status, 1);
        }
        Ok(counts)
    }
}
