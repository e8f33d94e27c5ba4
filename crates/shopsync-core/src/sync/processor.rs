//! Sync processor: drains the action log against the network

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::db::{ActionLog, QueueCounts};
use crate::error::Result;
use crate::models::{ActionId, NewAction, SyncAction};
use crate::util::unix_millis_now;

use super::transport::Transport;

/// Retry policy for the processor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Attempts after which an action is dead-lettered instead of retried.
    /// `None` retries forever at the backoff ceiling.
    pub max_attempts: Option<u32>,
}

/// Aggregate state surfaced to the status indicator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub pending: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    /// The log is empty
    pub fully_synced: bool,
}

impl SyncStatus {
    fn from_counts(counts: QueueCounts, is_syncing: bool) -> Self {
        Self {
            is_syncing,
            pending: counts.pending + counts.processing,
            failed: counts.failed,
            dead_lettered: counts.dead_lettered,
            fully_synced: counts.outstanding() == 0,
        }
    }
}

/// What one pass over the log did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain was in flight; nothing was sent
    AlreadyRunning,
    Completed(DrainReport),
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Replays queued actions in FIFO order, one at a time.
///
/// At most one drain runs at once; a start request during a drain is a no-op.
pub struct SyncProcessor<L, T> {
    log: L,
    transport: T,
    policy: SyncPolicy,
    draining: AtomicBool,
    status: watch::Sender<SyncStatus>,
    clock: Clock,
}

/// Clears the draining flag even if the drain bails out early
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<L: ActionLog, T: Transport> SyncProcessor<L, T> {
    pub fn new(log: L, transport: T, policy: SyncPolicy) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            log,
            transport,
            policy,
            draining: AtomicBool::new(false),
            status,
            clock: Arc::new(unix_millis_now),
        }
    }

    /// Replace the wall clock used for backoff decisions
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub const fn log(&self) -> &L {
        &self.log
    }

    /// Durably queue a mutation for replay
    pub async fn enqueue(&self, request: NewAction) -> Result<SyncAction> {
        let action = self.log.enqueue(request).await?;
        self.refresh_status().await?;
        Ok(action)
    }

    /// Return a failed or dead-lettered action to the queue
    pub async fn requeue(&self, id: &ActionId) -> Result<SyncAction> {
        let action = self.log.requeue(id).await?;
        tracing::info!(action_id = %id, "Requeued action");
        self.refresh_status().await?;
        Ok(action)
    }

    pub fn is_syncing(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Latest published status
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Recompute and publish the status from the log
    pub async fn refresh_status(&self) -> Result<SyncStatus> {
        let counts = self.log.counts().await?;
        let status = SyncStatus::from_counts(counts, self.is_syncing());
        self.status.send_replace(status);
        Ok(status)
    }

    /// Drain every eligible action once, oldest first.
    ///
    /// Per-action failures become action state; only storage errors escape.
    pub async fn process_queue(&self) -> Result<DrainOutcome> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already in flight; ignoring start request");
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let guard = DrainGuard(&self.draining);
        self.status.send_modify(|status| status.is_syncing = true);

        let result = self.drain().await;
        drop(guard);

        let status = self.refresh_status().await?;
        let report = result?;
        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                fully_synced = status.fully_synced,
                "Drain finished"
            );
        }
        Ok(DrainOutcome::Completed(report))
    }

    async fn drain(&self) -> Result<DrainReport> {
        // Only this drain can hold actions in `processing`, so any left over
        // come from a crash between send and bookkeeping.
        let recovered = self.log.recover_interrupted().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Recovered actions interrupted mid-send");
        }

        let eligible = self.log.list_eligible((self.clock)()).await?;
        let mut report = DrainReport::default();

        for action in eligible {
            if !self.log.mark_processing(&action.id).await? {
                continue;
            }
            report.attempted += 1;

            match self.transport.send(&action).await {
                Ok(()) => {
                    self.log.mark_succeeded(&action.id).await?;
                    report.succeeded += 1;
                    tracing::debug!(action_id = %action.id, url = %action.url, "Replayed action");
                }
                Err(error) => {
                    let message = error.to_string();
                    let failed = self
                        .log
                        .mark_failed(&action.id, &message, (self.clock)())
                        .await?;
                    report.failed += 1;

                    if self
                        .policy
                        .max_attempts
                        .is_some_and(|cap| failed.retry_count >= cap)
                    {
                        self.log.mark_dead_lettered(&action.id).await?;
                        report.dead_lettered += 1;
                        tracing::warn!(
                            action_id = %action.id,
                            retry_count = failed.retry_count,
                            error = %message,
                            "Action dead-lettered after repeated failures"
                        );
                    } else {
                        tracing::debug!(
                            action_id = %action.id,
                            retry_count = failed.retry_count,
                            error = %message,
                            "Replay failed; will retry after backoff"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    async fn drain_logged(&self) {
        if let Err(error) = self.process_queue().await {
            tracing::warn!("Drain aborted by storage error: {error}");
        }
    }

    /// Drive the processor from connectivity changes until `online`'s sender
    /// is dropped.
    ///
    /// Drains on every offline→online transition and on each `retry_tick`
    /// while online, so backed-off failures are picked up again.
    pub async fn run(&self, mut online: watch::Receiver<bool>, retry_tick: Duration) {
        if let Err(error) = self.refresh_status().await {
            tracing::warn!("Could not read queue status: {error}");
        }

        let mut was_online = *online.borrow_and_update();
        if was_online {
            self.drain_logged().await;
        }

        let mut ticker = tokio::time::interval(retry_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *online.borrow_and_update();
                    if now_online && !was_online {
                        tracing::info!("Connectivity restored; draining action log");
                        self.drain_logged().await;
                    } else if !now_online && was_online {
                        tracing::info!("Connectivity lost; queueing locally");
                    }
                    was_online = now_online;
                }
                _ = ticker.tick() => {
                    if was_online {
                        self.drain_logged().await;
                    }
                }
            }
        }
    }
}
