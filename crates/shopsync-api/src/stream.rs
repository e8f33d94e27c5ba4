//! Event stream gateway: one task per open tenant stream.
//!
//! Each connection merges a heartbeat timer, a poll of the shared change
//! record (cross-process changes) and this instance's notifier (local
//! changes), de-duplicating by `updated_at`. A new connection has seen
//! nothing, so a change recorded while the client was away is announced
//! as soon as it opens.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use futures::Stream;
use shopsync_core::models::{ChangePayload, EVENT_HEARTBEAT, EVENT_SYNC_REQUIRED};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::change_log::ChangeLog;
use crate::stream_limit::StreamPermit;

const CONNECTION_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

/// What a connection emits, before SSE framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Heartbeat,
    SyncRequired(ChangePayload),
}

impl StreamMessage {
    fn into_event(self) -> Event {
        match self {
            Self::Heartbeat => Event::default().event(EVENT_HEARTBEAT).data(""),
            Self::SyncRequired(change) => {
                let data = serde_json::to_string(&change).unwrap_or_else(|_| "{}".to_string());
                Event::default().event(EVENT_SYNC_REQUIRED).data(data)
            }
        }
    }
}

/// Number of streams currently open on this instance
#[derive(Debug, Clone, Default)]
pub struct OpenStreams(Arc<AtomicUsize>);

impl OpenStreams {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn track(&self) -> OpenStreamGuard {
        self.0.fetch_add(1, Ordering::Relaxed);
        OpenStreamGuard(self.0.clone())
    }
}

struct OpenStreamGuard(Arc<AtomicUsize>);

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

struct TenantConnection {
    tenant_id: String,
    change_log: Arc<dyn ChangeLog>,
    local: broadcast::Receiver<ChangePayload>,
    settings: StreamSettings,
    last_delivered: Option<i64>,
    _guard: OpenStreamGuard,
    _permit: StreamPermit,
}

/// Start the connection task for `tenant_id` and return its message feed.
///
/// The caller must already have authorized the connection. Dropping the
/// receiver tears the connection down and releases `permit`.
pub fn open_tenant_stream(
    tenant_id: String,
    change_log: Arc<dyn ChangeLog>,
    local: broadcast::Receiver<ChangePayload>,
    settings: StreamSettings,
    open_streams: &OpenStreams,
    permit: StreamPermit,
) -> mpsc::Receiver<StreamMessage> {
    let connection = TenantConnection {
        tenant_id,
        change_log,
        local,
        settings,
        last_delivered: None,
        _guard: open_streams.track(),
        _permit: permit,
    };
    let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
    tokio::spawn(connection.run(tx));
    rx
}

/// Frame a message feed as a `text/event-stream` response
pub fn sse_response(
    mut messages: mpsc::Receiver<StreamMessage>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = futures::stream::poll_fn(move |cx| {
        messages
            .poll_recv(cx)
            .map(|message| message.map(|message| Ok::<_, Infallible>(message.into_event())))
    });
    Sse::new(stream)
}

impl TenantConnection {
    async fn run(mut self, tx: mpsc::Sender<StreamMessage>) {
        tracing::info!(tenant = %self.tenant_id, "Change stream opened");

        let start = Instant::now();
        let mut heartbeat = tokio::time::interval_at(
            start + self.settings.heartbeat_interval,
            self.settings.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = tokio::time::interval_at(
            start + self.settings.poll_interval,
            self.settings.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut local_open = true;

        if let Some(change) = self.read_shared().await {
            if !self.deliver(&tx, change).await {
                return;
            }
        }

        loop {
            let change = tokio::select! {
                () = tx.closed() => break,
                _ = heartbeat.tick() => {
                    if tx.send(StreamMessage::Heartbeat).await.is_err() {
                        break;
                    }
                    continue;
                }
                _ = poll.tick() => self.read_shared().await,
                received = self.local.recv(), if local_open => match received {
                    Ok(change) if change.tenant_id == self.tenant_id => Some(change),
                    Ok(_) => None,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(tenant = %self.tenant_id, skipped, "Local notifications lagged");
                        self.read_shared().await
                    }
                    Err(RecvError::Closed) => {
                        local_open = false;
                        None
                    }
                },
            };

            if let Some(change) = change {
                if !self.deliver(&tx, change).await {
                    break;
                }
            }
        }

        tracing::info!(tenant = %self.tenant_id, "Change stream closed");
    }

    async fn read_shared(&self) -> Option<ChangePayload> {
        match self.change_log.read(&self.tenant_id).await {
            Ok(change) => change,
            Err(error) => {
                tracing::warn!(tenant = %self.tenant_id, "Change record read failed: {error}");
                None
            }
        }
    }

    /// Returns `false` once the client is gone
    async fn deliver(&mut self, tx: &mpsc::Sender<StreamMessage>, change: ChangePayload) -> bool {
        if self.last_delivered == Some(change.updated_at) {
            return true;
        }
        self.last_delivered = Some(change.updated_at);
        tx.send(StreamMessage::SyncRequired(change)).await.is_ok()
    }
}
