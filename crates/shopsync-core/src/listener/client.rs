//! Client side of the change stream: keeps a connection open and turns
//! doorbell events into refresh signals

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::util::{join_url, non_blank, normalize_base_url};

use super::sse::SseDecoder;
use super::state::{ListenerMachine, ListenerState, SyncSignal, POLL_INTERVAL};

/// Path of the tenant change stream on the API
pub const EVENTS_PATH: &str = "/v1/events";

/// Longest wait for the server to answer a stream request
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(15);

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ListenerError>>;

type PendingOpen<'a> = BoxFuture<'a, Result<ByteStream, ListenerError>>;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Access denied to tenant change stream (HTTP {status})")]
    AccessDenied { status: u16 },
    #[error("Change stream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Change stream rejected with HTTP {status}")]
    Status { status: u16 },
    #[error("Change stream did not answer within {0:?}")]
    OpenTimedOut(Duration),
    #[error("Invalid listener configuration: {0}")]
    InvalidConfig(String),
}

impl ListenerError {
    /// Errors that retrying cannot fix
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AccessDenied { .. } | Self::InvalidConfig(_))
    }
}

/// Opens a fresh byte stream of server-sent events
pub trait EventSource: Send + Sync {
    fn open(&self) -> impl Future<Output = Result<ByteStream, ListenerError>> + Send;
}

impl<E: EventSource> EventSource for Arc<E> {
    async fn open(&self) -> Result<ByteStream, ListenerError> {
        self.as_ref().open().await
    }
}

/// reqwest-backed event source for one tenant
pub struct HttpEventSource {
    client: reqwest::Client,
    url: String,
    tenant_id: String,
    access_token: Option<String>,
}

impl HttpEventSource {
    pub fn new(
        base_url: &str,
        tenant_id: &str,
        access_token: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ListenerError> {
        let base_url = normalize_base_url(base_url).ok_or_else(|| {
            ListenerError::InvalidConfig(
                "API base URL must include http:// or https://".to_string(),
            )
        })?;
        let tenant_id = tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(ListenerError::InvalidConfig(
                "tenant id must not be empty".to_string(),
            ));
        }

        // No overall timeout: the response body never ends on its own.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            url: join_url(&base_url, EVENTS_PATH),
            tenant_id: tenant_id.to_string(),
            access_token: non_blank(access_token),
        })
    }
}

impl EventSource for HttpEventSource {
    async fn open(&self) -> Result<ByteStream, ListenerError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("tenantId", self.tenant_id.as_str())])
            .header("Accept", "text/event-stream");
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ListenerError::AccessDenied {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ListenerError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ListenerError::from))
            .boxed())
    }
}

/// Drives a `ListenerMachine` from a live event source.
///
/// Opening the stream runs alongside the focus and poll timers, so a server
/// that accepts the connection and then stalls cannot hold up refreshes.
pub struct SyncListener<E> {
    source: E,
    machine: ListenerMachine,
}

impl<E: EventSource> SyncListener<E> {
    pub fn new(source: E) -> Self {
        Self {
            source,
            machine: ListenerMachine::new(),
        }
    }

    /// Run until `signals` is closed or access is denied.
    ///
    /// `focus` reports whether the user is looking at the app; a closed
    /// focus channel leaves the last value in place.
    pub async fn run(
        self,
        signals: mpsc::Sender<SyncSignal>,
        mut focus: watch::Receiver<bool>,
    ) -> Result<(), ListenerError> {
        let Self {
            source,
            mut machine,
        } = self;
        let mut decoder = SseDecoder::new();
        let mut focus_open = true;
        let initial_focus = *focus.borrow_and_update();
        machine.on_focus_changed(initial_focus, Instant::now());

        let mut poll = tokio::time::interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stream: Option<ByteStream> = None;
        let mut opening = Some(open_with_timeout(&source));
        let mut pending = Vec::new();

        loop {
            for signal in pending.drain(..) {
                tracing::debug!(?signal, "Change stream signal");
                if signals.send(signal).await.is_err() {
                    return Ok(());
                }
            }

            tokio::select! {
                () = signals.closed() => return Ok(()),
                opened = next_open(&mut opening) => {
                    opening = None;
                    match opened {
                        Ok(opened) => {
                            stream = Some(opened);
                            push_signal(&mut pending, machine.on_stream_opened(Instant::now()));
                            tracing::info!("Change stream connected");
                        }
                        Err(error) if error.is_fatal() => {
                            tracing::warn!("Change stream refused: {error}");
                            return Err(error);
                        }
                        Err(error) => tracing::debug!("Change stream unavailable: {error}"),
                    }
                }
                chunk = next_chunk(&mut stream) => match chunk {
                    Some(Ok(bytes)) => {
                        let now = Instant::now();
                        for event in decoder.push(&bytes) {
                            push_signal(&mut pending, machine.on_event(&event, now));
                        }
                    }
                    Some(Err(error)) => {
                        tracing::warn!("Change stream failed: {error}; polling until reconnected");
                        stream = None;
                        decoder = SseDecoder::new();
                        machine.on_stream_error();
                        poll.reset();
                    }
                    None => {
                        tracing::warn!("Change stream closed by server; polling until reconnected");
                        stream = None;
                        decoder = SseDecoder::new();
                        machine.on_stream_error();
                        poll.reset();
                    }
                },
                _ = poll.tick() => {
                    if machine.state() == ListenerState::Reconnecting {
                        push_signal(&mut pending, machine.on_poll_tick(Instant::now()));
                        if opening.is_none() {
                            opening = Some(open_with_timeout(&source));
                        }
                    }
                }
                changed = focus.changed(), if focus_open => {
                    if changed.is_err() {
                        focus_open = false;
                    } else {
                        let focused = *focus.borrow_and_update();
                        push_signal(&mut pending, machine.on_focus_changed(focused, Instant::now()));
                    }
                }
            }
        }
    }
}

fn open_with_timeout<E: EventSource>(source: &E) -> PendingOpen<'_> {
    async move {
        tokio::time::timeout(OPEN_TIMEOUT, source.open())
            .await
            .unwrap_or(Err(ListenerError::OpenTimedOut(OPEN_TIMEOUT)))
    }
    .boxed()
}

/// Queue a signal, folding duplicate refreshes from the same wake-up
fn push_signal(pending: &mut Vec<SyncSignal>, signal: Option<SyncSignal>) {
    if let Some(signal) = signal {
        if !pending.contains(&signal) {
            pending.push(signal);
        }
    }
}

async fn next_open(opening: &mut Option<PendingOpen<'_>>) -> Result<ByteStream, ListenerError> {
    match opening {
        Some(opening) => opening.await,
        None => std::future::pending().await,
    }
}

async fn next_chunk(stream: &mut Option<ByteStream>) -> Option<Result<Vec<u8>, ListenerError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
