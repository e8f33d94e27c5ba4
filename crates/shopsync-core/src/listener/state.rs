//! Listener state machine, kept free of I/O so timing rules are testable

use std::time::Duration;

use tokio::time::Instant;

use crate::models::{EVENT_FORCE_RESYNC, EVENT_SYNC_REQUIRED};

use super::sse::SseEvent;

/// Fallback poll interval while the stream is down
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Minimum gap between poll-driven refreshes
pub const REFRESH_THROTTLE: Duration = Duration::from_secs(25);

/// What the application should do with its read path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// Re-run the read path
    Refresh,
    /// Drop local view state and reload everything
    FullReload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connected,
    /// Stream is down; polling until it can be reopened
    Reconnecting,
}

#[derive(Debug)]
pub struct ListenerMachine {
    state: ListenerState,
    has_focus: bool,
    ever_connected: bool,
    last_refresh: Option<Instant>,
}

impl Default for ListenerMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerMachine {
    /// Starts out disconnected, with focus
    pub const fn new() -> Self {
        Self {
            state: ListenerState::Reconnecting,
            has_focus: true,
            ever_connected: false,
            last_refresh: None,
        }
    }

    pub const fn state(&self) -> ListenerState {
        self.state
    }

    pub const fn has_focus(&self) -> bool {
        self.has_focus
    }

    /// A stream was (re)opened. After an outage, refresh once to cover
    /// anything missed while disconnected.
    pub fn on_stream_opened(&mut self, now: Instant) -> Option<SyncSignal> {
        let reconnected = self.ever_connected && self.state == ListenerState::Reconnecting;
        self.state = ListenerState::Connected;
        self.ever_connected = true;
        reconnected.then(|| self.signal(SyncSignal::Refresh, now))
    }

    pub fn on_stream_error(&mut self) {
        self.state = ListenerState::Reconnecting;
    }

    pub fn on_event(&mut self, event: &SseEvent, now: Instant) -> Option<SyncSignal> {
        match event.event.as_str() {
            EVENT_SYNC_REQUIRED => Some(self.signal(SyncSignal::Refresh, now)),
            EVENT_FORCE_RESYNC => Some(self.signal(SyncSignal::FullReload, now)),
            _ => None,
        }
    }

    /// Background timer: refresh only while reconnecting, focused, and
    /// outside the throttle window.
    pub fn on_poll_tick(&mut self, now: Instant) -> Option<SyncSignal> {
        if self.state != ListenerState::Reconnecting || !self.has_focus {
            return None;
        }
        let throttled = self
            .last_refresh
            .is_some_and(|last| now.saturating_duration_since(last) < REFRESH_THROTTLE);
        (!throttled).then(|| self.signal(SyncSignal::Refresh, now))
    }

    /// Regaining focus always refreshes, whatever the timer state
    pub fn on_focus_changed(&mut self, focused: bool, now: Instant) -> Option<SyncSignal> {
        let gained = focused && !self.has_focus;
        self.has_focus = focused;
        gained.then(|| self.signal(SyncSignal::Refresh, now))
    }

    fn signal(&mut self, signal: SyncSignal, now: Instant) -> SyncSignal {
        self.last_refresh = Some(now);
        signal
    }
}
