//! Stream liveness tracking.
//!
//! By default a ping is sent only after `interval_ms` without any inbound
//! frame. Venues that drop clients which never ping (Bitget's text `ping`)
//! use keepalive mode instead, where pings go out every `interval_ms` counted
//! from the previous ping regardless of traffic. Either way the connection is
//! considered dead when a ping is not answered within `timeout_ms`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::trace;

#[derive(Debug)]
struct HeartbeatState {
    last_ping: Option<DateTime<Utc>>,
    last_message: DateTime<Utc>,
    connected_at: DateTime<Utc>,
    waiting_for_pong: bool,
}

/// Heartbeat manager for one stream connection.
#[derive(Debug)]
pub struct HeartbeatManager {
    interval_ms: u64,
    timeout_ms: u64,
    keepalive: bool,
    state: RwLock<HeartbeatState>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        let now = Utc::now();
        Self {
            interval_ms,
            timeout_ms,
            keepalive: false,
            state: RwLock::new(HeartbeatState {
                last_ping: None,
                last_message: now,
                connected_at: now,
                waiting_for_pong: false,
            }),
        }
    }

    /// Ping on a fixed schedule even while data is flowing.
    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Reset on a fresh connection.
    pub fn reset(&self) {
        let mut state = self.state.write();
        let now = Utc::now();
        state.last_ping = None;
        state.last_message = now;
        state.connected_at = now;
        state.waiting_for_pong = false;
    }

    pub fn record_ping(&self) {
        let mut state = self.state.write();
        state.last_ping = Some(Utc::now());
        state.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let mut state = self.state.write();
        let now = Utc::now();
        if let Some(ping) = state.last_ping {
            trace!(rtt_ms = (now - ping).num_milliseconds(), "Pong received");
        }
        state.waiting_for_pong = false;
        state.last_message = now;
    }

    /// Any inbound frame proves the connection is alive.
    pub fn record_message(&self) {
        let mut state = self.state.write();
        state.last_message = Utc::now();
        state.waiting_for_pong = false;
    }

    pub fn is_timed_out(&self) -> bool {
        let state = self.state.read();
        match (state.waiting_for_pong, state.last_ping) {
            (true, Some(ping)) => (Utc::now() - ping).num_milliseconds() > self.timeout_ms as i64,
            _ => false,
        }
    }

    pub fn should_send_ping(&self) -> bool {
        let state = self.state.read();
        if state.waiting_for_pong {
            return false;
        }
        let since = if self.keepalive {
            state.last_ping.unwrap_or(state.connected_at)
        } else {
            state.last_message
        };
        (Utc::now() - since).num_milliseconds() >= self.interval_ms as i64
    }

    /// How often liveness should be checked.
    pub fn check_period(&self) -> Duration {
        Duration::from_millis((self.interval_ms / 2).min(self.timeout_ms / 2).max(10))
    }
}
