//! Price stream connection manager.
//!
//! Owns the socket lifecycle for one venue:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Streaming
//!                     ^                          |
//!                     +-------- Backoff <--------+ (error / close)
//! ```
//!
//! Every connect replays the full desired subscription set. `Shutdown` is
//! terminal and is reached only through the cancellation token or a rejected
//! handshake.

use crate::backoff::Backoff;
use crate::error::{WsError, WsResult};
use crate::handle::StreamHandle;
use crate::heartbeat::HeartbeatManager;
use crate::protocol::{ParsedFrame, StreamProtocol};
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use posmon_core::PriceTick;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// How subscription changes reach a live connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResubscribePolicy {
    /// Send subscribe/unsubscribe frames for the difference.
    #[default]
    Incremental,
    /// Drop the socket and reconnect immediately with the full set.
    Reconnect,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Venue WebSocket base URL.
    pub url: String,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Upper bound of random delay added to each backoff step (0 = none).
    pub reconnect_jitter_ms: u64,
    /// Idle time before a ping is sent, or the fixed ping period for venues
    /// that expect an application-level ping.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
    pub resubscribe_policy: ResubscribePolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
            reconnect_jitter_ms: 0,
            heartbeat_interval_ms: 30000,
            heartbeat_timeout_ms: 10000,
            resubscribe_policy: ResubscribePolicy::Incremental,
        }
    }
}

/// Listener state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Subscribed,
    Streaming,
    Backoff,
    Shutdown,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerState::Disconnected => "disconnected",
            ListenerState::Connecting => "connecting",
            ListenerState::Subscribed => "subscribed",
            ListenerState::Streaming => "streaming",
            ListenerState::Backoff => "backoff",
            ListenerState::Shutdown => "shutdown",
        }
    }
}

/// Events delivered to the stream consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Socket open and the full subscription set replayed.
    Connected,
    Prices(Vec<PriceTick>),
    /// A frame could not be parsed and was dropped.
    Malformed(String),
    /// Socket lost; a reconnect follows unless shutting down.
    Disconnected { reason: String },
}

/// `Disconnected` reason for a socket dropped to apply a new subscription
/// set. Reconnection is immediate and is not a failure.
pub const RESUBSCRIBE_REASON: &str = "resubscribe";

/// Why a session ended without an error.
enum SessionEnd {
    Shutdown,
    Resubscribe,
    Closed,
}

/// Price stream connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    protocol: Arc<dyn StreamProtocol>,
    state: Arc<RwLock<ListenerState>>,
    desired: Arc<watch::Sender<BTreeSet<String>>>,
    heartbeat: HeartbeatManager,
    backoff: Mutex<Backoff>,
    event_tx: mpsc::Sender<StreamEvent>,
    request_id: AtomicU64,
    reconnects: AtomicU64,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        protocol: Arc<dyn StreamProtocol>,
        event_tx: mpsc::Sender<StreamEvent>,
    ) -> Self {
        let (desired, _) = watch::channel(BTreeSet::new());
        let backoff = Backoff::new(config.reconnect_base_delay_ms, config.reconnect_max_delay_ms)
            .with_jitter(config.reconnect_jitter_ms);
        Self {
            heartbeat: HeartbeatManager::new(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
            )
            .with_keepalive(protocol.ping_frame().is_some()),
            config,
            protocol,
            state: Arc::new(RwLock::new(ListenerState::Disconnected)),
            desired: Arc::new(desired),
            backoff: Mutex::new(backoff),
            event_tx,
            request_id: AtomicU64::new(1),
            reconnects: AtomicU64::new(0),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Tie shutdown to an externally owned token.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    /// Handle for changing the subscription set. Cloneable and usable from any
    /// task, connected or not.
    pub fn handle(&self) -> StreamHandle {
        StreamHandle::new(self.desired.clone(), self.state.clone())
    }

    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        info!(venue = %self.protocol.venue(), "Price stream shutdown requested");
        self.shutdown_token.cancel();
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Run until shutdown. Returns `Err` only for fatal errors.
    pub async fn connect(&self) -> WsResult<()> {
        let result = self.connect_with_retry().await;
        self.set_state(ListenerState::Shutdown);
        result
    }

    async fn connect_with_retry(&self) -> WsResult<()> {
        let venue = self.protocol.venue();

        loop {
            if self.is_shutdown() {
                info!(%venue, "Shutdown requested, exiting connect loop");
                return Ok(());
            }

            self.set_state(ListenerState::Connecting);

            let reason = match self.run_session().await {
                Ok(SessionEnd::Shutdown) => return Ok(()),
                Ok(SessionEnd::Resubscribe) => {
                    info!(%venue, "Subscription set changed, reconnecting");
                    self.emit(StreamEvent::Disconnected {
                        reason: RESUBSCRIBE_REASON.to_string(),
                    })
                    .await;
                    continue;
                }
                Ok(SessionEnd::Closed) => {
                    info!(%venue, "Price stream closed");
                    "closed".to_string()
                }
                Err(e) if e.is_fatal() => {
                    error!(%venue, error = %e, "Price stream rejected, not retrying");
                    self.emit(StreamEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(%venue, error = %e, "Price stream error");
                    e.to_string()
                }
            };

            self.emit(StreamEvent::Disconnected { reason }).await;

            if self.is_shutdown() {
                info!(%venue, "Shutdown requested after disconnect, not reconnecting");
                return Ok(());
            }

            self.set_state(ListenerState::Backoff);
            self.reconnects.fetch_add(1, Ordering::Relaxed);

            let (delay, attempt) = {
                let mut backoff = self.backoff.lock();
                (backoff.next_delay(), backoff.attempt())
            };
            warn!(%venue, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!(%venue, "Shutdown requested during backoff, exiting");
                    return Ok(());
                }
            }
        }
    }

    async fn run_session(&self) -> WsResult<SessionEnd> {
        let venue = self.protocol.venue();
        let policy = self.config.resubscribe_policy;

        let mut desired_rx = self.desired.subscribe();
        let mut live = desired_rx.borrow_and_update().clone();

        let inline_url = match policy {
            ResubscribePolicy::Reconnect => self.protocol.inline_endpoint(&self.config.url, &live),
            ResubscribePolicy::Incremental => None,
        };
        let url = inline_url
            .clone()
            .unwrap_or_else(|| self.protocol.endpoint(&self.config.url));

        info!(%venue, %url, symbols = live.len(), "Connecting to price stream");

        let connect = connect_async_tls_with_config(&url, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connect => result.map_err(classify_handshake_error)?,
            () = self.shutdown_token.cancelled() => return Ok(SessionEnd::Shutdown),
        };
        let (mut write, mut read) = ws_stream.split();

        self.backoff.lock().reset();

        if inline_url.is_none() {
            let frames = self
                .protocol
                .subscribe_frames(&live, self.next_request_id())?;
            send_frames(&mut write, frames).await?;
        }

        self.set_state(ListenerState::Subscribed);
        self.heartbeat.reset();
        info!(%venue, symbols = live.len(), "Price stream subscribed");
        self.emit(StreamEvent::Connected).await;

        // Persistent so inbound traffic cannot keep restarting it.
        let mut liveness = tokio::time::interval(self.heartbeat.check_period());
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!(%venue, "Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(%venue, error = %e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(SessionEnd::Shutdown);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(%venue, code, %reason, "Price stream closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {
                            self.heartbeat.record_message();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::Closed),
                    }
                }

                changed = desired_rx.changed() => {
                    if changed.is_err() {
                        return Ok(SessionEnd::Shutdown);
                    }
                    let wanted = desired_rx.borrow_and_update().clone();
                    if wanted == live {
                        continue;
                    }
                    if policy == ResubscribePolicy::Reconnect {
                        return Ok(SessionEnd::Resubscribe);
                    }

                    let added: BTreeSet<String> = wanted.difference(&live).cloned().collect();
                    let removed: BTreeSet<String> = live.difference(&wanted).cloned().collect();
                    if !added.is_empty() {
                        let frames = self.protocol.subscribe_frames(&added, self.next_request_id())?;
                        send_frames(&mut write, frames).await?;
                        info!(%venue, symbols = ?added, "Subscribed");
                    }
                    if !removed.is_empty() {
                        let frames = self.protocol.unsubscribe_frames(&removed, self.next_request_id())?;
                        send_frames(&mut write, frames).await?;
                        info!(%venue, symbols = ?removed, "Unsubscribed");
                    }
                    live = wanted;
                }

                _ = liveness.tick() => {
                    if self.heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_ping() {
                        let ping = match self.protocol.ping_frame() {
                            Some(text) => Message::Text(text),
                            None => Message::Ping(Vec::new()),
                        };
                        write.send(ping).await?;
                        self.heartbeat.record_ping();
                        trace!(%venue, "Sent heartbeat ping");
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        self.heartbeat.record_message();

        match self.protocol.parse(text) {
            ParsedFrame::Prices(ticks) => {
                if self.state() != ListenerState::Streaming {
                    self.set_state(ListenerState::Streaming);
                }
                trace!(count = ticks.len(), "Price frame");
                self.emit(StreamEvent::Prices(ticks)).await;
            }
            ParsedFrame::Pong => self.heartbeat.record_pong(),
            ParsedFrame::Ack => debug!("Subscription acknowledged"),
            ParsedFrame::Rejected(reason) => {
                warn!(venue = %self.protocol.venue(), %reason, "Stream request rejected");
            }
            ParsedFrame::Ignored => {}
            ParsedFrame::Malformed(reason) => {
                debug!(venue = %self.protocol.venue(), %reason, "Dropping malformed frame");
                self.emit(StreamEvent::Malformed(reason)).await;
            }
        }
    }

    async fn emit(&self, event: StreamEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Stream event receiver dropped");
        }
    }

    fn set_state(&self, state: ListenerState) {
        *self.state.write() = state;
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }
}

async fn send_frames<S>(write: &mut S, frames: Vec<String>) -> WsResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for frame in frames {
        write.send(Message::Text(frame)).await?;
    }
    Ok(())
}

/// 401/403 on the upgrade request means the endpoint refuses us outright.
fn classify_handshake_error(err: tungstenite::Error) -> WsError {
    if let tungstenite::Error::Http(response) = &err {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return WsError::Unauthorized(format!("handshake rejected with HTTP {status}"));
        }
        return WsError::ConnectionFailed(format!("handshake rejected with HTTP {status}"));
    }
    WsError::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.reconnect_base_delay_ms, 1000);
        assert_eq!(config.reconnect_max_delay_ms, 30000);
        assert_eq!(config.resubscribe_policy, ResubscribePolicy::Incremental);
    }

    #[test]
    fn test_policy_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: ResubscribePolicy,
        }
        let w: Wrapper = serde_json::from_str(r#"{"policy":"reconnect"}"#).unwrap();
        assert_eq!(w.policy, ResubscribePolicy::Reconnect);
    }

    #[test]
    fn test_handshake_401_is_fatal() {
        let response = tungstenite::http::Response::builder()
            .status(401)
            .body(None)
            .unwrap();
        let err = classify_handshake_error(tungstenite::Error::Http(response));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_handshake_503_is_retried() {
        let response = tungstenite::http::Response::builder()
            .status(503)
            .body(None)
            .unwrap();
        let err = classify_handshake_error(tungstenite::Error::Http(response));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_new_manager_starts_disconnected() {
        let (tx, _rx) = mpsc::channel(8);
        let manager = ConnectionManager::new(
            ConnectionConfig::default(),
            crate::protocol::protocol_for(posmon_core::Venue::Binance),
            tx,
        );
        assert_eq!(manager.state(), ListenerState::Disconnected);
        assert_eq!(manager.reconnect_count(), 0);
        assert!(manager.handle().desired().is_empty());
    }
}
