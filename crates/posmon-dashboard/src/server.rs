//! HTTP server implementation using axum.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use posmon_core::Venue;
use posmon_engine::{BroadcastHub, ViewerSubscription};
use posmon_telemetry::Metrics;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::error::{DashboardError, DashboardResult};
use crate::types::{HealthResponse, VenueHealth};

const ALL_VENUES: &str = "all";

/// Connection limiter to prevent too many concurrent WebSocket connections.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot. The guard releases it on drop and can move into the
    /// socket task.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    limiter: Arc::clone(self),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

/// Hubs reachable through `/ws/positions/{venue}` and `/api/positions/{venue}`.
#[derive(Clone)]
pub struct DashboardHubs {
    venues: Vec<(Venue, Arc<BroadcastHub>)>,
    unified: Arc<BroadcastHub>,
}

impl DashboardHubs {
    pub fn new(unified: Arc<BroadcastHub>) -> Self {
        Self {
            venues: Vec::new(),
            unified,
        }
    }

    pub fn with_venue(mut self, venue: Venue, hub: Arc<BroadcastHub>) -> Self {
        self.venues.push((venue, hub));
        self
    }

    /// Resolve a path segment: a venue name or `all`.
    pub fn get(&self, name: &str) -> Option<Arc<BroadcastHub>> {
        if name.eq_ignore_ascii_case(ALL_VENUES) {
            return Some(self.unified.clone());
        }
        let venue: Venue = name.parse().ok()?;
        self.venues
            .iter()
            .find(|(v, _)| *v == venue)
            .map(|(_, hub)| hub.clone())
    }

    pub fn unified(&self) -> Arc<BroadcastHub> {
        self.unified.clone()
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    hubs: DashboardHubs,
    connection_limiter: Arc<ConnectionLimiter>,
    config: DashboardConfig,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(hubs: DashboardHubs, config: DashboardConfig, shutdown: CancellationToken) -> Self {
        Self {
            hubs,
            connection_limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
            config,
            shutdown,
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        !self.config.auth_enabled() || check_basic_auth(headers, &self.config)
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/positions", get(get_unified_positions))
        .route("/api/positions/{venue}", get(get_positions))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    Router::new()
        .route("/", get(serve_index))
        .route("/ws/positions/{venue}", get(ws_handler))
        .route("/metrics", get(get_metrics))
        .route("/healthz", get(get_health))
        .merge(api)
        .with_state(state)
}

/// Serve the status page.
async fn serve_index(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<&'static str>, Response> {
    if !state.authorized(&headers) {
        return Err(unauthorized_response());
    }
    Ok(Html(include_str!("../static/index.html")))
}

fn view_response(hub: &BroadcastHub) -> Response {
    match hub.current().to_json() {
        Ok(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(e) => {
            warn!(hub = hub.label(), error = %e, "Failed to encode view");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Current unified view as JSON.
async fn get_unified_positions(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return unauthorized_response();
    }
    view_response(&state.hubs.unified())
}

/// Current view of one venue (or `all`) as JSON.
async fn get_positions(
    State(state): State<AppState>,
    Path(venue): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized_response();
    }
    match state.hubs.get(&venue) {
        Some(hub) => view_response(&hub),
        None => unknown_venue(&venue),
    }
}

async fn get_metrics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return unauthorized_response();
    }
    match Metrics::encode_text() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let venues = state
        .hubs
        .venues
        .iter()
        .map(|(venue, hub)| VenueHealth {
            venue: venue.to_string(),
            open_positions: hub.current().len(),
            viewers: hub.viewer_count(),
        })
        .collect();
    Json(HealthResponse {
        status: "ok",
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        venues,
        viewer_connections: state.connection_limiter.current_count(),
    })
}

/// WebSocket upgrade handler.
async fn ws_handler(
    State(state): State<AppState>,
    Path(venue): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized_response();
    }

    let Some(hub) = state.hubs.get(&venue) else {
        return unknown_venue(&venue);
    };

    let Some(guard) = state.connection_limiter.try_acquire() else {
        warn!(
            current = state.connection_limiter.current_count(),
            max = state.config.max_connections,
            "WebSocket connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    info!(
        hub = hub.label(),
        connections = state.connection_limiter.current_count(),
        "New viewer connection"
    );

    ws.on_upgrade(move |socket| handle_viewer(socket, hub, guard, state))
}

type ViewerSink = SplitSink<WebSocket, Message>;

/// Send with a deadline. `false` means the viewer is gone or too slow.
async fn send_bounded(sink: &mut ViewerSink, message: Message, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Viewer send failed");
            false
        }
        Err(_) => {
            debug!(timeout_ms = timeout.as_millis() as u64, "Viewer send timed out");
            false
        }
    }
}

/// Push the current view, then one message per published change, until the
/// viewer leaves, stalls, or the hub closes.
async fn handle_viewer(
    socket: WebSocket,
    hub: Arc<BroadcastHub>,
    _guard: ConnectionGuard,
    state: AppState,
) {
    let ViewerSubscription { id, mut receiver } = hub.add_viewer();
    let (mut sink, mut inbound) = socket.split();

    let send_timeout = Duration::from_millis(state.config.send_timeout_ms);
    let idle_timeout = Duration::from_millis(state.config.idle_timeout_ms);
    let mut ping = tokio::time::interval(Duration::from_millis(state.config.ping_interval_ms.max(1)));
    ping.tick().await;
    let mut last_seen = Instant::now();

    let initial = receiver.borrow_and_update().json.clone();
    let mut open = send_bounded(&mut sink, Message::Text(initial.into()), send_timeout).await;

    while open {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                let _ = send_bounded(&mut sink, Message::Close(None), send_timeout).await;
                break;
            }
            changed = receiver.changed() => {
                if changed.is_err() {
                    debug!(hub = hub.label(), viewer = id, "Hub closed, closing viewer");
                    let _ = send_bounded(&mut sink, Message::Close(None), send_timeout).await;
                    break;
                }
                let json = receiver.borrow_and_update().json.clone();
                open = send_bounded(&mut sink, Message::Text(json.into()), send_timeout).await;
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | None => {
                    debug!(hub = hub.label(), viewer = id, "Viewer closed connection");
                    break;
                }
                Some(Err(e)) => {
                    debug!(hub = hub.label(), viewer = id, error = %e, "Viewer receive error");
                    break;
                }
                Some(Ok(_)) => last_seen = Instant::now(),
            },
            _ = ping.tick() => {
                if last_seen.elapsed() > idle_timeout {
                    debug!(hub = hub.label(), viewer = id, "Viewer idle, closing");
                    break;
                }
                open = send_bounded(&mut sink, Message::Ping(Vec::new().into()), send_timeout).await;
            }
        }
    }

    hub.remove_viewer(id);
    info!(
        hub = hub.label(),
        viewer = id,
        connections = state.connection_limiter.current_count().saturating_sub(1),
        "Viewer connection closed"
    );
}

/// Check basic authentication.
fn check_basic_auth(headers: &HeaderMap, config: &DashboardConfig) -> bool {
    let Some(auth_str) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };

    let Some(encoded) = auth_str.strip_prefix("Basic ") else {
        return false;
    };

    let Some(decoded) = STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    else {
        return false;
    };

    decoded == format!("{}:{}", config.username, config.password)
}

/// Create an unauthorized response.
fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"posmon\"")],
        "Unauthorized",
    )
        .into_response()
}

fn unknown_venue(venue: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("Unknown venue: {venue}")).into_response()
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve(listener: TcpListener, state: AppState) -> DashboardResult<()> {
    let shutdown = state.shutdown.clone();
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Bind the configured address and serve until `shutdown` fires.
pub async fn run_server(
    hubs: DashboardHubs,
    config: DashboardConfig,
    shutdown: CancellationToken,
) -> DashboardResult<()> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| DashboardError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(%addr, "Starting dashboard server");
    serve(listener, AppState::new(hubs, config, shutdown)).await
}
