//! Per-venue wiring: one reconciler, one price stream and its listener, one
//! broadcast hub.

use crate::broadcast::BroadcastHub;
use crate::error::{EngineError, EngineResult};
use crate::listener::PriceListener;
use crate::reconciler::Reconciler;
use crate::state::EngineState;
use crate::subscription::SubscriptionManager;
use crate::view::ViewSource;
use posmon_core::{SnapshotSource, StreamSource, Venue};
use posmon_ws::{protocol_for, ConnectionConfig, ConnectionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct VenueEngineConfig {
    pub poll_interval: Duration,
    pub connection: ConnectionConfig,
    /// Capacity of the stream event channel.
    pub event_buffer: usize,
}

impl Default for VenueEngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            connection: ConnectionConfig::default(),
            event_buffer: 1024,
        }
    }
}

pub struct VenueEngine {
    venue: Venue,
    source: Arc<dyn SnapshotSource>,
    config: VenueEngineConfig,
    state: Arc<EngineState>,
    hub: Arc<BroadcastHub>,
}

impl VenueEngine {
    pub fn new(source: Arc<dyn SnapshotSource>, config: VenueEngineConfig) -> Self {
        let venue = source.venue();
        let state = Arc::new(EngineState::new(venue));
        let hub = Arc::new(BroadcastHub::new(
            venue.as_str(),
            state.clone() as Arc<dyn ViewSource>,
        ));
        Self {
            venue,
            source,
            config,
            state,
            hub,
        }
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    pub fn state(&self) -> Arc<EngineState> {
        self.state.clone()
    }

    /// Hub serving this venue's view alone.
    pub fn hub(&self) -> Arc<BroadcastHub> {
        self.hub.clone()
    }

    /// Run until `shutdown` fires or a fatal error occurs.
    ///
    /// `extra_hubs` are published alongside the venue's own hub (the unified
    /// view). On exit the subscriptions are released, the stream is closed and
    /// the venue hub closes its viewers.
    pub async fn run(
        self,
        extra_hubs: Vec<Arc<BroadcastHub>>,
        shutdown: CancellationToken,
    ) -> EngineResult<()> {
        let venue = self.venue;
        let poll_token = shutdown.child_token();
        let stream_token = CancellationToken::new();

        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let manager = Arc::new(
            ConnectionManager::new(self.config.connection.clone(), protocol_for(venue), event_tx)
                .with_shutdown_token(stream_token.clone()),
        );
        let stream: Arc<dyn StreamSource> = Arc::new(manager.handle());

        let mut hubs = vec![self.hub.clone()];
        hubs.extend(extra_hubs);

        let reconciler = Reconciler::new(
            self.source.clone(),
            self.state.clone(),
            SubscriptionManager::new(venue, stream),
            hubs.clone(),
            self.config.poll_interval,
        );
        let listener = PriceListener::new(self.state.clone(), hubs, event_rx);

        info!(%venue, url = %self.config.connection.url, "Venue engine starting");

        let mut stream_task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect().await })
        };
        let listener_task = tokio::spawn(listener.run(stream_token.clone()));
        let mut reconciler_task = tokio::spawn(reconciler.run(poll_token.clone()));

        let result = tokio::select! {
            joined = &mut reconciler_task => {
                stream_token.cancel();
                let polled = flatten(venue, joined);
                let streamed = stream_task.await;
                polled.and(flatten_stream(venue, streamed))
            }
            joined = &mut stream_task => {
                poll_token.cancel();
                let streamed = flatten_stream(venue, joined);
                let polled = flatten(venue, reconciler_task.await);
                stream_token.cancel();
                streamed.and(polled)
            }
        };

        if let Err(e) = listener_task.await {
            error!(%venue, error = %e, "Price listener task failed");
        }
        self.hub.close_all();

        match &result {
            Ok(()) => info!(%venue, "Venue engine stopped"),
            Err(e) => error!(%venue, error = %e, "Venue engine stopped on error"),
        }
        result
    }
}

fn flatten(venue: Venue, joined: Result<EngineResult<()>, JoinError>) -> EngineResult<()> {
    joined.map_err(|e| EngineError::Task {
        venue,
        message: e.to_string(),
    })?
}

fn flatten_stream(
    venue: Venue,
    joined: Result<posmon_ws::WsResult<()>, JoinError>,
) -> EngineResult<()> {
    joined
        .map_err(|e| EngineError::Task {
            venue,
            message: e.to_string(),
        })?
        .map_err(|source| EngineError::Stream { venue, source })
}
