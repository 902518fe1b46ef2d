//! Consumer side of the price stream.
//!
//! Drains [`StreamEvent`]s from the connection task, caches ticks for held
//! symbols and publishes when anything was cached.

use crate::broadcast::BroadcastHub;
use crate::state::EngineState;
use posmon_telemetry::Metrics;
use posmon_ws::{StreamEvent, RESUBSCRIBE_REASON};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub struct PriceListener {
    state: Arc<EngineState>,
    hubs: Vec<Arc<BroadcastHub>>,
    events: mpsc::Receiver<StreamEvent>,
}

impl PriceListener {
    pub fn new(
        state: Arc<EngineState>,
        hubs: Vec<Arc<BroadcastHub>>,
        events: mpsc::Receiver<StreamEvent>,
    ) -> Self {
        Self {
            state,
            hubs,
            events,
        }
    }

    /// Handle one event. Returns how many ticks were cached.
    pub fn handle(&self, event: StreamEvent) -> usize {
        let venue = self.state.venue();
        match event {
            StreamEvent::Prices(ticks) => {
                let applied = self.state.apply_ticks(ticks);
                if applied > 0 {
                    trace!(%venue, applied, "Prices applied");
                    for hub in &self.hubs {
                        hub.publish();
                    }
                }
                applied
            }
            StreamEvent::Connected => {
                info!(%venue, "Price stream connected");
                Metrics::stream_connected(venue.as_str());
                0
            }
            StreamEvent::Disconnected { reason } if reason == RESUBSCRIBE_REASON => {
                debug!(%venue, "Price stream reopening with new subscriptions");
                Metrics::stream_disconnected(venue.as_str());
                0
            }
            StreamEvent::Disconnected { reason } => {
                warn!(%venue, %reason, "Price stream disconnected");
                Metrics::stream_disconnected(venue.as_str());
                Metrics::stream_reconnect(venue.as_str());
                0
            }
            StreamEvent::Malformed(detail) => {
                debug!(%venue, %detail, "Dropped malformed frame");
                Metrics::stream_malformed(venue.as_str());
                0
            }
        }
    }

    /// Consume events until the stream closes its sender or `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let venue = self.state.venue();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.handle(event);
                    }
                    None => break,
                },
            }
        }
        Metrics::stream_disconnected(venue.as_str());
        debug!(%venue, "Price listener stopped");
    }
}
