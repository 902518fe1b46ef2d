//! Snapshot poll loop.
//!
//! Every `poll_interval` the reconciler fetches the authoritative position
//! list, replaces the store with it, realigns the stream subscriptions with
//! what is now held and publishes. A transient failure skips the cycle and
//! keeps the previous state; rejected credentials stop the loop.

use crate::broadcast::BroadcastHub;
use crate::error::{EngineError, EngineResult};
use crate::state::{EngineState, SnapshotDiff};
use crate::subscription::SubscriptionManager;
use chrono::Utc;
use posmon_core::{Position, PositionKey, SnapshotSource, SourceError};
use posmon_telemetry::Metrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied(SnapshotDiff),
    /// Fetch failed; state left untouched.
    Skipped(SourceError),
}

pub struct Reconciler {
    source: Arc<dyn SnapshotSource>,
    state: Arc<EngineState>,
    subscriptions: SubscriptionManager,
    hubs: Vec<Arc<BroadcastHub>>,
    poll_interval: Duration,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        state: Arc<EngineState>,
        subscriptions: SubscriptionManager,
        hubs: Vec<Arc<BroadcastHub>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            state,
            subscriptions,
            hubs,
            poll_interval,
        }
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Run one poll cycle.
    ///
    /// Returns `Err` only when the source rejected the credentials.
    pub async fn run_once(&mut self) -> EngineResult<CycleOutcome> {
        let venue = self.state.venue();

        let fetched = async {
            let records = self.source.fetch_positions().await?;
            let margins = self.source.fetch_margins().await?;
            Ok::<_, SourceError>((records, margins))
        }
        .await;

        let (records, margins) = match fetched {
            Ok(fetched) => fetched,
            Err(e) if e.is_fatal() => {
                error!(%venue, error = %e, "Snapshot source rejected credentials");
                Metrics::snapshot_poll(venue.as_str(), "auth");
                return Err(EngineError::Authentication {
                    venue,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                warn!(%venue, error = %e, "Snapshot poll failed, keeping previous state");
                let outcome = match &e {
                    SourceError::Malformed(_) => "malformed",
                    _ => "transient",
                };
                Metrics::snapshot_poll(venue.as_str(), outcome);
                return Ok(CycleOutcome::Skipped(e));
            }
        };

        let now = Utc::now();
        let candidate: BTreeMap<PositionKey, Position> = records
            .into_iter()
            .filter(|r| !r.size.is_zero())
            .map(|r| {
                let position = Position::from_record(r, &margins, now);
                (position.key(), position)
            })
            .collect();

        let diff = self.state.apply_snapshot(candidate);
        for key in &diff.opened {
            info!(%venue, position = %key, "Position opened");
        }
        for key in &diff.closed {
            info!(%venue, position = %key, "Position closed");
        }

        let required = self.state.required_channels();
        self.subscriptions.reconcile(&required).await;

        for hub in &self.hubs {
            hub.publish();
        }

        Metrics::snapshot_poll(venue.as_str(), "ok");
        Metrics::open_positions(venue.as_str(), self.state.position_count());
        debug!(
            %venue,
            positions = self.state.position_count(),
            subscriptions = self.subscriptions.active().len(),
            "Snapshot applied"
        );
        Ok(CycleOutcome::Applied(diff))
    }

    /// Poll until `shutdown` fires or credentials are rejected. Subscriptions
    /// are released on the way out either way.
    pub async fn run(mut self, shutdown: CancellationToken) -> EngineResult<()> {
        let venue = self.state.venue();
        info!(%venue, interval_ms = self.poll_interval.as_millis() as u64, "Reconciler started");

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(%venue, "Reconciler shutting down");
                    break Ok(());
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        break Err(e);
                    }
                }
            }
        };

        self.subscriptions.release_all().await;
        result
    }
}
