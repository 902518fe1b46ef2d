//! Application wiring and lifecycle.
//!
//! ```text
//!   ┌─────────────── VenueEngine (binance) ───────────────┐
//!   │ Reconciler · PriceListener · ConnectionManager · hub │──┐
//!   └──────────────────────────────────────────────────────┘  │
//!   ┌─────────────── VenueEngine (bitget) ────────────────┐   ├──▶ unified hub ("all")
//!   │ Reconciler · PriceListener · ConnectionManager · hub │──┘
//!   └──────────────────────────────────────────────────────┘
//!                    every hub ──▶ dashboard server
//! ```
//!
//! One cancellation token stops everything. Ctrl-C cancels it; so does the
//! first engine that fails fatally, whose error is then returned.

use crate::config::{AppConfig, VenueConfig};
use crate::error::{AppError, AppResult};
use posmon_core::{SnapshotSource, Venue};
use posmon_dashboard::DashboardHubs;
use posmon_engine::{BroadcastHub, UnifiedView, VenueEngine, ViewSource};
use posmon_venue::{BinanceClient, BitgetClient, Credentials};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Build the snapshot source for a venue, reading credentials from the
/// environment. Missing credentials are a configuration error.
pub fn build_source(venue: &VenueConfig) -> AppResult<Arc<dyn SnapshotSource>> {
    let credentials = Credentials::from_env(
        venue.api_key_env(),
        venue.api_secret_env(),
        venue.passphrase_env(),
    )?;
    let source: Arc<dyn SnapshotSource> = match venue.kind {
        Venue::Binance => Arc::new(BinanceClient::new(
            venue.rest_url(),
            credentials,
            venue.request_timeout(),
        )?),
        Venue::Bitget => Arc::new(BitgetClient::new(
            venue.rest_url(),
            credentials,
            venue.request_timeout(),
        )?),
    };
    Ok(source)
}

/// Main application.
pub struct Application {
    config: AppConfig,
    engines: Vec<VenueEngine>,
    unified: Arc<BroadcastHub>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build every enabled venue engine from `config`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let mut engines = Vec::new();
        for venue in config.enabled_venues() {
            let source = build_source(venue)?;
            engines.push(VenueEngine::new(source, config.engine_config(venue)));
        }
        Ok(Self::with_engines(config, engines))
    }

    /// Assemble from prebuilt engines.
    pub fn with_engines(config: AppConfig, engines: Vec<VenueEngine>) -> Self {
        let sources: Vec<Arc<dyn ViewSource>> = engines
            .iter()
            .map(|e| e.state() as Arc<dyn ViewSource>)
            .collect();
        let unified = Arc::new(BroadcastHub::new("all", Arc::new(UnifiedView::new(sources))));
        Self {
            config,
            engines,
            unified,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the application when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn unified_hub(&self) -> Arc<BroadcastHub> {
        self.unified.clone()
    }

    pub fn dashboard_hubs(&self) -> DashboardHubs {
        self.engines.iter().fold(
            DashboardHubs::new(self.unified.clone()),
            |hubs, engine| hubs.with_venue(engine.venue(), engine.hub()),
        )
    }

    /// Run until Ctrl-C or the first fatal error.
    pub async fn run(self) -> AppResult<()> {
        let shutdown = self.shutdown.clone();
        let mut tasks: JoinSet<AppResult<()>> = JoinSet::new();

        if self.config.dashboard.enabled {
            let hubs = self.dashboard_hubs();
            let config = self.config.dashboard.clone();
            let token = shutdown.clone();
            tasks.spawn(async move {
                posmon_dashboard::run_server(hubs, config, token).await?;
                Ok(())
            });
        }

        for engine in self.engines {
            let extra = vec![self.unified.clone()];
            let token = shutdown.clone();
            info!(venue = %engine.venue(), "Starting venue engine");
            tasks.spawn(async move {
                engine.run(extra, token).await?;
                Ok(())
            });
        }

        let mut first_error: Option<AppError> = None;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c(), if !shutdown.is_cancelled() => {
                    info!("Shutdown signal received");
                    shutdown.cancel();
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let result = joined.map_err(|e| AppError::Task(e.to_string())).and_then(|r| r);
                    if let Err(e) = result {
                        error!(error = %e, "Fatal error, shutting down");
                        first_error.get_or_insert(e);
                        shutdown.cancel();
                    } else if !shutdown.is_cancelled() {
                        // Tasks return Ok only after cancellation.
                        info!("Component stopped, shutting down");
                        shutdown.cancel();
                    }
                }
            }
        }

        self.unified.close_all();
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Shutdown complete");
                Ok(())
            }
        }
    }
}
