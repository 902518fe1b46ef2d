//! Application configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file runs
//! both venues with production endpoints. Secrets never live in the file:
//! each venue names the environment variables its credentials are read from.

use crate::error::{AppError, AppResult};
use posmon_core::Venue;
use posmon_dashboard::DashboardConfig;
use posmon_engine::VenueEngineConfig;
use posmon_ws::{ConnectionConfig, ResubscribePolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Snapshot polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Price stream reconnect and heartbeat settings, shared by every venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default)]
    pub reconnect_jitter_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Capacity of the event channel between the socket task and the listener.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub resubscribe_policy: ResubscribePolicy,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_channel_capacity() -> usize {
    1_024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter_ms: 0,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            channel_capacity: default_channel_capacity(),
            resubscribe_policy: ResubscribePolicy::default(),
        }
    }
}

/// One monitored venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub kind: Venue,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// REST base URL; the venue's production endpoint when unset.
    #[serde(default)]
    pub rest_url: Option<String>,
    /// Price stream base URL; the venue's production endpoint when unset.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_secret_env: Option<String>,
    /// Bitget only.
    #[serde(default)]
    pub passphrase_env: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl VenueConfig {
    pub fn new(kind: Venue) -> Self {
        Self {
            kind,
            enabled: true,
            rest_url: None,
            ws_url: None,
            api_key_env: None,
            api_secret_env: None,
            passphrase_env: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn rest_url(&self) -> &str {
        self.rest_url.as_deref().unwrap_or(match self.kind {
            Venue::Binance => posmon_venue::binance::DEFAULT_REST_URL,
            Venue::Bitget => posmon_venue::bitget::DEFAULT_REST_URL,
        })
    }

    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or(match self.kind {
            Venue::Binance => "wss://fstream.binance.com",
            Venue::Bitget => "wss://ws.bitget.com/v2/ws/public",
        })
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(match self.kind {
            Venue::Binance => "BINANCE_API_KEY",
            Venue::Bitget => "BITGET_API_KEY",
        })
    }

    pub fn api_secret_env(&self) -> &str {
        self.api_secret_env.as_deref().unwrap_or(match self.kind {
            Venue::Binance => "BINANCE_API_SECRET",
            Venue::Bitget => "BITGET_API_SECRET",
        })
    }

    /// Passphrase variable; `None` for venues that do not use one.
    pub fn passphrase_env(&self) -> Option<&str> {
        match self.kind {
            Venue::Binance => self.passphrase_env.as_deref(),
            Venue::Bitget => Some(
                self.passphrase_env
                    .as_deref()
                    .unwrap_or("BITGET_API_PASSPHRASE"),
            ),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_venues() -> Vec<VenueConfig> {
    Venue::ALL.into_iter().map(VenueConfig::new).collect()
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default = "default_venues")]
    pub venues: Vec<VenueConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            stream: StreamConfig::default(),
            dashboard: DashboardConfig::default(),
            venues: default_venues(),
        }
    }
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.engine.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "engine.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.stream.reconnect_base_delay_ms == 0
            || self.stream.reconnect_max_delay_ms < self.stream.reconnect_base_delay_ms
        {
            return Err(AppError::Config(
                "stream reconnect delays must satisfy 0 < base <= max".to_string(),
            ));
        }
        if self.stream.channel_capacity == 0 {
            return Err(AppError::Config(
                "stream.channel_capacity must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for venue in &self.venues {
            if !seen.insert(venue.kind) {
                return Err(AppError::Config(format!(
                    "venue {} configured more than once",
                    venue.kind
                )));
            }
        }
        if self.enabled_venues().next().is_none() {
            return Err(AppError::Config("no venue enabled".to_string()));
        }
        Ok(())
    }

    /// Enabled venues in configuration order.
    pub fn enabled_venues(&self) -> impl Iterator<Item = &VenueConfig> {
        self.venues.iter().filter(|v| v.enabled)
    }

    /// Engine settings for one venue.
    pub fn engine_config(&self, venue: &VenueConfig) -> VenueEngineConfig {
        VenueEngineConfig {
            poll_interval: Duration::from_millis(self.engine.poll_interval_ms),
            connection: ConnectionConfig {
                url: venue.ws_url().to_string(),
                reconnect_base_delay_ms: self.stream.reconnect_base_delay_ms,
                reconnect_max_delay_ms: self.stream.reconnect_max_delay_ms,
                reconnect_jitter_ms: self.stream.reconnect_jitter_ms,
                heartbeat_interval_ms: self.stream.heartbeat_interval_ms,
                heartbeat_timeout_ms: self.stream.heartbeat_timeout_ms,
                resubscribe_policy: self.stream.resubscribe_policy,
            },
            event_buffer: self.stream.channel_capacity,
        }
    }
}
