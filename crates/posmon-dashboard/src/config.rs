//! Dashboard configuration.

use serde::{Deserialize, Serialize};

/// Dashboard server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Enable dashboard server.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent viewer WebSockets.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Basic auth username (empty = disabled).
    #[serde(default)]
    pub username: String,
    /// Basic auth password (empty = disabled).
    #[serde(default)]
    pub password: String,
    /// A push that takes longer than this drops the viewer.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Server ping cadence on viewer sockets.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// A viewer silent for this long (no pong, no frame) is dropped.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    64
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> u64 {
    90_000
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
            max_connections: default_max_connections(),
            username: String::new(),
            password: String::new(),
            send_timeout_ms: default_send_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl DashboardConfig {
    /// Check if basic auth is enabled.
    pub fn auth_enabled(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
