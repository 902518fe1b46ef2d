//! posmon-dashboard - HTTP surface for position viewers.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        posmon process                         │
//! │                                                              │
//! │  ┌───────────────┐  ┌───────────────┐  ┌─────────────────┐   │
//! │  │ BroadcastHub  │  │ BroadcastHub  │  │  BroadcastHub   │   │
//! │  │   (binance)   │  │   (bitget)    │  │     (all)       │   │
//! │  └───────┬───────┘  └───────┬───────┘  └────────┬────────┘   │
//! │          └──────────────────┼───────────────────┘            │
//! │                             ▼                                │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │       axum HTTP Server (port 8080)                     │  │
//! │  │  GET /                      → status page              │  │
//! │  │  GET /ws/positions/{venue}  → viewer WebSocket         │  │
//! │  │  GET /api/positions[/{v}]   → current view as JSON     │  │
//! │  │  GET /metrics               → Prometheus text          │  │
//! │  │  GET /healthz               → liveness                 │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `{venue}` is `binance`, `bitget` or `all`.

mod config;
mod error;
mod server;
mod types;

pub use config::DashboardConfig;
pub use error::{DashboardError, DashboardResult};
pub use server::{create_router, run_server, serve, AppState, ConnectionLimiter, DashboardHubs};
pub use types::{HealthResponse, VenueHealth};
