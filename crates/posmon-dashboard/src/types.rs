//! Dashboard API types.

use serde::Serialize;

/// Body of `GET /healthz`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp_ms: i64,
    pub venues: Vec<VenueHealth>,
    pub viewer_connections: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VenueHealth {
    pub venue: String,
    pub open_positions: usize,
    pub viewers: usize,
}
