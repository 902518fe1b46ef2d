//! Prometheus metrics for posmon.
//!
//! Every series carries a `venue` label (`binance`, `bitget`, or `all` for the
//! unified view).
//!
//! # Panics
//!
//! Registration uses `unwrap()`. A failure means a duplicate metric name,
//! which is a programming error surfaced on first use at startup.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

/// Price stream connection state (1 = connected).
pub static STREAM_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "posmon_stream_connected",
        "Price stream connection state (1=connected)",
        &["venue"]
    )
    .unwrap()
});

pub static STREAM_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "posmon_stream_reconnect_total",
        "Price stream disconnects followed by a reconnect attempt",
        &["venue"]
    )
    .unwrap()
});

pub static STREAM_MALFORMED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "posmon_stream_malformed_total",
        "Price stream frames dropped as malformed",
        &["venue"]
    )
    .unwrap()
});

/// Labels: venue, outcome (ok/transient/auth/malformed)
pub static SNAPSHOT_POLL_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "posmon_snapshot_poll_total",
        "Snapshot polls by outcome",
        &["venue", "outcome"]
    )
    .unwrap()
});

pub static OPEN_POSITIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "posmon_open_positions",
        "Positions currently held in the store",
        &["venue"]
    )
    .unwrap()
});

pub static ACTIVE_SUBSCRIPTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "posmon_active_subscriptions",
        "Channel symbols currently subscribed on the price stream",
        &["venue"]
    )
    .unwrap()
});

pub static VIEWERS_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "posmon_viewers_connected",
        "Viewers registered with a broadcast hub",
        &["venue"]
    )
    .unwrap()
});

pub static PUBLISH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "posmon_publish_total",
        "Merged view recomputations pushed to viewers",
        &["venue"]
    )
    .unwrap()
});

pub static VIEWERS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "posmon_viewers_dropped_total",
        "Viewers removed after a failed delivery",
        &["venue"]
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    pub fn stream_connected(venue: &str) {
        STREAM_CONNECTED.with_label_values(&[venue]).set(1);
    }

    pub fn stream_disconnected(venue: &str) {
        STREAM_CONNECTED.with_label_values(&[venue]).set(0);
    }

    pub fn stream_reconnect(venue: &str) {
        STREAM_RECONNECT_TOTAL.with_label_values(&[venue]).inc();
    }

    pub fn stream_malformed(venue: &str) {
        STREAM_MALFORMED_TOTAL.with_label_values(&[venue]).inc();
    }

    pub fn snapshot_poll(venue: &str, outcome: &str) {
        SNAPSHOT_POLL_TOTAL
            .with_label_values(&[venue, outcome])
            .inc();
    }

    pub fn open_positions(venue: &str, count: usize) {
        OPEN_POSITIONS
            .with_label_values(&[venue])
            .set(count as i64);
    }

    pub fn active_subscriptions(venue: &str, count: usize) {
        ACTIVE_SUBSCRIPTIONS
            .with_label_values(&[venue])
            .set(count as i64);
    }

    pub fn viewers_connected(venue: &str, count: usize) {
        VIEWERS_CONNECTED
            .with_label_values(&[venue])
            .set(count as i64);
    }

    pub fn published(venue: &str) {
        PUBLISH_TOTAL.with_label_values(&[venue]).inc();
    }

    pub fn viewer_dropped(venue: &str) {
        VIEWERS_DROPPED_TOTAL.with_label_values(&[venue]).inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn encode_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
