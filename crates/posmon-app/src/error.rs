//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Venue error: {0}")]
    Venue(#[from] posmon_venue::VenueError),

    #[error("Engine error: {0}")]
    Engine(#[from] posmon_engine::EngineError),

    #[error("Dashboard error: {0}")]
    Dashboard(#[from] posmon_dashboard::DashboardError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] posmon_telemetry::TelemetryError),

    #[error("Task failed: {0}")]
    Task(String),
}

pub type AppResult<T> = Result<T, AppError>;
