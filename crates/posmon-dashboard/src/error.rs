//! Dashboard errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dashboard server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub type DashboardResult<T> = Result<T, DashboardError>;
