//! Engine error types.

use posmon_core::Venue;
use posmon_ws::WsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Credentials rejected by the snapshot source. The venue engine stops.
    #[error("{venue}: authentication rejected: {message}")]
    Authentication { venue: Venue, message: String },

    /// The price stream stopped with a non-retryable error.
    #[error("{venue}: price stream failed: {source}")]
    Stream {
        venue: Venue,
        #[source]
        source: WsError,
    },

    #[error("{venue}: task failed: {message}")]
    Task { venue: Venue, message: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
