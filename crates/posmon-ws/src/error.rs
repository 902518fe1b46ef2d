//! Price stream error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// Handshake rejected with 401/403. Not retried.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Fatal errors end the connect loop instead of entering backoff.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WsError::Unauthorized(_))
    }
}

pub type WsResult<T> = Result<T, WsError>;
