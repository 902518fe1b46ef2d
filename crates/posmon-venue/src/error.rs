//! Venue REST error types.

use posmon_core::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Venue rejected request: code={code}, msg={msg}")]
    Api { code: String, msg: String },

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type VenueResult<T> = Result<T, VenueError>;

impl From<VenueError> for SourceError {
    fn from(err: VenueError) -> Self {
        match err {
            VenueError::Authentication(_) | VenueError::MissingCredential(_) => {
                SourceError::Authentication(err.to_string())
            }
            VenueError::Status { status, .. } if status == 401 || status == 403 => {
                SourceError::Authentication(err.to_string())
            }
            VenueError::Parse(_) | VenueError::Json(_) => SourceError::Malformed(err.to_string()),
            VenueError::HttpClient(_) | VenueError::Status { .. } | VenueError::Api { .. } => {
                SourceError::Transient(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let auth: SourceError = VenueError::Status {
            status: 401,
            body: String::new(),
        }
        .into();
        assert!(auth.is_fatal());

        let unavailable: SourceError = VenueError::Status {
            status: 503,
            body: "maintenance".into(),
        }
        .into();
        assert!(matches!(unavailable, SourceError::Transient(_)));

        let parse: SourceError = VenueError::Parse("eof".into()).into();
        assert!(matches!(parse, SourceError::Malformed(_)));

        let missing: SourceError = VenueError::MissingCredential("BINANCE_API_KEY".into()).into();
        assert!(missing.is_fatal());
    }
}
