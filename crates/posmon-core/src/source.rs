//! Upstream collaborator traits.
//!
//! A `SnapshotSource` answers "what is open right now" on demand. A
//! `StreamSource` accepts changes to the set of channel symbols whose mark
//! prices are pushed; the ticks themselves arrive on a channel owned by the
//! stream implementation.

use crate::position::{MarginInfo, MarginKey, PositionRecord};
use crate::venue::Venue;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Errors surfaced by snapshot and stream sources.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Network failure, timeout, rate limit or venue-side 5xx. Retried on the
    /// next cycle.
    #[error("Transient source failure: {0}")]
    Transient(String),

    /// Rejected credentials. Not retried.
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    /// Response body could not be understood.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Authentication failures stop the owning task; everything else is
    /// retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Authentication(_))
    }
}

/// Result type alias for source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Authoritative, poll-based view of open positions.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn venue(&self) -> Venue;

    /// All currently open positions (nonzero size).
    async fn fetch_positions(&self) -> SourceResult<Vec<PositionRecord>>;

    /// Margin figures keyed by symbol (and side where the venue reports it).
    async fn fetch_margins(&self) -> SourceResult<HashMap<MarginKey, MarginInfo>> {
        Ok(HashMap::new())
    }
}

/// Push-based mark price feed whose subscription set can be changed.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn subscribe(&self, symbols: &BTreeSet<String>) -> SourceResult<()>;

    async fn unsubscribe(&self, symbols: &BTreeSet<String>) -> SourceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_authentication_is_fatal() {
        assert!(SourceError::Authentication("401".into()).is_fatal());
        assert!(!SourceError::Transient("timeout".into()).is_fatal());
        assert!(!SourceError::Malformed("eof".into()).is_fatal());
    }
}
