//! Core domain types for the position monitor.
//!
//! This crate provides the types shared by every other posmon crate:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Position`, `PositionRecord`, `PriceTick`: Reconciled and raw venue state
//! - `Venue`, `ChannelMapping`: Venue identity and symbol-to-channel mapping
//! - `SnapshotSource`, `StreamSource`: Upstream collaborator traits
//! - `unrealized_pnl`: The pure PnL calculation

pub mod channel;
pub mod decimal;
pub mod error;
pub mod pnl;
pub mod position;
pub mod source;
pub mod venue;

pub use channel::ChannelMapping;
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use pnl::unrealized_pnl;
pub use position::{
    MarginInfo, MarginKey, MarginType, Position, PositionKey, PositionRecord, PositionSide,
    PriceTick,
};
pub use source::{SnapshotSource, SourceError, SourceResult, StreamSource};
pub use venue::Venue;
