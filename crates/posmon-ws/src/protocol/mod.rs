//! Venue wire protocols for the price stream.
//!
//! A protocol knows where to connect, how to ask for a set of channel symbols
//! and how to turn an inbound text frame into price ticks. It holds no
//! connection state.

mod binance;
mod bitget;

pub use binance::BinanceProtocol;
pub use bitget::BitgetProtocol;

use crate::error::WsResult;
use posmon_core::{PriceTick, Venue};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFrame {
    /// One or more mark price updates.
    Prices(Vec<PriceTick>),
    /// Application-level pong.
    Pong,
    /// Subscribe/unsubscribe acknowledgement.
    Ack,
    /// Venue reported an error for a request.
    Rejected(String),
    /// Well-formed but irrelevant.
    Ignored,
    /// Could not be understood.
    Malformed(String),
}

pub trait StreamProtocol: Send + Sync + 'static {
    fn venue(&self) -> Venue;

    /// Endpoint used when subscriptions are sent as frames.
    fn endpoint(&self, base_url: &str) -> String;

    /// Endpoint that carries the whole subscription set in the URL itself,
    /// if the venue supports it. Used by the reconnect resubscribe policy.
    fn inline_endpoint(&self, _base_url: &str, _symbols: &BTreeSet<String>) -> Option<String> {
        None
    }

    fn subscribe_frames(&self, symbols: &BTreeSet<String>, request_id: u64)
        -> WsResult<Vec<String>>;

    fn unsubscribe_frames(
        &self,
        symbols: &BTreeSet<String>,
        request_id: u64,
    ) -> WsResult<Vec<String>>;

    fn parse(&self, text: &str) -> ParsedFrame;

    /// Text ping for venues that want an application-level heartbeat instead
    /// of WebSocket ping control frames.
    fn ping_frame(&self) -> Option<String> {
        None
    }
}

/// Protocol implementation for a venue.
pub fn protocol_for(venue: Venue) -> Arc<dyn StreamProtocol> {
    match venue {
        Venue::Binance => Arc::new(BinanceProtocol),
        Venue::Bitget => Arc::new(BitgetProtocol::default()),
    }
}

/// Mark price strings must parse to a positive decimal.
pub(crate) fn parse_mark(raw: &serde_json::Value) -> Option<posmon_core::Price> {
    let text = match raw {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let price: posmon_core::Price = text.trim().parse().ok()?;
    price.is_positive().then_some(price)
}
