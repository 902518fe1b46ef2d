//! Mark price stream client.
//!
//! Provides a self-healing WebSocket price feed with:
//! - Automatic reconnection with capped exponential backoff (1s, 2s, 4s .. 30s)
//! - Full subscription replay on every (re)connect
//! - Incremental or reconnect-based resubscription while streaming
//! - Heartbeat monitoring (idle or fixed-rate ping, pong timeout detection)
//! - Venue protocols for Binance USDⓈ-M and Bitget USDT futures
//!
//! Ticks are delivered as [`StreamEvent`]s on a bounded channel; subscription
//! changes are requested through a cloneable [`StreamHandle`].

pub mod backoff;
pub mod connection;
pub mod error;
pub mod handle;
pub mod heartbeat;
pub mod protocol;

pub use backoff::Backoff;
pub use connection::{
    ConnectionConfig, ConnectionManager, ListenerState, ResubscribePolicy, StreamEvent,
    RESUBSCRIBE_REASON,
};
pub use error::{WsError, WsResult};
pub use handle::StreamHandle;
pub use heartbeat::HeartbeatManager;
pub use protocol::{protocol_for, BinanceProtocol, BitgetProtocol, ParsedFrame, StreamProtocol};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the process-wide rustls crypto provider.
/// Must be called before any TLS connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
