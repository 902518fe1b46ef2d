//! Signed REST snapshot sources.
//!
//! Each client implements [`posmon_core::SnapshotSource`] for one venue:
//! - `BinanceClient`: `/fapi/v2/positionRisk` for positions, `/fapi/v2/account`
//!   for margin figures, HMAC-SHA256 hex query signing
//! - `BitgetClient`: `/api/v2/mix/position/all-position`, HMAC-SHA256 base64
//!   header signing with passphrase
//!
//! HTTP and venue error codes are classified into the transient /
//! authentication / malformed split the engine acts on.

pub mod binance;
pub mod bitget;
pub mod credentials;
pub mod error;
pub mod signing;

pub use binance::BinanceClient;
pub use bitget::BitgetClient;
pub use credentials::Credentials;
pub use error::{VenueError, VenueResult};

use std::time::Duration;

/// Default timeout for REST requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn http_client(timeout: Duration) -> VenueResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| VenueError::HttpClient(format!("Failed to create HTTP client: {e}")))
}
