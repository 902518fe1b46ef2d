//! Symbol to stream-channel mapping.
//!
//! The snapshot API and the price stream do not always name an instrument the
//! same way. The mapping is applied both when deriving the required
//! subscription set from held positions and when deciding whether an incoming
//! tick belongs to a held position, so both sides agree on one channel symbol.

use serde::{Deserialize, Serialize};

/// Pure mapping from a position symbol to its price-stream channel symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMapping {
    /// Channel symbol equals the position symbol (upper-cased).
    #[default]
    Identity,
    /// Drop a contract qualifier such as `_UMCBL` (`BTCUSDT_UMCBL` -> `BTCUSDT`).
    StripContractSuffix,
}

impl ChannelMapping {
    pub fn apply(&self, symbol: &str) -> String {
        let symbol = symbol.trim();
        match self {
            ChannelMapping::Identity => symbol.to_ascii_uppercase(),
            ChannelMapping::StripContractSuffix => symbol
                .split_once('_')
                .map(|(base, _)| base)
                .unwrap_or(symbol)
                .to_ascii_uppercase(),
        }
    }
}
