//! Venue identity.

use crate::channel::ChannelMapping;
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A futures venue whose positions are monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Bitget,
}

impl Venue {
    pub const ALL: [Venue; 2] = [Venue::Binance, Venue::Bitget];

    /// Lowercase identifier used in URLs, config and the `exchange` row field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Bitget => "bitget",
        }
    }

    /// Symbol to stream-channel mapping used by this venue.
    pub fn channel_mapping(&self) -> ChannelMapping {
        match self {
            Venue::Binance => ChannelMapping::Identity,
            Venue::Bitget => ChannelMapping::StripContractSuffix,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "bitget" => Ok(Venue::Bitget),
            other => Err(CoreError::UnknownVenue(other.to_string())),
        }
    }
}
