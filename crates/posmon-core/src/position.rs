//! Position and price types.
//!
//! `PositionRecord` is what a snapshot source reports; `Position` is the
//! reconciled entry held by the engine after margin enrichment.

use crate::decimal::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side implied by a signed one-way-mode amount (negative is short).
    pub fn from_signed(amount: Decimal) -> Self {
        if amount.is_sign_negative() && !amount.is_zero() {
            PositionSide::Short
        } else {
            PositionSide::Long
        }
    }

    /// Parse a venue side label, case-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Some(PositionSide::Long),
            "short" | "sell" => Some(PositionSide::Short),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Margin mode of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginType {
    Isolated,
    Crossed,
}

impl MarginType {
    /// Parse venue labels (`isolated`, `cross`, `crossed`), case-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "isolated" | "fixed" => Some(MarginType::Isolated),
            "cross" | "crossed" => Some(MarginType::Crossed),
            _ => None,
        }
    }
}

/// Identity of a position within one venue. Hedge mode allows both sides of
/// the same symbol to coexist.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub side: PositionSide,
}

impl PositionKey {
    pub fn new(symbol: impl Into<String>, side: PositionSide) -> Self {
        Self {
            symbol: symbol.into(),
            side,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.side)
    }
}

/// One open position as reported by a snapshot source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Size,
    pub entry_price: Price,
    pub liquidation_price: Option<Price>,
    /// Venue-computed unrealized PnL, if the venue reports one.
    pub unrealized_pnl: Option<Decimal>,
    pub margin_type: Option<MarginType>,
    /// Margin reported inline with the position. Takes precedence over the
    /// separately fetched margin map.
    pub margin_amount: Option<Decimal>,
}

impl PositionRecord {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.side)
    }
}

/// Lookup key for margin figures. `side` is `None` when the venue reports
/// margin per symbol rather than per side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarginKey {
    pub symbol: String,
    pub side: Option<PositionSide>,
}

impl MarginKey {
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            side: None,
        }
    }

    pub fn sided(symbol: impl Into<String>, side: PositionSide) -> Self {
        Self {
            symbol: symbol.into(),
            side: Some(side),
        }
    }
}

/// Margin committed to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginInfo {
    pub amount: Decimal,
    pub margin_type: Option<MarginType>,
}

/// Reconciled position held by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Size,
    pub entry_price: Price,
    pub liquidation_price: Option<Price>,
    pub margin_amount: Option<Decimal>,
    pub margin_type: Option<MarginType>,
    pub last_known_pnl: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Build from a snapshot record, enriching with margin figures.
    ///
    /// Inline margin wins; otherwise margin is looked up per side first, then
    /// per symbol.
    pub fn from_record(
        record: PositionRecord,
        margins: &std::collections::HashMap<MarginKey, MarginInfo>,
        now: DateTime<Utc>,
    ) -> Self {
        let margin = margins
            .get(&MarginKey::sided(record.symbol.clone(), record.side))
            .or_else(|| margins.get(&MarginKey::symbol(record.symbol.clone())));

        Self {
            margin_amount: record.margin_amount.or(margin.map(|m| m.amount)),
            margin_type: record.margin_type.or(margin.and_then(|m| m.margin_type)),
            symbol: record.symbol,
            side: record.side,
            size: record.size,
            entry_price: record.entry_price,
            liquidation_price: record.liquidation_price,
            last_known_pnl: record.unrealized_pnl,
            updated_at: now,
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.side)
    }

    /// True when every venue-reported field matches; `updated_at` is ignored.
    pub fn same_figures(&self, other: &Position) -> bool {
        self.symbol == other.symbol
            && self.side == other.side
            && self.size == other.size
            && self.entry_price == other.entry_price
            && self.liquidation_price == other.liquidation_price
            && self.margin_amount == other.margin_amount
            && self.margin_type == other.margin_type
            && self.last_known_pnl == other.last_known_pnl
    }
}

/// Most recent mark price for a channel symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceTick {
    pub symbol: String,
    pub mark_price: Price,
    pub received_at: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(symbol: impl Into<String>, mark_price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            mark_price,
            received_at: Utc::now(),
        }
    }
}
