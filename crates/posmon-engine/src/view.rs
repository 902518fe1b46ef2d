//! Merged view pushed to viewers.
//!
//! Recomputed on demand from the store and cache, never stored. Serializes as
//! a JSON array with one object per open position, or a single sentinel
//! object when nothing is open.

use posmon_core::{unrealized_pnl, MarginType, Position, PositionSide, PriceTick, Venue};
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::sync::Arc;

pub const EMPTY_VIEW_MESSAGE: &str = "no open positions";

/// One row of the merged view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub exchange: Venue,
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
    pub margin_type: Option<MarginType>,
    pub margin_amount: Option<Decimal>,
}

impl PositionView {
    pub fn new(venue: Venue, position: &Position, tick: Option<&PriceTick>) -> Self {
        Self {
            exchange: venue,
            symbol: position.symbol.clone(),
            side: position.side,
            size: position.size.inner(),
            entry_price: position.entry_price.inner(),
            mark_price: tick.map(|t| t.mark_price.inner()),
            pnl: unrealized_pnl(position, tick),
            liquidation_price: position.liquidation_price.map(|p| p.inner()),
            margin_type: position.margin_type,
            margin_amount: position.margin_amount,
        }
    }
}

/// Every open position joined with its mark and PnL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedView {
    rows: Vec<PositionView>,
}

impl MergedView {
    pub fn new(rows: Vec<PositionView>) -> Self {
        Self { rows }
    }

    /// Concatenate views in the given order.
    pub fn concat(views: impl IntoIterator<Item = MergedView>) -> Self {
        Self {
            rows: views.into_iter().flat_map(|v| v.rows).collect(),
        }
    }

    pub fn rows(&self) -> &[PositionView] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

struct EmptyMarker;

impl Serialize for EmptyMarker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("msg", EMPTY_VIEW_MESSAGE)?;
        map.end()
    }
}

impl Serialize for MergedView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.rows.is_empty() {
            let mut seq = serializer.serialize_seq(Some(1))?;
            seq.serialize_element(&EmptyMarker)?;
            return seq.end();
        }
        self.rows.serialize(serializer)
    }
}

/// Anything a broadcast hub can recompute a view from.
pub trait ViewSource: Send + Sync {
    fn view(&self) -> MergedView;
}

/// Concatenation of several venue views, in construction order.
pub struct UnifiedView {
    sources: Vec<Arc<dyn ViewSource>>,
}

impl UnifiedView {
    pub fn new(sources: Vec<Arc<dyn ViewSource>>) -> Self {
        Self { sources }
    }
}

impl ViewSource for UnifiedView {
    fn view(&self) -> MergedView {
        MergedView::concat(self.sources.iter().map(|s| s.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use posmon_core::{Price, Size};
    use rust_decimal_macros::dec;

    fn position(side: PositionSide) -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            side,
            size: Size::new(dec!(1)),
            entry_price: Price::new(dec!(100)),
            liquidation_price: Some(Price::new(dec!(50))),
            margin_amount: Some(dec!(10)),
            margin_type: Some(MarginType::Crossed),
            last_known_pnl: None,
            updated_at: Utc::now(),
        }
    }

    struct Fixed(MergedView);

    impl ViewSource for Fixed {
        fn view(&self) -> MergedView {
            self.0.clone()
        }
    }

    #[test]
    fn test_empty_view_is_sentinel() {
        let json = MergedView::default().to_json().unwrap();
        assert_eq!(json, r#"[{"msg":"no open positions"}]"#);
    }

    #[test]
    fn test_row_wire_format() {
        let tick = PriceTick::new("BTCUSDT", Price::new(dec!(110)));
        let view = MergedView::new(vec![PositionView::new(
            Venue::Binance,
            &position(PositionSide::Long),
            Some(&tick),
        )]);
        let value: serde_json::Value = serde_json::from_str(&view.to_json().unwrap()).unwrap();
        let row = &value[0];
        assert_eq!(row["exchange"], "binance");
        assert_eq!(row["symbol"], "BTCUSDT");
        assert_eq!(row["side"], "LONG");
        assert_eq!(row["entryPrice"], "100");
        assert_eq!(row["markPrice"], "110");
        assert_eq!(row["pnl"], "10");
        assert_eq!(row["liquidationPrice"], "50");
        assert_eq!(row["marginType"], "CROSSED");
        assert_eq!(row["marginAmount"], "10");
    }

    #[test]
    fn test_missing_mark_serializes_null() {
        let view = MergedView::new(vec![PositionView::new(
            Venue::Bitget,
            &position(PositionSide::Short),
            None,
        )]);
        let value: serde_json::Value = serde_json::from_str(&view.to_json().unwrap()).unwrap();
        assert!(value[0]["markPrice"].is_null());
        assert!(value[0]["pnl"].is_null());
    }

    #[test]
    fn test_unified_concatenates_in_order() {
        let binance = MergedView::new(vec![PositionView::new(
            Venue::Binance,
            &position(PositionSide::Long),
            None,
        )]);
        let bitget = MergedView::new(vec![PositionView::new(
            Venue::Bitget,
            &position(PositionSide::Short),
            None,
        )]);
        let unified = UnifiedView::new(vec![
            Arc::new(Fixed(binance)),
            Arc::new(Fixed(bitget)),
        ]);
        let view = unified.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view.rows()[0].exchange, Venue::Binance);
        assert_eq!(view.rows()[1].exchange, Venue::Bitget);
    }

    #[test]
    fn test_unified_all_empty_is_single_sentinel() {
        let unified = UnifiedView::new(vec![
            Arc::new(Fixed(MergedView::default())),
            Arc::new(Fixed(MergedView::default())),
        ]);
        assert_eq!(
            unified.view().to_json().unwrap(),
            r#"[{"msg":"no open positions"}]"#
        );
    }
}
