//! Unrealized PnL calculation.

use crate::position::{Position, PositionSide, PriceTick};
use rust_decimal::Decimal;

/// Unrealized PnL of `position` at the mark carried by `tick`.
///
/// - LONG: `(mark - entry) * size`
/// - SHORT: `(entry - mark) * |size|`
///
/// Falls back to the venue-reported `last_known_pnl` when there is no tick,
/// when entry price or size is zero, or when the arithmetic would overflow.
/// Returns `None` only when no figure is available at all.
pub fn unrealized_pnl(position: &Position, tick: Option<&PriceTick>) -> Option<Decimal> {
    let fallback = position.last_known_pnl;

    let Some(tick) = tick else {
        return fallback;
    };
    if position.entry_price.is_zero() || position.size.is_zero() {
        return fallback;
    }

    let mark = tick.mark_price.inner();
    let entry = position.entry_price.inner();
    let size = position.size.inner().abs();

    let diff = match position.side {
        PositionSide::Long => mark.checked_sub(entry),
        PositionSide::Short => entry.checked_sub(mark),
    };

    diff.and_then(|d| d.checked_mul(size)).or(fallback)
}
