//! Exchange-imposed order constraints.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// SymbolTradingRules are fetched once per symbol per session and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolTradingRules {
    /// Smallest accepted base quantity.
    pub min_qty: Decimal,
    /// Smallest accepted order value (price × quantity) in quote.
    pub min_notional: Decimal,
    /// Quantities must be a multiple of this step.
    pub qty_step: Decimal,
    /// Prices must be a multiple of this step.
    pub price_step: Decimal,
}

impl SymbolTradingRules {
    /// Rounds a quantity down to the nearest multiple of `qty_step`.
    ///
    /// A non-positive step leaves the quantity untouched.
    pub fn floor_qty(&self, qty: Decimal) -> Decimal {
        floor_to_step(qty, self.qty_step)
    }

    /// Rounds a quantity up to the nearest multiple of `qty_step`.
    ///
    /// Zero when the result does not fit a `Decimal`.
    pub fn ceil_qty(&self, qty: Decimal) -> Decimal {
        if self.qty_step <= Decimal::ZERO {
            return qty;
        }
        qty.checked_div(self.qty_step)
            .and_then(|steps| steps.ceil().checked_mul(self.qty_step))
            .map_or(Decimal::ZERO, |v| v.normalize())
    }

    /// Rounds a price down to the nearest multiple of `price_step`.
    pub fn floor_price(&self, price: Decimal) -> Decimal {
        floor_to_step(price, self.price_step)
    }

    /// Returns true if the order clears both the quantity and notional minimums.
    pub fn accepts(&self, qty: Decimal, price: Decimal) -> bool {
        qty > Decimal::ZERO
            && qty >= self.min_qty
            && qty
                .checked_mul(price)
                .is_none_or(|notional| notional >= self.min_notional)
    }
}

/// Zero when the quotient overflows.
fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    value
        .checked_div(step)
        .and_then(|steps| steps.floor().checked_mul(step))
        .map_or(Decimal::ZERO, |v| v.normalize())
}
