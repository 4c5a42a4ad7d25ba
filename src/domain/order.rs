//! Order side and fill reports.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OrderSide represents the direction of an order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy base asset with quote.
    Buy,
    /// Sell base asset for quote.
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(format!("Unknown order side: {}", s)),
        }
    }
}

/// Fill is the venue's confirmation of an executed market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Venue order identifier.
    pub order_id: String,
    /// Executed base quantity.
    pub filled_quantity: Decimal,
    /// Average execution price.
    pub filled_price: Decimal,
    /// When the venue reported the fill.
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Quote value of the fill.
    pub fn notional(&self) -> Decimal {
        self.filled_quantity * self.filled_price
    }
}
