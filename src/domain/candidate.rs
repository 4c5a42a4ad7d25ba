//! Ranked entry candidate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A symbol proposed for entry, with its ranking score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    /// Higher is better.
    pub score: Decimal,
    /// Latest ATR, if the source computed one.
    pub atr: Option<Decimal>,
}

impl Candidate {
    pub fn new(symbol: impl Into<String>, score: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            score,
            atr: None,
        }
    }

    pub fn with_atr(mut self, atr: Decimal) -> Self {
        self.atr = Some(atr);
        self
    }
}
