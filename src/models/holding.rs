//! Long-term holdings (delivery stock sitting in the demat account).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A settled holding as reported by a broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,

    pub quantity: i64,

    /// Average acquisition price per unit
    pub average_price: Decimal,

    /// Last traded price, when the broker reports one
    #[serde(default)]
    pub last_price: Option<Decimal>,

    #[serde(default)]
    pub exchange: Option<String>,
}

impl Holding {
    /// Cost basis of the holding.
    pub fn invested_value(&self) -> Decimal {
        self.average_price * Decimal::from(self.quantity)
    }

    /// Mark-to-market value, if a last price is known.
    pub fn current_value(&self) -> Option<Decimal> {
        self.last_price.map(|p| p * Decimal::from(self.quantity))
    }

    /// Unrealized P&L, if a last price is known.
    pub fn unrealized_pnl(&self) -> Option<Decimal> {
        self.current_value().map(|v| v - self.invested_value())
    }
}
