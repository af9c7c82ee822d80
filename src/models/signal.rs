//! Trade signals produced by the position diff and the order requests
//! derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Direction that moves a position by a signed quantity delta.
    pub fn from_delta(delta: i64) -> Self {
        if delta > 0 {
            Direction::Buy
        } else {
            Direction::Sell
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution style of a replicated order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic instruction to replicate onto every child account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,

    /// Magnitude to trade, never zero
    pub quantity: u64,

    pub direction: Direction,

    pub order_type: OrderType,

    /// Copied from the position that triggered the signal
    pub product: String,
}

impl TradeSignal {
    /// Market-order signal for `quantity` units. Returns `None` for a zero
    /// quantity, since a zero-magnitude signal is never emitted.
    pub fn market(
        symbol: impl Into<String>,
        quantity: u64,
        direction: Direction,
        product: impl Into<String>,
    ) -> Option<Self> {
        if quantity == 0 {
            return None;
        }
        Some(Self {
            symbol: symbol.into(),
            quantity,
            direction,
            order_type: OrderType::Market,
            product: product.into(),
        })
    }

    /// Signal that moves a position by the signed `delta`.
    pub fn from_delta(symbol: &str, delta: i64, product: &str) -> Option<Self> {
        Self::market(symbol, delta.unsigned_abs(), Direction::from_delta(delta), product)
    }

    pub fn to_order(&self) -> OrderRequest<'_> {
        OrderRequest {
            symbol: &self.symbol,
            quantity: self.quantity,
            direction: self.direction,
            order_type: self.order_type,
            product: &self.product,
        }
    }
}

impl fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({}, {})",
            self.direction, self.quantity, self.symbol, self.product, self.order_type
        )
    }
}

/// Broker-facing order parameters, borrowed from a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRequest<'a> {
    pub symbol: &'a str,
    pub quantity: u64,
    pub direction: Direction,
    pub order_type: OrderType,
    pub product: &'a str,
}

/// Opaque identifier a broker returns for an accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
