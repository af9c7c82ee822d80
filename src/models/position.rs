//! Position model and point-in-time snapshots of an account's positions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One net holding in one account at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Exchange-unique trading symbol
    pub symbol: String,

    /// Net quantity: positive is long, negative is short, zero is flat
    pub quantity: i64,

    /// Product classification (e.g. "CNC", "MIS"), passed through unchanged
    pub product: String,
}

impl Position {
    pub fn new(symbol: impl Into<String>, quantity: i64, product: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            product: product.into(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}

/// Complete state of an account's positions at the moment it was fetched.
///
/// Keyed by symbol, so there is at most one position per symbol. Brokers list
/// a symbol once per product (CNC and MIS legs of the same stock), so the
/// per-product quantities are kept alongside the net position. Snapshots are
/// never mutated after construction; a new poll builds a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionSnapshot {
    positions: BTreeMap<String, Position>,
    legs: BTreeMap<String, BTreeMap<String, i64>>,
}

impl PositionSnapshot {
    /// Build a snapshot from a broker's position list.
    ///
    /// Records for the same symbol are summed. The net position carries the
    /// product of its largest leg by absolute quantity, ties going to the
    /// alphabetically first product, so list order never matters.
    pub fn from_positions(positions: impl IntoIterator<Item = Position>) -> Self {
        let mut legs: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        for position in positions {
            let by_product = legs.entry(position.symbol).or_default();
            let quantity = by_product.entry(position.product).or_insert(0);
            *quantity = quantity.saturating_add(position.quantity);
        }

        let positions = legs
            .iter()
            .map(|(symbol, by_product)| {
                if by_product.len() > 1 {
                    debug!(symbol = %symbol, legs = ?by_product, "Merging multi-product position");
                }
                let quantity = by_product.values().fold(0i64, |acc, q| acc.saturating_add(*q));
                (symbol.clone(), Position::new(symbol.clone(), quantity, dominant_product(by_product)))
            })
            .collect();

        Self { positions, legs }
    }

    /// Quantity per product for one symbol, in product order.
    pub fn legs(&self, symbol: &str) -> Option<&BTreeMap<String, i64>> {
        self.legs.get(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Positions in ascending symbol order.
    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of positions with a non-zero quantity.
    pub fn open_count(&self) -> usize {
        self.positions.values().filter(|p| !p.is_flat()).count()
    }
}

fn dominant_product(by_product: &BTreeMap<String, i64>) -> String {
    let mut best: Option<(&String, u64)> = None;
    for (product, quantity) in by_product {
        let size = quantity.unsigned_abs();
        if best.map_or(true, |(_, top)| size > top) {
            best = Some((product, size));
        }
    }
    best.map(|(product, _)| product.clone()).unwrap_or_default()
}

impl FromIterator<Position> for PositionSnapshot {
    fn from_iter<I: IntoIterator<Item = Position>>(iter: I) -> Self {
        Self::from_positions(iter)
    }
}
