//! Position diff: turns two successive snapshots into trade signals.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::models::{PositionSnapshot, TradeSignal};

use super::VanishedPolicy;

/// Delivery products settle into holdings overnight and then drop out of the
/// position list without the account having traded.
pub fn is_delivery_product(product: &str) -> bool {
    matches!(product, "CNC" | "MTF")
}

/// Compute the signals that move `old` to `new`.
///
/// One signal at most per symbol, in ascending symbol order. Each symbol is
/// compared product leg by product leg:
/// - a leg present in `new` moves by `q_new - q_old` (0 when it is new)
/// - a leg only in `old` moves by `-q_old` under [`VanishedPolicy::Close`],
///   unless it is a delivery product; otherwise it does not move
///
/// The signal trades the sum of the leg moves, in the product of the leg that
/// moved furthest in that direction.
pub fn diff(
    old: &PositionSnapshot,
    new: &PositionSnapshot,
    vanished: VanishedPolicy,
) -> Vec<TradeSignal> {
    let symbols: BTreeSet<&str> = old.symbols().chain(new.symbols()).collect();
    let empty = BTreeMap::new();

    symbols
        .into_iter()
        .filter_map(|symbol| {
            let old_legs = old.legs(symbol).unwrap_or(&empty);
            let new_legs = new.legs(symbol).unwrap_or(&empty);
            let moves = leg_moves(symbol, old_legs, new_legs, vanished);

            let delta = moves.iter().fold(0i64, |acc, (_, m)| acc.saturating_add(*m));
            let product = moving_product(&moves, delta)?;
            let signal = TradeSignal::from_delta(symbol, delta, product)?;

            match (old.get(symbol), new.get(symbol)) {
                (None, _) => {
                    info!(symbol = %symbol, quantity = delta, product = %product, "New position detected");
                }
                (Some(previous), None) => {
                    info!(
                        symbol = %symbol,
                        old_quantity = previous.quantity,
                        "Position vanished, closing on children"
                    );
                }
                (Some(previous), Some(current)) => {
                    info!(
                        symbol = %symbol,
                        old_quantity = previous.quantity,
                        new_quantity = current.quantity,
                        product = %product,
                        "Position change detected"
                    );
                }
            }
            Some(signal)
        })
        .collect()
}

/// Signed quantity change of every product leg of one symbol.
fn leg_moves<'a>(
    symbol: &str,
    old_legs: &'a BTreeMap<String, i64>,
    new_legs: &'a BTreeMap<String, i64>,
    vanished: VanishedPolicy,
) -> Vec<(&'a str, i64)> {
    let products: BTreeSet<&str> = old_legs
        .keys()
        .chain(new_legs.keys())
        .map(String::as_str)
        .collect();

    products
        .into_iter()
        .map(|product| {
            let before = old_legs.get(product).copied();
            let change = match (before, new_legs.get(product)) {
                (before, Some(after)) => after.saturating_sub(before.unwrap_or(0)),
                (Some(before), None) => {
                    let close = vanished == VanishedPolicy::Close && !is_delivery_product(product);
                    if close {
                        before.saturating_neg()
                    } else {
                        if before != 0 {
                            info!(
                                symbol = %symbol,
                                product = %product,
                                old_quantity = before,
                                "Position vanished, not replicated"
                            );
                        }
                        0
                    }
                }
                (None, None) => 0,
            };
            (product, change)
        })
        .collect()
}

/// Product of the leg with the largest move in the direction of `delta`.
fn moving_product<'a>(moves: &[(&'a str, i64)], delta: i64) -> Option<&'a str> {
    if delta == 0 {
        return None;
    }

    let mut best: Option<(&'a str, u64)> = None;
    for &(product, change) in moves {
        if change.signum() != delta.signum() {
            continue;
        }
        let size = change.unsigned_abs();
        if best.map_or(true, |(_, top)| size > top) {
            best = Some((product, size));
        }
    }
    best.map(|(product, _)| product)
}
