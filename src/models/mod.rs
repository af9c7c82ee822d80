//! Data models for positions, holdings, and trade signals.

mod holding;
mod position;
mod signal;

pub use holding::Holding;
pub use position::{Position, PositionSnapshot};
pub use signal::{Direction, OrderId, OrderRequest, OrderType, TradeSignal};
