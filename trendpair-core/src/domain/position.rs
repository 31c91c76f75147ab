use serde::{Deserialize, Serialize};

use super::order::OrderSide;

/// Open position in one symbol as reported by the broker.
///
/// Quantity is signed: positive is long, negative is short. A flat symbol is
/// normally reported as no position at all, but a zero quantity is treated the
/// same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
}

impl Position {
    pub fn new(symbol: impl Into<String>, quantity: i64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    /// Side and size of the market order that would bring this position to flat.
    pub fn offsetting_order(&self) -> Option<(OrderSide, u64)> {
        match self.quantity {
            0 => None,
            q if q > 0 => Some((OrderSide::Sell, q.unsigned_abs())),
            q => Some((OrderSide::Buy, q.unsigned_abs())),
        }
    }
}

/// Account snapshot. Only buying power feeds decisions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Account {
    pub buying_power: f64,
}
