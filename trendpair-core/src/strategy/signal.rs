//! Crossover bias between the fast and slow averages.

use serde::Serialize;
use std::fmt;

/// Which side of the pair the averages favour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Fast above slow: hold the bullish symbol.
    Bullish,
    /// Fast below slow: hold the bearish symbol.
    Bearish,
}

impl Direction {
    /// Direction implied by the averages. Equal (or incomparable) averages
    /// carry no bias.
    pub fn from_averages(fast: f64, slow: f64) -> Option<Self> {
        if fast > slow {
            Some(Direction::Bullish)
        } else if fast < slow {
            Some(Direction::Bearish)
        } else {
            None
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bullish => f.write_str("bullish"),
            Direction::Bearish => f.write_str("bearish"),
        }
    }
}
