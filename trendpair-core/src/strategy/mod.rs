//! Crossover strategy for one bullish/bearish symbol pair.

pub mod engine;
pub mod signal;

pub use engine::{order_quantity, BarOutcome, EngineState, SkipReason, StrategyEngine, StrategyError};
pub use signal::Direction;
