//! Streaming indicator implementations.
//!
//! Every indicator consumes one input per bar and keeps only the state it needs
//! to produce the next value. Nothing is recomputed over history.
//!
//! Warm-up contract: `value()` is `None` until `lookback() + 1` inputs have
//! been consumed, and `Some` on every update after that.

pub mod atr;
pub mod ema;
pub mod sma;
pub mod state;

pub use atr::{true_range, Atr};
pub use ema::Ema;
pub use sma::Sma;
pub use state::{IndicatorSnapshot, IndicatorState};

/// Trait for streaming indicators.
///
/// `Input` is what one bar contributes: a close price for the moving
/// averages, the whole bar for range-based measures.
pub trait Indicator: Send + Sync {
    type Input: ?Sized;

    /// Human-readable name (e.g., "ema_10", "atr_14").
    fn name(&self) -> &str;

    /// Number of inputs consumed before the first value is produced.
    fn lookback(&self) -> usize;

    /// Feed the next input and return the updated value, if warmed up.
    fn update(&mut self, input: &Self::Input) -> Option<f64>;

    /// Latest value, `None` during warm-up.
    fn value(&self) -> Option<f64>;

    /// Inputs consumed so far.
    fn count(&self) -> usize;

    fn is_ready(&self) -> bool {
        self.value().is_some()
    }
}

/// Create synthetic one-minute bars from close prices for testing.
///
/// Generates plausible OHLV: open = prev_close (or close for first bar),
/// high = max(open,close) + 1.0, low = min(open,close) - 1.0, volume = 1000.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<crate::domain::Bar> {
    use crate::domain::Bar;
    use chrono::TimeZone;
    let base = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            let high = open.max(close) + 1.0;
            let low = open.min(close) - 1.0;
            Bar {
                symbol: "TEST".to_string(),
                timestamp: base + chrono::Duration::minutes(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000,
            }
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
