//! Indicator bundle owned by one strategy engine.
//!
//! Fast EMA and slow SMA consume closes only; the ATR consumes the whole bar
//! because true range needs high, low and the previous close.

use serde::Serialize;

use super::{Atr, Ema, Indicator, Sma};
use crate::config::IndicatorConfig;
use crate::domain::Bar;

/// Point-in-time view of all three indicators.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct IndicatorSnapshot {
    pub fast: Option<f64>,
    pub slow: Option<f64>,
    pub volatility: Option<f64>,
}

impl IndicatorSnapshot {
    /// Both averages, once both are warmed up.
    pub fn averages(&self) -> Option<(f64, f64)> {
        Some((self.fast?, self.slow?))
    }
}

#[derive(Debug, Clone)]
pub struct IndicatorState {
    fast: Ema,
    slow: Sma,
    volatility: Atr,
    bars_seen: usize,
}

impl IndicatorState {
    pub fn new(fast_period: usize, slow_period: usize, volatility_period: usize) -> Self {
        Self {
            fast: Ema::new(fast_period),
            slow: Sma::new(slow_period),
            volatility: Atr::new(volatility_period),
            bars_seen: 0,
        }
    }

    pub fn from_config(config: &IndicatorConfig) -> Self {
        Self::new(config.ema_period, config.sma_period, config.atr_period)
    }

    /// Feed one bar. Bars must arrive in chronological order.
    pub fn update(&mut self, bar: &Bar) {
        self.fast.update(&bar.close);
        self.slow.update(&bar.close);
        self.volatility.update(bar);
        self.bars_seen += 1;
    }

    /// Bulk-ingest a chronological history through the live update path.
    pub fn seed<'a, I>(&mut self, bars: I)
    where
        I: IntoIterator<Item = &'a Bar>,
    {
        for bar in bars {
            self.update(bar);
        }
    }

    /// Latest (fast, slow) pair. Each side is `None` until its own window fills.
    pub fn latest(&self) -> (Option<f64>, Option<f64>) {
        (self.fast.value(), self.slow.value())
    }

    pub fn snapshot(&self) -> IndicatorSnapshot {
        IndicatorSnapshot {
            fast: self.fast.value(),
            slow: self.slow.value(),
            volatility: self.volatility.value(),
        }
    }

    /// Both averages are defined.
    pub fn is_warm(&self) -> bool {
        self.fast.is_ready() && self.slow.is_ready()
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    /// Bars needed before both averages are defined.
    pub fn warmup_bars(&self) -> usize {
        self.fast.lookback().max(self.slow.lookback()) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn warmup_is_independent_per_average() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let mut state = IndicatorState::new(2, 4, 3);

        state.update(&bars[0]);
        assert_eq!(state.latest(), (None, None));

        state.update(&bars[1]);
        let (fast, slow) = state.latest();
        assert!(fast.is_some());
        assert!(slow.is_none());

        state.update(&bars[2]);
        assert!(state.snapshot().volatility.is_some());
        assert!(state.snapshot().averages().is_none());

        state.update(&bars[3]);
        let (fast, slow) = state.snapshot().averages().unwrap();
        // SMA(4) of 10..13 = 11.5
        assert_approx(slow, 11.5, DEFAULT_EPSILON);
        assert!(fast > slow);
    }

    #[test]
    fn seed_matches_live_updates() {
        let closes: Vec<f64> = (0..60).map(|i| 20.0 + (i as f64 * 0.3).sin()).collect();
        let bars = make_bars(&closes);

        let mut seeded = IndicatorState::new(10, 50, 14);
        seeded.seed(&bars);

        let mut live = IndicatorState::new(10, 50, 14);
        for bar in &bars {
            live.update(bar);
        }

        assert_eq!(seeded.snapshot(), live.snapshot());
        assert_eq!(seeded.bars_seen(), 60);
    }

    #[test]
    fn warm_once_slow_window_fills() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let mut state = IndicatorState::new(2, 4, 3);
        state.seed(&bars[..3]);
        assert!(!state.is_warm());
        state.update(&bars[3]);
        assert!(state.is_warm());
    }

    #[test]
    fn warmup_bars_is_longest_window() {
        assert_eq!(IndicatorState::new(10, 50, 14).warmup_bars(), 50);
        assert_eq!(IndicatorState::new(30, 5, 14).warmup_bars(), 30);
    }
}
