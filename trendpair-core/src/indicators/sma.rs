//! Simple Moving Average (SMA).
//!
//! Rolling mean of close prices over a fixed window.
//! Lookback: period - 1 (first value on the `period`-th input).

use std::collections::VecDeque;

use super::Indicator;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
    window: VecDeque<f64>,
    sum: f64,
    count: usize,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            name: format!("sma_{period}"),
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
            count: 0,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Sma {
    type Input = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn update(&mut self, close: &f64) -> Option<f64> {
        self.count += 1;
        self.window.push_back(*close);
        self.sum += close;
        if self.window.len() > self.period {
            if let Some(leaving) = self.window.pop_front() {
                self.sum -= leaving;
            }
        }
        self.value()
    }

    fn value(&self) -> Option<f64> {
        (self.window.len() == self.period).then(|| self.sum / self.period as f64)
    }

    fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn sma_5_basic() {
        let mut sma = Sma::new(5);
        let out: Vec<Option<f64>> = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]
            .iter()
            .map(|c| sma.update(c))
            .collect();

        for (i, v) in out.iter().enumerate().take(4) {
            assert!(v.is_none(), "expected warm-up at index {i}");
        }
        // SMA[4] = mean(10,11,12,13,14) = 12.0
        assert_approx(out[4].unwrap(), 12.0, DEFAULT_EPSILON);
        // SMA[5] = mean(11,12,13,14,15) = 13.0
        assert_approx(out[5].unwrap(), 13.0, DEFAULT_EPSILON);
        // SMA[6] = mean(12,13,14,15,16) = 14.0
        assert_approx(out[6].unwrap(), 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_1_is_close() {
        let mut sma = Sma::new(1);
        assert_eq!(sma.update(&100.0), Some(100.0));
        assert_eq!(sma.update(&200.0), Some(200.0));
    }

    #[test]
    fn sma_too_few_inputs() {
        let mut sma = Sma::new(5);
        sma.update(&10.0);
        sma.update(&11.0);
        assert!(sma.value().is_none());
        assert_eq!(sma.count(), 2);
    }

    #[test]
    fn sma_lookback() {
        assert_eq!(Sma::new(20).lookback(), 19);
        assert_eq!(Sma::new(1).lookback(), 0);
    }
}
