//! Bar — the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OHLCV bar for a single symbol over one bar interval.
///
/// Bars arrive in chronological order per symbol. The timestamp is the bar's
/// open time in UTC, as reported by the market data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Why a bar was refused before it could touch indicator state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarError {
    #[error("{symbol} bar at {timestamp}: non-finite {field}")]
    NonFinite {
        symbol: String,
        timestamp: DateTime<Utc>,
        field: &'static str,
    },

    #[error("{symbol} bar at {timestamp}: close {close} must be positive")]
    NonPositiveClose {
        symbol: String,
        timestamp: DateTime<Utc>,
        close: f64,
    },

    #[error("{symbol} bar at {timestamp}: high {high} below low {low}")]
    InvertedRange {
        symbol: String,
        timestamp: DateTime<Utc>,
        high: f64,
        low: f64,
    },
}

impl Bar {
    /// Check that the bar can safely feed indicators and order sizing.
    ///
    /// The close is used as the last traded price and divided into the
    /// spendable cash, so it must be strictly positive.
    pub fn validate(&self) -> Result<(), BarError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(BarError::NonFinite {
                    symbol: self.symbol.clone(),
                    timestamp: self.timestamp,
                    field,
                });
            }
        }

        if self.close <= 0.0 {
            return Err(BarError::NonPositiveClose {
                symbol: self.symbol.clone(),
                timestamp: self.timestamp,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarError::InvertedRange {
                symbol: self.symbol.clone(),
                timestamp: self.timestamp,
                high: self.high,
                low: self.low,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bar() -> Bar {
        Bar {
            symbol: "SOXL".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 15, 30, 0).unwrap(),
            open: 30.0,
            high: 31.5,
            low: 29.8,
            close: 31.2,
            volume: 50_000,
        }
    }

    #[test]
    fn valid_bar_passes() {
        assert!(sample_bar().validate().is_ok());
    }

    #[test]
    fn zero_close_rejected() {
        let mut bar = sample_bar();
        bar.close = 0.0;
        bar.low = 0.0;
        assert!(matches!(
            bar.validate(),
            Err(BarError::NonPositiveClose { .. })
        ));
    }

    #[test]
    fn negative_close_rejected() {
        let mut bar = sample_bar();
        bar.close = -1.0;
        assert!(matches!(
            bar.validate(),
            Err(BarError::NonPositiveClose { .. })
        ));
    }

    #[test]
    fn nan_field_rejected() {
        let mut bar = sample_bar();
        bar.high = f64::NAN;
        match bar.validate() {
            Err(BarError::NonFinite { field, .. }) => assert_eq!(field, "high"),
            other => panic!("expected NonFinite, got {other:?}"),
        }
    }

    #[test]
    fn inverted_range_rejected() {
        let mut bar = sample_bar();
        bar.high = 29.0;
        assert!(matches!(bar.validate(), Err(BarError::InvertedRange { .. })));
    }

    #[test]
    fn bar_serialization_roundtrip() {
        let bar = sample_bar();
        let json = serde_json::to_string(&bar).unwrap();
        let deser: Bar = serde_json::from_str(&json).unwrap();
        assert_eq!(bar, deser);
    }
}
