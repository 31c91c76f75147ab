//! StrategyEngine — per-bar decision state machine for one symbol pair.
//!
//! Each bar runs four phases:
//! 1. Validate the bar and update indicators
//! 2. Stay idle while either average is warming up
//! 3. Flatten at the cutoff (no entry on the same bar)
//! 4. Enter on the crossover bias, behind the risk gate
//!
//! The engine owns its indicator state and is driven by exactly one caller at
//! a time; `on_bar` takes `&mut self` so overlapping bars cannot compile.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::signal::Direction;
use crate::config::{ConfigError, StrategyConfig};
use crate::domain::{Bar, BarError, OrderAck, OrderIntent, OrderSide, TimeInForce};
use crate::gateway::{BrokerGateway, GatewayError};
use crate::indicators::{IndicatorSnapshot, IndicatorState};
use crate::risk::{Clock, FlattenOutcome, RiskGate};

/// Errors from processing one bar. The caller logs them and moves on.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("rejected bar: {0}")]
    InvalidBar(#[from] BarError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Decision state reached on the most recent bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Flattening,
    Entering(Direction),
}

/// Why an entry attempt stopped without an order. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Spendable cash does not buy a single share.
    ZeroQuantity,
    /// Buying power never covered the order before the funds-wait timeout.
    FundsTimeout,
    /// The target symbol is already held long.
    AlreadyHolding,
}

/// What the engine did with one bar.
#[derive(Debug, Clone, PartialEq)]
pub enum BarOutcome {
    /// Bar for a symbol this pair does not compute signals on.
    Ignored,
    WarmingUp,
    Flattened(FlattenOutcome),
    /// Averages exactly equal.
    Hold,
    Skipped {
        direction: Direction,
        reason: SkipReason,
        hedge: Option<OrderAck>,
    },
    Entered {
        direction: Direction,
        hedge: Option<OrderAck>,
        order: OrderIntent,
        ack: OrderAck,
    },
}

pub struct StrategyEngine<G: ?Sized> {
    config: StrategyConfig,
    time_in_force: TimeInForce,
    gateway: Arc<G>,
    indicators: IndicatorState,
    risk: RiskGate<G>,
    state: EngineState,
}

impl<G: BrokerGateway + ?Sized> StrategyEngine<G> {
    pub fn new(gateway: Arc<G>, config: StrategyConfig) -> Result<Self, ConfigError> {
        let risk = RiskGate::new(gateway.clone(), &config)?;
        let time_in_force =
            config
                .allocation
                .time_in_force()
                .map_err(|e| ConfigError::Invalid {
                    pair: config.label(),
                    reason: e.to_string(),
                })?;
        Ok(Self {
            indicators: IndicatorState::from_config(&config.indicators),
            time_in_force,
            gateway,
            risk,
            config,
            state: EngineState::Idle,
        })
    }

    /// Replace the funds-wait clock (tests use `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.risk = self.risk.with_clock(clock);
        self
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn snapshot(&self) -> IndicatorSnapshot {
        self.indicators.snapshot()
    }

    pub fn indicators(&self) -> &IndicatorState {
        &self.indicators
    }

    pub fn risk(&self) -> &RiskGate<G> {
        &self.risk
    }

    /// Symbol whose bars drive the indicators.
    pub fn signal_symbol(&self) -> &str {
        &self.config.bullish_symbol
    }

    /// Warm indicators up from history, oldest first. Returns bars ingested.
    ///
    /// Bars for other symbols and invalid bars are skipped.
    pub fn seed(&mut self, bars: &[Bar]) -> usize {
        let mut ingested = 0;
        for bar in bars {
            if bar.symbol != self.config.bullish_symbol {
                continue;
            }
            if let Err(e) = bar.validate() {
                debug!(error = %e, "skipping invalid seed bar");
                continue;
            }
            self.indicators.update(bar);
            ingested += 1;
        }
        ingested
    }

    /// Fetch `seed_bars` of history for the signal symbol and ingest them.
    pub fn seed_from_gateway(&mut self) -> Result<usize, GatewayError> {
        let bars = self
            .gateway
            .seed_bars(&self.config.bullish_symbol, self.config.indicators.seed_bars)?;
        let ingested = self.seed(&bars);
        if !self.indicators.is_warm() {
            warn!(
                pair = %self.config.label(),
                ingested,
                needed = self.indicators.warmup_bars(),
                "seed history too short; warming up on live bars"
            );
        }
        let snapshot = self.indicators.snapshot();
        info!(
            pair = %self.config.label(),
            ingested,
            fast = ?snapshot.fast,
            slow = ?snapshot.slow,
            "seeded indicators"
        );
        Ok(ingested)
    }

    /// Process one live bar.
    pub fn on_bar(&mut self, bar: &Bar) -> Result<BarOutcome, StrategyError> {
        if bar.symbol != self.config.bullish_symbol {
            debug!(symbol = %bar.symbol, "bar not used for signals");
            return Ok(BarOutcome::Ignored);
        }
        bar.validate()?;

        self.indicators.update(bar);
        let snapshot = self.indicators.snapshot();
        debug!(
            symbol = %bar.symbol,
            close = bar.close,
            fast = ?snapshot.fast,
            slow = ?snapshot.slow,
            volatility = ?snapshot.volatility,
            "indicators updated"
        );

        let Some((fast, slow)) = snapshot.averages() else {
            self.state = EngineState::Idle;
            return Ok(BarOutcome::WarmingUp);
        };

        if self.risk.should_flatten(bar.timestamp) {
            self.state = EngineState::Flattening;
            return Ok(BarOutcome::Flattened(self.risk.flatten()));
        }

        let Some(direction) = Direction::from_averages(fast, slow) else {
            self.state = EngineState::Idle;
            debug!(fast, slow, "averages equal; holding");
            return Ok(BarOutcome::Hold);
        };

        self.state = EngineState::Entering(direction);
        self.enter(direction, bar.close)
    }

    fn symbols_for(&self, direction: Direction) -> (&str, &str) {
        match direction {
            Direction::Bullish => (
                self.config.bullish_symbol.as_str(),
                self.config.bearish_symbol.as_str(),
            ),
            Direction::Bearish => (
                self.config.bearish_symbol.as_str(),
                self.config.bullish_symbol.as_str(),
            ),
        }
    }

    /// Entry procedure, in strict order: unwind hedge, size from fresh buying
    /// power, wait for funds, refuse to stack, submit.
    fn enter(&self, direction: Direction, last_price: f64) -> Result<BarOutcome, StrategyError> {
        let (target, hedge_symbol) = self.symbols_for(direction);
        let hedge = self.risk.ensure_no_opposite_position(hedge_symbol)?;

        let account = self.gateway.account()?;
        let spendable = account.buying_power * self.config.allocation.cash_fraction;
        let quantity = order_quantity(spendable, last_price);
        let Some(order) = OrderIntent::market(target, OrderSide::Buy, quantity, self.time_in_force)
        else {
            return Ok(skipped(direction, SkipReason::ZeroQuantity, hedge));
        };

        if !self
            .risk
            .wait_for_buying_power(quantity as f64 * last_price)?
        {
            return Ok(skipped(direction, SkipReason::FundsTimeout, hedge));
        }

        if let Some(position) = self.gateway.position(target)? {
            if position.is_long() {
                return Ok(skipped(direction, SkipReason::AlreadyHolding, hedge));
            }
        }

        let ack = self.gateway.submit_market_order(&order)?;
        info!(%direction, order = %order, order_id = %ack.order_id, "entry submitted");
        Ok(BarOutcome::Entered {
            direction,
            hedge,
            order,
            ack,
        })
    }
}

fn skipped(direction: Direction, reason: SkipReason, hedge: Option<OrderAck>) -> BarOutcome {
    debug!(%direction, ?reason, "entry skipped");
    BarOutcome::Skipped {
        direction,
        reason,
        hedge,
    }
}

/// Whole shares affordable with `spendable` at `price`. Zero for a
/// non-positive or non-finite price or budget.
pub fn order_quantity(spendable: f64, price: f64) -> u64 {
    if !(price > 0.0 && price.is_finite()) || !(spendable > 0.0 && spendable.is_finite()) {
        return 0;
    }
    (spendable / price).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Position;
    use crate::gateway::InMemoryGateway;
    use crate::risk::ManualClock;
    use chrono::{TimeZone, Utc};

    fn bar(close: f64, minute: i64) -> Bar {
        Bar {
            symbol: "SOXL".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap()
                + chrono::Duration::minutes(minute),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 1_000,
        }
    }

    /// EMA(1) and SMA(2): fast is the close, slow is the mean of the last two.
    fn engine(gw: Arc<InMemoryGateway>) -> StrategyEngine<InMemoryGateway> {
        let mut config = StrategyConfig::default();
        config.indicators.ema_period = 1;
        config.indicators.sma_period = 2;
        config.indicators.atr_period = 2;
        config.risk.close_all_at = None;
        StrategyEngine::new(gw, config)
            .unwrap()
            .with_clock(Arc::new(ManualClock::new()))
    }

    #[test]
    fn quantity_arithmetic() {
        assert_eq!(order_quantity(1000.0 * 0.9, 33.0), 27);
        assert_eq!(order_quantity(10.0, 33.0), 0);
        assert_eq!(order_quantity(100.0, 0.0), 0);
        assert_eq!(order_quantity(100.0, -5.0), 0);
        assert_eq!(order_quantity(-100.0, 5.0), 0);
        assert_eq!(order_quantity(f64::NAN, 5.0), 0);
    }

    #[test]
    fn warmup_then_bullish_entry() {
        let gw = Arc::new(InMemoryGateway::new(1000.0));
        let mut eng = engine(gw.clone());

        assert_eq!(eng.on_bar(&bar(30.0, 0)).unwrap(), BarOutcome::WarmingUp);
        assert_eq!(eng.state(), EngineState::Idle);

        let outcome = eng.on_bar(&bar(33.0, 1)).unwrap();
        match outcome {
            BarOutcome::Entered { direction, order, hedge, .. } => {
                assert_eq!(direction, Direction::Bullish);
                assert_eq!(order.symbol, "SOXL");
                assert_eq!(order.side, OrderSide::Buy);
                assert_eq!(order.quantity, 27);
                assert!(hedge.is_none());
            }
            other => panic!("expected entry, got {other:?}"),
        }
        assert_eq!(eng.state(), EngineState::Entering(Direction::Bullish));
        assert_eq!(gw.orders().len(), 1);
    }

    #[test]
    fn bearish_entry_unwinds_bullish_hedge_first() {
        let gw = Arc::new(InMemoryGateway::new(1000.0));
        gw.set_position(Position::new("SOXL", 4));
        let mut eng = engine(gw.clone());

        eng.on_bar(&bar(30.0, 0)).unwrap();
        let outcome = eng.on_bar(&bar(25.0, 1)).unwrap();
        assert!(matches!(
            outcome,
            BarOutcome::Entered { direction: Direction::Bearish, hedge: Some(_), .. }
        ));

        let orders = gw.orders();
        assert_eq!(orders.len(), 2);
        assert_eq!((orders[0].symbol.as_str(), orders[0].side, orders[0].quantity), ("SOXL", OrderSide::Sell, 4));
        assert_eq!(orders[1].symbol, "SOXS");
        assert_eq!(orders[1].side, OrderSide::Buy);
    }

    #[test]
    fn equal_averages_hold() {
        let gw = Arc::new(InMemoryGateway::new(1000.0));
        let mut eng = engine(gw.clone());
        eng.on_bar(&bar(30.0, 0)).unwrap();
        assert_eq!(eng.on_bar(&bar(30.0, 1)).unwrap(), BarOutcome::Hold);
        assert_eq!(eng.state(), EngineState::Idle);
        assert!(gw.orders().is_empty());
        assert_eq!(gw.account_reads(), 0);
    }

    #[test]
    fn already_holding_target_is_not_stacked() {
        let gw = Arc::new(InMemoryGateway::new(1000.0));
        gw.set_position(Position::new("SOXL", 10));
        let mut eng = engine(gw.clone());
        eng.on_bar(&bar(30.0, 0)).unwrap();
        let outcome = eng.on_bar(&bar(33.0, 1)).unwrap();
        assert!(matches!(
            outcome,
            BarOutcome::Skipped { reason: SkipReason::AlreadyHolding, .. }
        ));
        assert!(gw.orders().is_empty());
    }

    #[test]
    fn low_funds_is_silent_no_op() {
        let gw = Arc::new(InMemoryGateway::new(20.0));
        let mut eng = engine(gw.clone());
        eng.on_bar(&bar(30.0, 0)).unwrap();
        let outcome = eng.on_bar(&bar(33.0, 1)).unwrap();
        assert!(matches!(
            outcome,
            BarOutcome::Skipped { reason: SkipReason::ZeroQuantity, .. }
        ));
        assert!(gw.orders().is_empty());
    }

    #[test]
    fn funds_timeout_abandons_entry() {
        let gw = Arc::new(InMemoryGateway::new(1000.0));
        // First read sizes the order; every later read is short.
        gw.script_buying_power([1000.0, 10.0]);
        let mut eng = engine(gw.clone());
        eng.on_bar(&bar(30.0, 0)).unwrap();
        let outcome = eng.on_bar(&bar(33.0, 1)).unwrap();
        assert!(matches!(
            outcome,
            BarOutcome::Skipped { reason: SkipReason::FundsTimeout, .. }
        ));
        assert!(gw.orders().is_empty());
    }

    #[test]
    fn non_positive_close_rejected_before_indicators() {
        let gw = Arc::new(InMemoryGateway::new(1000.0));
        let mut eng = engine(gw);
        let mut bad = bar(30.0, 0);
        bad.close = 0.0;
        bad.low = 0.0;
        assert!(matches!(eng.on_bar(&bad), Err(StrategyError::InvalidBar(_))));
        assert_eq!(eng.indicators().bars_seen(), 0);
    }

    #[test]
    fn other_symbols_are_ignored() {
        let gw = Arc::new(InMemoryGateway::new(1000.0));
        let mut eng = engine(gw);
        let mut other = bar(30.0, 0);
        other.symbol = "SOXS".into();
        assert_eq!(eng.on_bar(&other).unwrap(), BarOutcome::Ignored);
        assert_eq!(eng.indicators().bars_seen(), 0);
    }

    #[test]
    fn order_error_propagates() {
        let gw = Arc::new(InMemoryGateway::new(1000.0));
        gw.fail_orders(Some(GatewayError::Rejected("market closed".into())));
        let mut eng = engine(gw);
        eng.on_bar(&bar(30.0, 0)).unwrap();
        assert!(matches!(
            eng.on_bar(&bar(33.0, 1)),
            Err(StrategyError::Gateway(GatewayError::Rejected(_)))
        ));
    }

    #[test]
    fn seed_skips_foreign_and_invalid_bars() {
        let gw = Arc::new(InMemoryGateway::new(1000.0));
        let mut eng = engine(gw);
        let mut foreign = bar(30.0, 0);
        foreign.symbol = "SOXS".into();
        let mut invalid = bar(30.0, 1);
        invalid.close = -1.0;
        let n = eng.seed(&[foreign, invalid, bar(30.0, 2), bar(31.0, 3)]);
        assert_eq!(n, 2);
        assert!(eng.snapshot().averages().is_some());
    }
}
