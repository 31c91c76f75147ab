//! RiskGate — cutoff flattening, hedge unwind, and the funds wait.
//!
//! Error contract per call:
//! - `flatten` / `close_position`: best-effort. Gateway failures are logged
//!   and recorded in the returned outcome, never propagated.
//! - `ensure_no_opposite_position`, `wait_for_buying_power`: gateway failures
//!   propagate to the caller.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::poll::{poll_until, Clock, MonotonicClock};
use crate::config::{ConfigError, FlattenScope, RiskConfig, StrategyConfig};
use crate::domain::{OrderAck, OrderIntent, TimeInForce};
use crate::gateway::{BrokerGateway, GatewayError};

/// Result of a best-effort single-symbol close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    Failed { reason: String },
}

impl CloseOutcome {
    fn from_result(result: Result<(), GatewayError>) -> Self {
        match result {
            Ok(()) => CloseOutcome::Closed,
            Err(e) => CloseOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, CloseOutcome::Closed)
    }
}

/// What `flatten` attempted and how each close went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenOutcome {
    pub scope: FlattenScope,
    /// One entry per close request: `"*"` for the whole account, else the symbol.
    pub closes: Vec<(String, CloseOutcome)>,
}

impl FlattenOutcome {
    pub fn is_clean(&self) -> bool {
        self.closes.iter().all(|(_, outcome)| outcome.is_closed())
    }
}

pub struct RiskGate<G: ?Sized> {
    gateway: Arc<G>,
    config: RiskConfig,
    exchange_tz: Tz,
    time_in_force: TimeInForce,
    pair_symbols: [String; 2],
    clock: Arc<dyn Clock>,
}

impl<G: BrokerGateway + ?Sized> RiskGate<G> {
    pub fn new(gateway: Arc<G>, strategy: &StrategyConfig) -> Result<Self, ConfigError> {
        strategy.validate()?;
        let exchange_tz = strategy.risk.exchange_tz()?;
        let time_in_force =
            strategy
                .allocation
                .time_in_force()
                .map_err(|e| ConfigError::Invalid {
                    pair: strategy.label(),
                    reason: e.to_string(),
                })?;
        Ok(Self {
            gateway,
            config: strategy.risk.clone(),
            exchange_tz,
            time_in_force,
            pair_symbols: [
                strategy.bullish_symbol.clone(),
                strategy.bearish_symbol.clone(),
            ],
            clock: Arc::new(MonotonicClock),
        })
    }

    /// Replace the real clock (tests use `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// True iff a cutoff is set and `now`, read as exchange-local time at
    /// minute resolution, is at or past it.
    pub fn should_flatten(&self, now: DateTime<Utc>) -> bool {
        let Some(cutoff) = self.config.close_all_at else {
            return false;
        };
        let local = now.with_timezone(&self.exchange_tz);
        NaiveTime::from_hms_opt(local.hour(), local.minute(), 0)
            .is_some_and(|minute| minute >= cutoff)
    }

    /// Close positions per the configured scope. Best-effort.
    pub fn flatten(&self) -> FlattenOutcome {
        let closes = match self.config.flatten_scope {
            FlattenScope::Account => {
                let outcome = CloseOutcome::from_result(self.gateway.close_all_positions());
                vec![("*".to_string(), outcome)]
            }
            FlattenScope::Pair => self
                .pair_symbols
                .iter()
                .map(|symbol| (symbol.clone(), self.close_position(symbol)))
                .collect(),
        };

        let outcome = FlattenOutcome {
            scope: self.config.flatten_scope,
            closes,
        };
        for (target, close) in &outcome.closes {
            if let CloseOutcome::Failed { reason } = close {
                warn!(close = %target, %reason, "flatten close failed; continuing");
            }
        }
        info!(scope = ?outcome.scope, clean = outcome.is_clean(), "flattened positions at cutoff");
        outcome
    }

    /// Close one symbol. Best-effort.
    pub fn close_position(&self, symbol: &str) -> CloseOutcome {
        let outcome = CloseOutcome::from_result(self.gateway.close_position(symbol));
        if let CloseOutcome::Failed { reason } = &outcome {
            warn!(%symbol, %reason, "close position failed; continuing");
        }
        outcome
    }

    /// Offset any open position in `hedge_symbol` with one market order.
    ///
    /// Returns the acknowledgement of the offsetting order, or `None` when the
    /// hedge was already flat.
    pub fn ensure_no_opposite_position(
        &self,
        hedge_symbol: &str,
    ) -> Result<Option<OrderAck>, GatewayError> {
        let Some(position) = self.gateway.position(hedge_symbol)? else {
            return Ok(None);
        };
        let Some((side, quantity)) = position.offsetting_order() else {
            return Ok(None);
        };
        let Some(intent) = OrderIntent::market(hedge_symbol, side, quantity, self.time_in_force)
        else {
            return Ok(None);
        };

        info!(order = %intent, held = position.quantity, "unwinding hedge position");
        let ack = self.gateway.submit_market_order(&intent)?;
        Ok(Some(ack))
    }

    /// Wait until buying power covers `required_cash`.
    ///
    /// Polls every `funds_poll_interval` until `funds_wait_timeout` elapses on
    /// the monotonic clock. A timeout is `Ok(false)`, not an error.
    pub fn wait_for_buying_power(&self, required_cash: f64) -> Result<bool, GatewayError> {
        let ready = poll_until(
            self.clock.as_ref(),
            self.config.funds_wait_timeout,
            self.config.funds_poll_interval,
            || {
                let account = self.gateway.account()?;
                debug!(
                    buying_power = account.buying_power,
                    required_cash, "polled buying power"
                );
                Ok(account.buying_power >= required_cash)
            },
        )?;

        if !ready {
            warn!(
                required_cash,
                timeout = ?self.config.funds_wait_timeout,
                "buying power did not cover order before timeout"
            );
        }
        Ok(ready)
    }
}
