//! In-process broker gateway.
//!
//! Market orders fill instantly and in full. When a mark price is known for
//! the symbol, fills move buying power by `quantity * mark`. Every submitted
//! intent is recorded so tests can assert exactly what the engine sent.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use super::{BrokerGateway, GatewayError};
use crate::domain::{Account, Bar, OrderAck, OrderIntent, OrderSide, Position};

#[derive(Debug, Default)]
struct State {
    account: Account,
    buying_power_script: VecDeque<f64>,
    positions: BTreeMap<String, i64>,
    marks: HashMap<String, f64>,
    history: HashMap<String, Vec<Bar>>,
    orders: Vec<OrderIntent>,
    account_reads: usize,
    fail_account: Option<GatewayError>,
    fail_positions: Option<GatewayError>,
    fail_orders: Option<GatewayError>,
    fail_closes: Option<GatewayError>,
}

#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<State>,
}

impl InMemoryGateway {
    pub fn new(buying_power: f64) -> Self {
        let gateway = Self::default();
        gateway.set_account(Account { buying_power });
        gateway
    }

    pub fn set_account(&self, account: Account) {
        self.state.lock().unwrap().account = account;
    }

    /// Buying power values returned by successive `account()` calls. Once the
    /// script runs out, the last value sticks.
    pub fn script_buying_power(&self, values: impl IntoIterator<Item = f64>) {
        self.state.lock().unwrap().buying_power_script = values.into_iter().collect();
    }

    pub fn set_position(&self, position: Position) {
        let mut state = self.state.lock().unwrap();
        if position.quantity == 0 {
            state.positions.remove(&position.symbol);
        } else {
            state.positions.insert(position.symbol, position.quantity);
        }
    }

    /// Price used to settle fills in `symbol`.
    pub fn set_mark(&self, symbol: &str, price: f64) {
        self.state
            .lock()
            .unwrap()
            .marks
            .insert(symbol.to_string(), price);
    }

    /// Bars served by `seed_bars`, oldest first.
    pub fn set_history(&self, symbol: &str, bars: Vec<Bar>) {
        self.state
            .lock()
            .unwrap()
            .history
            .insert(symbol.to_string(), bars);
    }

    pub fn fail_account(&self, error: Option<GatewayError>) {
        self.state.lock().unwrap().fail_account = error;
    }

    pub fn fail_positions(&self, error: Option<GatewayError>) {
        self.state.lock().unwrap().fail_positions = error;
    }

    pub fn fail_orders(&self, error: Option<GatewayError>) {
        self.state.lock().unwrap().fail_orders = error;
    }

    pub fn fail_closes(&self, error: Option<GatewayError>) {
        self.state.lock().unwrap().fail_closes = error;
    }

    /// Every order submitted so far, in submission order.
    pub fn orders(&self) -> Vec<OrderIntent> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn account_reads(&self) -> usize {
        self.state.lock().unwrap().account_reads
    }

    pub fn positions(&self) -> Vec<Position> {
        self.state
            .lock()
            .unwrap()
            .positions
            .iter()
            .map(|(symbol, &quantity)| Position::new(symbol.clone(), quantity))
            .collect()
    }
}

impl BrokerGateway for InMemoryGateway {
    fn account(&self) -> Result<Account, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.account_reads += 1;
        if let Some(err) = &state.fail_account {
            return Err(err.clone());
        }
        if let Some(next) = state.buying_power_script.pop_front() {
            state.account.buying_power = next;
        }
        Ok(state.account)
    }

    fn position(&self, symbol: &str) -> Result<Option<Position>, GatewayError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.fail_positions {
            return Err(err.clone());
        }
        Ok(state
            .positions
            .get(symbol)
            .map(|&quantity| Position::new(symbol, quantity)))
    }

    fn submit_market_order(&self, intent: &OrderIntent) -> Result<OrderAck, GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.fail_orders {
            return Err(err.clone());
        }

        let signed = match intent.side {
            OrderSide::Buy => intent.quantity as i64,
            OrderSide::Sell => -(intent.quantity as i64),
        };
        let held = state.positions.get(&intent.symbol).copied().unwrap_or(0);
        match held + signed {
            0 => {
                state.positions.remove(&intent.symbol);
            }
            q => {
                state.positions.insert(intent.symbol.clone(), q);
            }
        }
        let mark = state.marks.get(&intent.symbol).copied();
        if let Some(mark) = mark {
            state.account.buying_power -= signed as f64 * mark;
        }

        state.orders.push(intent.clone());
        Ok(OrderAck {
            order_id: format!("mem-{}", state.orders.len()),
            status: "filled".into(),
        })
    }

    fn close_position(&self, symbol: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.fail_closes {
            return Err(err.clone());
        }
        state.positions.remove(symbol);
        Ok(())
    }

    fn close_all_positions(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.fail_closes {
            return Err(err.clone());
        }
        state.positions.clear();
        Ok(())
    }

    fn seed_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, GatewayError> {
        let state = self.state.lock().unwrap();
        let bars = state.history.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeInForce;

    fn buy(symbol: &str, qty: u64) -> OrderIntent {
        OrderIntent::market(symbol, OrderSide::Buy, qty, TimeInForce::Day).unwrap()
    }

    #[test]
    fn fills_update_positions_and_cash() {
        let gw = InMemoryGateway::new(1000.0);
        gw.set_mark("SOXL", 30.0);
        gw.submit_market_order(&buy("SOXL", 10)).unwrap();

        assert_eq!(gw.position("SOXL").unwrap(), Some(Position::new("SOXL", 10)));
        assert_eq!(gw.account().unwrap().buying_power, 700.0);

        let sell = OrderIntent::market("SOXL", OrderSide::Sell, 10, TimeInForce::Day).unwrap();
        gw.submit_market_order(&sell).unwrap();
        assert_eq!(gw.position("SOXL").unwrap(), None);
        assert_eq!(gw.account().unwrap().buying_power, 1000.0);
    }

    #[test]
    fn script_then_sticks() {
        let gw = InMemoryGateway::new(0.0);
        gw.script_buying_power([1.0, 2.0]);
        assert_eq!(gw.account().unwrap().buying_power, 1.0);
        assert_eq!(gw.account().unwrap().buying_power, 2.0);
        assert_eq!(gw.account().unwrap().buying_power, 2.0);
        assert_eq!(gw.account_reads(), 3);
    }

    #[test]
    fn seed_bars_returns_latest_window() {
        let gw = InMemoryGateway::new(0.0);
        let bars = crate::indicators::make_bars(&[1.0, 2.0, 3.0, 4.0]);
        gw.set_history("TEST", bars);
        let seed = gw.seed_bars("TEST", 2).unwrap();
        assert_eq!(seed.len(), 2);
        assert_eq!(seed[0].close, 3.0);
        assert!(gw.seed_bars("NONE", 10).unwrap().is_empty());
    }

    #[test]
    fn injected_failures_surface() {
        let gw = InMemoryGateway::new(0.0);
        gw.fail_orders(Some(GatewayError::Rejected("halted".into())));
        assert!(gw.submit_market_order(&buy("SOXL", 1)).is_err());
        assert!(gw.orders().is_empty());
    }
}
