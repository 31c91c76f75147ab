//! Broker capability interface and its implementations.
//!
//! The engine only ever talks to `BrokerGateway`. Concrete gateways:
//! - `alpaca`: Alpaca REST trading + market data, and a polling bar feed
//! - `memory`: deterministic in-process account for tests and benches

pub mod alpaca;
pub mod memory;

use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::{Account, Bar, OrderAck, OrderIntent, Position};

pub use alpaca::{AlpacaGateway, AlpacaPollingFeed};
pub use memory::InMemoryGateway;

/// Failures reported by a broker gateway.
///
/// These are displayable as-is in logs; the engine never inspects variants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("{endpoint} returned HTTP {status}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("failed to decode {endpoint} response: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("bar feed stopped: {0}")]
    FeedClosed(String),
}

/// Account, position and order operations the engine depends on.
///
/// All calls are blocking from the engine's point of view.
pub trait BrokerGateway: Send + Sync {
    /// Fresh account snapshot. Never cached by callers.
    fn account(&self) -> Result<Account, GatewayError>;

    /// Open position for `symbol`, `None` when flat.
    fn position(&self, symbol: &str) -> Result<Option<Position>, GatewayError>;

    fn submit_market_order(&self, intent: &OrderIntent) -> Result<OrderAck, GatewayError>;

    /// Close one symbol. Callers treat failures as best-effort.
    fn close_position(&self, symbol: &str) -> Result<(), GatewayError>;

    /// Close everything in the account. Callers treat failures as best-effort.
    fn close_all_positions(&self) -> Result<(), GatewayError>;

    /// Most recent `limit` bars for `symbol`, oldest first.
    fn seed_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, GatewayError>;
}

/// Source of live bars.
///
/// `run` blocks, sending one message per received bar in arrival order per
/// symbol, until `shutdown` is raised or the sink hangs up.
pub trait BarFeed {
    fn run(
        &mut self,
        symbols: &[String],
        sink: Sender<Bar>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), GatewayError>;
}
