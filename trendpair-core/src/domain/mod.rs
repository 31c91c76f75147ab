//! Domain types for trendpair

pub mod bar;
pub mod order;
pub mod position;

pub use bar::{Bar, BarError};
pub use order::{OrderAck, OrderIntent, OrderSide, ParseTimeInForceError, TimeInForce};
pub use position::{Account, Position};
