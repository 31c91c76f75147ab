//! Risk checks that gate every entry.

pub mod gate;
pub mod poll;

pub use gate::{CloseOutcome, FlattenOutcome, RiskGate};
pub use poll::{poll_until, Clock, ManualClock, MonotonicClock};
