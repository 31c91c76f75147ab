//! End-to-end decision scenarios against the in-memory gateway.
//!
//! Default indicator periods (EMA 10 / SMA 50), default cutoff 15:55 New York time,
//! and a manual clock so the funds wait never really sleeps.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use trendpair_core::config::StrategyConfig;
use trendpair_core::domain::{Bar, OrderSide, Position};
use trendpair_core::gateway::{BrokerGateway, GatewayError, InMemoryGateway};
use trendpair_core::risk::ManualClock;
use trendpair_core::strategy::{
    BarOutcome, Direction, EngineState, SkipReason, StrategyEngine, StrategyError,
};

// ── Helpers ──────────────────────────────────────────────────────────

/// 2024-03-04 10:00 exchange time (EST, UTC-5).
fn session_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap()
}

fn bar_at(close: f64, timestamp: DateTime<Utc>) -> Bar {
    Bar {
        symbol: "SOXL".into(),
        timestamp,
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 10_000,
    }
}

/// `n` flat bars at `close`, one per minute, ending a minute before the session
/// open.
fn flat_history(n: usize, close: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let offset = ChronoDuration::minutes(n as i64 - i as i64);
            bar_at(close, session_open() - offset)
        })
        .collect()
}

fn seeded_engine(
    gw: Arc<InMemoryGateway>,
) -> (StrategyEngine<InMemoryGateway>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let mut engine = StrategyEngine::new(gw, StrategyConfig::default())
        .unwrap()
        .with_clock(clock.clone());
    assert_eq!(engine.seed(&flat_history(100, 30.0)), 100);
    (engine, clock)
}

// ── Entry ────────────────────────────────────────────────────────────

#[test]
fn crossover_unwinds_hedge_then_buys_once() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    gw.set_position(Position::new("SOXS", 5));
    let (mut engine, _) = seeded_engine(gw.clone());

    let outcome = engine.on_bar(&bar_at(33.0, session_open())).unwrap();
    assert!(matches!(
        outcome,
        BarOutcome::Entered {
            direction: Direction::Bullish,
            hedge: Some(_),
            ..
        }
    ));
    assert_eq!(engine.state(), EngineState::Entering(Direction::Bullish));

    let orders = gw.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].symbol, "SOXS");
    assert_eq!(orders[0].side, OrderSide::Sell);
    assert_eq!(orders[0].quantity, 5);
    assert_eq!(orders[1].symbol, "SOXL");
    assert_eq!(orders[1].side, OrderSide::Buy);
    assert_eq!(orders[1].quantity, 27);

    // Paired-exclusion invariant: only the target is held afterwards.
    assert_eq!(gw.position("SOXS").unwrap(), None);
    assert_eq!(gw.position("SOXL").unwrap(), Some(Position::new("SOXL", 27)));
}

#[test]
fn repeated_bias_does_not_stack_entries() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    let (mut engine, _) = seeded_engine(gw.clone());

    engine.on_bar(&bar_at(33.0, session_open())).unwrap();
    let second = engine
        .on_bar(&bar_at(33.0, session_open() + ChronoDuration::minutes(1)))
        .unwrap();

    assert!(matches!(
        second,
        BarOutcome::Skipped {
            reason: SkipReason::AlreadyHolding,
            ..
        }
    ));
    assert_eq!(gw.orders().len(), 1);
}

#[test]
fn bias_flip_rotates_into_bearish() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    let (mut engine, _) = seeded_engine(gw.clone());

    engine.on_bar(&bar_at(33.0, session_open())).unwrap();
    // A sharp drop pulls the EMA under the SMA.
    let outcome = engine
        .on_bar(&bar_at(20.0, session_open() + ChronoDuration::minutes(1)))
        .unwrap();
    assert!(matches!(
        outcome,
        BarOutcome::Entered {
            direction: Direction::Bearish,
            hedge: Some(_),
            ..
        }
    ));

    let orders = gw.orders();
    assert_eq!(orders.len(), 3);
    assert_eq!((orders[1].symbol.as_str(), orders[1].side), ("SOXL", OrderSide::Sell));
    assert_eq!((orders[2].symbol.as_str(), orders[2].side), ("SOXS", OrderSide::Buy));
    assert_eq!(gw.position("SOXL").unwrap(), None);
}

#[test]
fn funds_wait_waits_for_settlement() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    // Sizing read, then two short polls, then settled cash.
    gw.script_buying_power([1000.0, 100.0, 100.0, 950.0]);
    let (mut engine, clock) = seeded_engine(gw.clone());

    let outcome = engine.on_bar(&bar_at(33.0, session_open())).unwrap();
    assert!(matches!(outcome, BarOutcome::Entered { .. }));
    assert_eq!(clock.elapsed(), Duration::from_secs(4));
    assert_eq!(gw.account_reads(), 4);
}

#[test]
fn funds_timeout_submits_nothing() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    gw.script_buying_power([1000.0, 100.0]);
    let (mut engine, clock) = seeded_engine(gw.clone());

    let outcome = engine.on_bar(&bar_at(33.0, session_open())).unwrap();
    assert!(matches!(
        outcome,
        BarOutcome::Skipped {
            reason: SkipReason::FundsTimeout,
            ..
        }
    ));
    assert_eq!(clock.elapsed(), Duration::from_secs(30));
    assert!(gw.orders().is_empty());
}

// ── Flatten ──────────────────────────────────────────────────────────

#[test]
fn cutoff_flattens_instead_of_entering() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    gw.set_position(Position::new("SOXS", 5));
    let (mut engine, _) = seeded_engine(gw.clone());

    // 20:55 UTC is 15:55 exchange time.
    let cutoff = Utc.with_ymd_and_hms(2024, 3, 4, 20, 55, 0).unwrap();
    let outcome = engine.on_bar(&bar_at(33.0, cutoff)).unwrap();

    match outcome {
        BarOutcome::Flattened(flatten) => assert!(flatten.is_clean()),
        other => panic!("expected flatten, got {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Flattening);
    assert!(gw.orders().is_empty());
    assert!(gw.positions().is_empty());
}

#[test]
fn failed_flatten_is_not_an_error() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    gw.fail_closes(Some(GatewayError::Network("connection reset".into())));
    let (mut engine, _) = seeded_engine(gw.clone());

    let cutoff = Utc.with_ymd_and_hms(2024, 3, 4, 21, 0, 0).unwrap();
    let outcome = engine.on_bar(&bar_at(33.0, cutoff)).unwrap();
    match outcome {
        BarOutcome::Flattened(flatten) => assert!(!flatten.is_clean()),
        other => panic!("expected flatten, got {other:?}"),
    }
}

// ── Warm-up and errors ───────────────────────────────────────────────

#[test]
fn warm_up_touches_no_gateway() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    let mut engine = StrategyEngine::new(gw.clone(), StrategyConfig::default()).unwrap();
    engine.seed(&flat_history(20, 30.0));

    let outcome = engine.on_bar(&bar_at(40.0, session_open())).unwrap();
    assert_eq!(outcome, BarOutcome::WarmingUp);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(gw.account_reads(), 0);
    assert!(gw.orders().is_empty());
}

#[test]
fn hedge_read_failure_propagates_without_orders() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    gw.fail_positions(Some(GatewayError::Api {
        endpoint: "GET /v2/positions/{symbol}".into(),
        status: 500,
        message: "internal".into(),
    }));
    let (mut engine, _) = seeded_engine(gw.clone());

    let err = engine.on_bar(&bar_at(33.0, session_open())).unwrap_err();
    assert!(matches!(err, StrategyError::Gateway(GatewayError::Api { status: 500, .. })));
    assert!(gw.orders().is_empty());
}

#[test]
fn seed_from_gateway_uses_bullish_history() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    gw.set_history("SOXL", flat_history(150, 30.0));
    let mut engine = StrategyEngine::new(gw, StrategyConfig::default()).unwrap();

    assert_eq!(engine.seed_from_gateway().unwrap(), 100);
    assert_eq!(engine.indicators().bars_seen(), 100);
    assert_eq!(engine.snapshot().averages(), Some((30.0, 30.0)));
    assert!(engine.snapshot().volatility.is_some());
}

#[test]
fn short_seed_history_leaves_engine_warming_up() {
    let gw = Arc::new(InMemoryGateway::new(1000.0));
    gw.set_history("SOXL", flat_history(20, 30.0));
    let mut engine = StrategyEngine::new(gw, StrategyConfig::default()).unwrap();

    assert_eq!(engine.seed_from_gateway().unwrap(), 20);
    assert!(!engine.indicators().is_warm());
    assert_eq!(engine.snapshot().averages(), None);
}
