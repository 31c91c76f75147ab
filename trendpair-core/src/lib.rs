//! Trendpair Core — crossover decision engine for an inverse symbol pair.
//!
//! This crate contains everything between a live bar and a broker order:
//! - Domain types (bars, orders, positions, account)
//! - Streaming indicators (EMA, SMA, ATR) behind `IndicatorState`
//! - Risk gate: cutoff flattening, hedge unwind, funds wait
//! - Per-bar strategy state machine
//! - Broker gateway trait with Alpaca and in-memory implementations
//! - Per-pair worker threads and the symbol router

pub mod config;
pub mod domain;
pub mod gateway;
pub mod indicators;
pub mod risk;
pub mod runner;
pub mod strategy;
