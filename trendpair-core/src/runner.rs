//! Per-pair dispatch: one worker thread per engine, fed by a symbol router.
//!
//! Each `StrategyEngine` is moved into its own named thread and only ever
//! sees bars through that thread's channel, so bars for a pair are processed
//! strictly one at a time while separate pairs run independently. A failed bar
//! is logged and the worker keeps draining its queue.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::domain::Bar;
use crate::gateway::BrokerGateway;
use crate::strategy::{BarOutcome, StrategyEngine};

/// Tally of what a worker did before its queue closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub bars: usize,
    pub entries: usize,
    pub flattens: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl WorkerReport {
    fn record(&mut self, outcome: &BarOutcome) {
        match outcome {
            BarOutcome::Entered { .. } => self.entries += 1,
            BarOutcome::Flattened(_) => self.flattens += 1,
            BarOutcome::Skipped { .. } => self.skipped += 1,
            BarOutcome::Ignored | BarOutcome::WarmingUp | BarOutcome::Hold => {}
        }
    }
}

/// Move `engine` onto a dedicated thread that processes bars from `rx` until
/// every sender is dropped.
pub fn spawn_pair_worker<G>(
    engine: StrategyEngine<G>,
    rx: Receiver<Bar>,
) -> io::Result<JoinHandle<WorkerReport>>
where
    G: BrokerGateway + ?Sized + 'static,
{
    let name = format!("pair-{}", engine.config().label());
    thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(engine, rx))
}

fn worker_loop<G>(mut engine: StrategyEngine<G>, rx: Receiver<Bar>) -> WorkerReport
where
    G: BrokerGateway + ?Sized,
{
    let pair = engine.config().label();
    let mut report = WorkerReport::default();
    info!(%pair, "pair worker started");

    for bar in rx {
        report.bars += 1;
        match engine.on_bar(&bar) {
            Ok(outcome) => {
                debug!(%pair, symbol = %bar.symbol, ?outcome, "bar processed");
                report.record(&outcome);
            }
            Err(e) => {
                report.errors += 1;
                error!(
                    %pair,
                    symbol = %bar.symbol,
                    timestamp = %bar.timestamp,
                    error = %e,
                    "bar processing failed"
                );
            }
        }
    }

    info!(
        %pair,
        bars = report.bars,
        entries = report.entries,
        errors = report.errors,
        "pair worker stopped"
    );
    report
}

struct Route {
    pair: String,
    symbols: Vec<String>,
    tx: Sender<Bar>,
    open: bool,
}

/// Fans bars out to every pair subscribed to the bar's symbol.
#[derive(Default)]
pub struct BarRouter {
    routes: Vec<Route>,
}

impl BarRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, pair: impl Into<String>, symbols: Vec<String>, tx: Sender<Bar>) {
        self.routes.push(Route {
            pair: pair.into(),
            symbols,
            tx,
            open: true,
        });
    }

    /// Union of all subscribed symbols, in first-subscribed order.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for symbol in self.routes.iter().flat_map(|r| &r.symbols) {
            if !out.contains(symbol) {
                out.push(symbol.clone());
            }
        }
        out
    }

    /// Send `bar` to each subscribed pair. Returns how many received it.
    ///
    /// A pair whose worker has gone away is closed and skipped from then on.
    pub fn dispatch(&mut self, bar: &Bar) -> usize {
        let mut delivered = 0;
        for route in self.routes.iter_mut().filter(|r| r.open) {
            if !route.symbols.contains(&bar.symbol) {
                continue;
            }
            if route.tx.send(bar.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(pair = %route.pair, "pair worker gone; dropping its route");
                route.open = false;
            }
        }
        delivered
    }

    /// Dispatch everything from `rx` until the feed hangs up. Dropping the
    /// router afterwards closes every worker queue.
    pub fn run(mut self, rx: Receiver<Bar>) -> usize {
        let mut routed = 0;
        for bar in rx {
            if self.dispatch(&bar) == 0 {
                debug!(symbol = %bar.symbol, "bar matched no pair");
            }
            routed += 1;
        }
        routed
    }
}

/// Spawn a worker per engine and a router subscribed to each engine's stream
/// symbols.
pub fn spawn_pairs<G>(
    engines: Vec<StrategyEngine<G>>,
) -> io::Result<(BarRouter, Vec<JoinHandle<WorkerReport>>)>
where
    G: BrokerGateway + ?Sized + 'static,
{
    let mut router = BarRouter::new();
    let mut handles = Vec::with_capacity(engines.len());
    for engine in engines {
        let (tx, rx) = mpsc::channel();
        router.subscribe(engine.config().label(), engine.config().stream_symbols(), tx);
        handles.push(spawn_pair_worker(engine, rx)?);
    }
    Ok((router, handles))
}
