//! Trendpair CLI — run the crossover pair engine, validate configs.
//!
//! Commands:
//! - `run` — seed indicators, then trade live bars from the Alpaca polling feed
//! - `check-config` — print the resolved config and a fingerprint per pair

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use trendpair_core::config::{AppConfig, Credentials, StreamConfig};
use trendpair_core::gateway::{AlpacaGateway, AlpacaPollingFeed, BarFeed};
use trendpair_core::runner::spawn_pairs;
use trendpair_core::strategy::StrategyEngine;

#[derive(Parser)]
#[command(
    name = "trendpair",
    about = "Trendpair CLI — EMA/SMA crossover trading for inverse ETF pairs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trade live bars. Credentials come from ALPACA_K, ALPACA_SK and ALPACA_PAPER.
    Run {
        /// Path to a TOML config file. Defaults to a single SOXL/SOXS pair.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Maximum log level: error, warn, info, debug, trace.
        #[arg(long, default_value = "info")]
        log_level: Level,
    },
    /// Validate a config file and print it fully resolved.
    CheckConfig {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, log_level } => run_live(config.as_deref(), log_level),
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

fn init_tracing(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

/// One feed serves every pair, so it polls as often as the most demanding one.
fn feed_settings(config: &AppConfig) -> StreamConfig {
    let mut stream = StreamConfig::default();
    if let Some(poll) = config.pairs.iter().map(|p| p.stream.poll_interval).min() {
        stream.poll_interval = poll;
    }
    if let Some(delay) = config.pairs.iter().map(|p| p.stream.reconnect_delay).min() {
        stream.reconnect_delay = delay;
    }
    stream
}

/// Raise `shutdown` on Ctrl-C. The feed then stops, the router hangs up and
/// each pair worker drains its queue and reports.
fn watch_ctrl_c(shutdown: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("interrupt received; stopping bar feed");
                        shutdown.store(true, Ordering::Relaxed);
                    }
                    Err(e) => warn!(error = %e, "ctrl-c handler unavailable"),
                }
            })
        })
        .context("failed to spawn ctrl-c thread")?;
    Ok(())
}

fn run_live(config_path: Option<&Path>, log_level: Level) -> Result<()> {
    init_tracing(log_level)?;

    let config = load_config(config_path)?;
    let credentials = Credentials::from_env()?;
    info!(paper = credentials.paper, pairs = config.pairs.len(), "starting trendpair");

    let gateway = Arc::new(AlpacaGateway::new(&credentials)?);

    let mut engines = Vec::with_capacity(config.pairs.len());
    for pair in &config.pairs {
        let mut engine = StrategyEngine::new(gateway.clone(), pair.clone())?;
        engine
            .seed_from_gateway()
            .with_context(|| format!("failed to seed {}", pair.label()))?;
        engines.push(engine);
    }

    let (router, workers) = spawn_pairs(engines).context("failed to spawn pair workers")?;
    let symbols = router.symbols();
    let mut feed = AlpacaPollingFeed::new((*gateway).clone(), &feed_settings(&config));

    let shutdown = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(shutdown.clone())?;
    let (bar_tx, bar_rx) = mpsc::channel();
    let feed_thread = thread::Builder::new()
        .name("bar-feed".into())
        .spawn(move || feed.run(&symbols, bar_tx, shutdown))
        .context("failed to spawn bar feed thread")?;

    let routed = router.run(bar_rx);
    info!(routed, "bar feed ended");

    for worker in workers {
        match worker.join() {
            Ok(report) => info!(?report, "pair worker finished"),
            Err(_) => warn!("pair worker panicked"),
        }
    }

    feed_thread
        .join()
        .map_err(|_| anyhow!("bar feed thread panicked"))?
        .context("bar feed failed")?;
    Ok(())
}

fn run_check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!();
    for pair in &config.pairs {
        println!(
            "{:<16} {}  symbols={}",
            pair.label(),
            pair.fingerprint(),
            pair.all_symbols().join(",")
        );
    }
    Ok(())
}
