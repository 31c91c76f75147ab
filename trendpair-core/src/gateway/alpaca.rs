//! Alpaca REST gateway and polling bar feed.
//!
//! Trading calls go to the paper or live trading host, bar history and latest
//! bars to the market data host. Reads are retried with exponential backoff on
//! network failures, 429 and 5xx; order submission and closes are sent once.
//!
//! Alpaca encodes money and quantities as decimal strings, so account and
//! position payloads are decoded through small wire structs and parsed here.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{BarFeed, BrokerGateway, GatewayError};
use crate::config::{Credentials, StreamConfig};
use crate::domain::{Account, Bar, OrderAck, OrderIntent, Position};

pub const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
pub const MARKET_DATA_URL: &str = "https://data.alpaca.markets";

const KEY_ID_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_KEY_HEADER: &str = "APCA-API-SECRET-KEY";

/// Largest page the bars endpoint serves.
const MAX_BARS_PER_REQUEST: usize = 10_000;

/// How far back seed requests reach, so weekends and holidays still fill the
/// window.
const SEED_LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
struct AccountResponse {
    buying_power: String,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    symbol: String,
    qty: String,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    symbol: &'a str,
    qty: String,
    side: &'a str,
    #[serde(rename = "type")]
    order_type: &'a str,
    time_in_force: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct BarRecord {
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: u64,
}

impl BarRecord {
    fn into_bar(self, symbol: &str) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    /// `null` when the window holds no bars.
    bars: Option<Vec<BarRecord>>,
}

#[derive(Debug, Deserialize)]
struct LatestBarResponse {
    bar: BarRecord,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Status and body of one HTTP exchange.
struct Reply {
    status: u16,
    body: String,
}

impl Reply {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_retryable(&self) -> bool {
        self.status == 429 || self.status >= 500
    }

    fn into_api_error(self, endpoint: &str) -> GatewayError {
        GatewayError::Api {
            endpoint: endpoint.to_string(),
            status: self.status,
            message: error_message(&self.body),
        }
    }
}

/// Alpaca trading + market data client.
#[derive(Clone)]
pub struct AlpacaGateway {
    client: reqwest::blocking::Client,
    key_id: String,
    secret_key: String,
    trading_url: String,
    data_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl std::fmt::Debug for AlpacaGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaGateway")
            .field("key_id", &self.key_id)
            .field("trading_url", &self.trading_url)
            .field("data_url", &self.data_url)
            .finish_non_exhaustive()
    }
}

impl AlpacaGateway {
    pub fn new(credentials: &Credentials) -> Result<Self, GatewayError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("trendpair/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;

        let trading_url = if credentials.paper {
            PAPER_TRADING_URL
        } else {
            LIVE_TRADING_URL
        };

        Ok(Self {
            client,
            key_id: credentials.key_id.clone(),
            secret_key: credentials.secret_key.clone(),
            trading_url: trading_url.to_string(),
            data_url: MARKET_DATA_URL.to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Point the client at different hosts (e.g. a local mock).
    pub fn with_base_urls(mut self, trading_url: &str, data_url: &str) -> Self {
        self.trading_url = trading_url.trim_end_matches('/').to_string();
        self.data_url = data_url.trim_end_matches('/').to_string();
        self
    }

    pub fn trading_url(&self) -> &str {
        &self.trading_url
    }

    /// Most recent minute bar for `symbol`.
    pub fn latest_bar(&self, symbol: &str) -> Result<Bar, GatewayError> {
        let endpoint = "GET /v2/stocks/{symbol}/bars/latest";
        let url = format!("{}/v2/stocks/{symbol}/bars/latest", self.data_url);
        let body = self.read(endpoint, &url)?;
        parse_latest_bar(symbol, &body)
    }

    /// Minute bars for `symbol` from `since` (inclusive) onward, oldest first.
    pub fn bars_since(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<Bar>, GatewayError> {
        let endpoint = "GET /v2/stocks/{symbol}/bars";
        let start = since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let url = format!(
            "{}/v2/stocks/{symbol}/bars?timeframe=1Min&start={start}&limit={}&sort=asc",
            self.data_url, MAX_BARS_PER_REQUEST,
        );
        let body = self.read(endpoint, &url)?;
        parse_bars(symbol, &body)
    }

    fn send(
        &self,
        endpoint: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<Reply, GatewayError> {
        let resp = request
            .header(KEY_ID_HEADER, &self.key_id)
            .header(SECRET_KEY_HEADER, &self.secret_key)
            .send()
            .map_err(|e| GatewayError::Network(format!("{endpoint}: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| GatewayError::Network(format!("{endpoint}: {e}")))?;
        Ok(Reply { status, body })
    }

    /// GET with retry. Returns the raw reply so callers can special-case
    /// statuses such as 404.
    fn get_with_retry(&self, endpoint: &str, url: &str) -> Result<Reply, GatewayError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                debug!(%endpoint, attempt, ?delay, "retrying request");
                std::thread::sleep(delay);
            }

            match self.send(endpoint, self.client.get(url)) {
                Ok(reply) if reply.is_retryable() => {
                    last_error = Some(reply.into_api_error(endpoint));
                }
                Ok(reply) => return Ok(reply),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| GatewayError::Network(format!("{endpoint}: max retries exceeded"))))
    }

    /// GET that must succeed; returns the body.
    fn read(&self, endpoint: &str, url: &str) -> Result<String, GatewayError> {
        let reply = self.get_with_retry(endpoint, url)?;
        if !reply.is_success() {
            return Err(reply.into_api_error(endpoint));
        }
        Ok(reply.body)
    }

    fn delete(&self, endpoint: &str, url: &str) -> Result<Reply, GatewayError> {
        self.send(endpoint, self.client.delete(url))
    }
}

impl BrokerGateway for AlpacaGateway {
    fn account(&self) -> Result<Account, GatewayError> {
        let endpoint = "GET /v2/account";
        let body = self.read(endpoint, &format!("{}/v2/account", self.trading_url))?;
        parse_account(&body)
    }

    fn position(&self, symbol: &str) -> Result<Option<Position>, GatewayError> {
        let endpoint = "GET /v2/positions/{symbol}";
        let url = format!("{}/v2/positions/{symbol}", self.trading_url);
        let reply = self.get_with_retry(endpoint, &url)?;
        let status = reply.status;
        match status {
            404 => Ok(None),
            _ if reply.is_success() => parse_position(&reply.body),
            _ => Err(reply.into_api_error(endpoint)),
        }
    }

    fn submit_market_order(&self, intent: &OrderIntent) -> Result<OrderAck, GatewayError> {
        let endpoint = "POST /v2/orders";
        let request = OrderRequest {
            symbol: &intent.symbol,
            qty: intent.quantity.to_string(),
            side: intent.side.as_str(),
            order_type: "market",
            time_in_force: intent.time_in_force.as_str(),
        };
        let url = format!("{}/v2/orders", self.trading_url);
        let reply = self.send(endpoint, self.client.post(url).json(&request))?;

        let status = reply.status;
        match status {
            403 | 422 => Err(GatewayError::Rejected(format!(
                "{intent}: {}",
                error_message(&reply.body)
            ))),
            _ if reply.is_success() => {
                let order: OrderResponse = decode(endpoint, &reply.body)?;
                Ok(OrderAck {
                    order_id: order.id,
                    status: order.status,
                })
            }
            _ => Err(reply.into_api_error(endpoint)),
        }
    }

    fn close_position(&self, symbol: &str) -> Result<(), GatewayError> {
        let endpoint = "DELETE /v2/positions/{symbol}";
        let reply = self.delete(endpoint, &format!("{}/v2/positions/{symbol}", self.trading_url))?;
        let status = reply.status;
        match status {
            // Already flat.
            404 => Ok(()),
            _ if reply.is_success() => {
                info!(%symbol, "close position requested");
                Ok(())
            }
            _ => Err(reply.into_api_error(endpoint)),
        }
    }

    fn close_all_positions(&self) -> Result<(), GatewayError> {
        let endpoint = "DELETE /v2/positions";
        let url = format!("{}/v2/positions?cancel_orders=true", self.trading_url);
        let reply = self.delete(endpoint, &url)?;
        if !reply.is_success() {
            return Err(reply.into_api_error(endpoint));
        }
        info!("close all positions requested");
        Ok(())
    }

    fn seed_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, GatewayError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let endpoint = "GET /v2/stocks/{symbol}/bars";
        let start = (Utc::now() - chrono::Duration::days(SEED_LOOKBACK_DAYS))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let url = format!(
            "{}/v2/stocks/{symbol}/bars?timeframe=1Min&start={start}&limit={}&sort=desc",
            self.data_url,
            limit.min(MAX_BARS_PER_REQUEST),
        );
        let body = self.read(endpoint, &url)?;
        parse_bars(symbol, &body)
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, GatewayError> {
    serde_json::from_str(body).map_err(|e| GatewayError::Decode {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

fn parse_decimal(endpoint: &str, field: &str, raw: &str) -> Result<f64, GatewayError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| GatewayError::Decode {
            endpoint: endpoint.to_string(),
            reason: format!("{field} is not a number: {raw:?}"),
        })
}

fn parse_account(body: &str) -> Result<Account, GatewayError> {
    let endpoint = "GET /v2/account";
    let raw: AccountResponse = decode(endpoint, body)?;
    Ok(Account {
        buying_power: parse_decimal(endpoint, "buying_power", &raw.buying_power)?,
    })
}

/// Fractional quantities are truncated toward zero; a zero result is flat.
fn parse_position(body: &str) -> Result<Option<Position>, GatewayError> {
    let endpoint = "GET /v2/positions/{symbol}";
    let raw: PositionResponse = decode(endpoint, body)?;
    let quantity = parse_decimal(endpoint, "qty", &raw.qty)?.trunc() as i64;
    Ok((quantity != 0).then(|| Position::new(raw.symbol, quantity)))
}

/// Returns bars oldest first, whichever `sort` the request asked for.
fn parse_bars(symbol: &str, body: &str) -> Result<Vec<Bar>, GatewayError> {
    let raw: BarsResponse = decode("GET /v2/stocks/{symbol}/bars", body)?;
    let mut bars: Vec<Bar> = raw
        .bars
        .unwrap_or_default()
        .into_iter()
        .map(|record| record.into_bar(symbol))
        .collect();
    bars.sort_by_key(|bar| bar.timestamp);
    Ok(bars)
}

fn parse_latest_bar(symbol: &str, body: &str) -> Result<Bar, GatewayError> {
    let raw: LatestBarResponse = decode("GET /v2/stocks/{symbol}/bars/latest", body)?;
    Ok(raw.bar.into_bar(symbol))
}

/// Alpaca error bodies look like `{"code": 40310000, "message": "..."}`.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => err.message,
        Err(_) if body.trim().is_empty() => "<empty body>".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Live bars by polling the bars endpoint.
///
/// The first round takes the latest bar per symbol. Later rounds ask for every
/// bar since the last one forwarded, so a late round or a failed poll never
/// leaves a hole in the series. Rounds start on a fixed `poll_interval`
/// cadence; a failed round waits `reconnect_delay` instead.
pub struct AlpacaPollingFeed {
    gateway: AlpacaGateway,
    poll_interval: Duration,
    reconnect_delay: Duration,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl AlpacaPollingFeed {
    pub fn new(gateway: AlpacaGateway, stream: &StreamConfig) -> Self {
        Self {
            gateway,
            poll_interval: stream.poll_interval,
            reconnect_delay: stream.reconnect_delay,
            last_seen: HashMap::new(),
        }
    }

    /// Record `bar` and return it if it is new for its symbol.
    fn accept(&mut self, bar: Bar) -> Option<Bar> {
        match self.last_seen.get(&bar.symbol) {
            Some(seen) if *seen >= bar.timestamp => None,
            _ => {
                self.last_seen.insert(bar.symbol.clone(), bar.timestamp);
                Some(bar)
            }
        }
    }

    fn poll(&self, symbol: &str) -> Result<Vec<Bar>, GatewayError> {
        match self.last_seen.get(symbol) {
            Some(since) => self.gateway.bars_since(symbol, *since),
            None => self.gateway.latest_bar(symbol).map(|bar| vec![bar]),
        }
    }

    /// Send every bar newer than the last one forwarded, in order.
    fn forward(&mut self, bars: Vec<Bar>, sink: &Sender<Bar>) -> Result<usize, GatewayError> {
        let mut sent = 0;
        for bar in bars {
            if let Some(bar) = self.accept(bar) {
                sink.send(bar)
                    .map_err(|_| GatewayError::FeedClosed("bar receiver dropped".into()))?;
                sent += 1;
            }
        }
        Ok(sent)
    }
}

/// Sleep up to `duration`, waking early once `shutdown` is raised.
fn pause(duration: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_millis(250);
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        std::thread::sleep(step.min(remaining));
    }
}

impl BarFeed for AlpacaPollingFeed {
    fn run(
        &mut self,
        symbols: &[String],
        sink: Sender<Bar>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), GatewayError> {
        info!(?symbols, interval = ?self.poll_interval, "polling bar feed started");

        let mut next_round = Instant::now();
        while !shutdown.load(Ordering::Relaxed) {
            let mut failed = false;
            for symbol in symbols {
                match self.poll(symbol) {
                    Ok(bars) => {
                        let sent = self.forward(bars, &sink)?;
                        if sent > 1 {
                            debug!(%symbol, sent, "caught up on missed bars");
                        }
                    }
                    Err(e) => {
                        warn!(%symbol, error = %e, retry_in = ?self.reconnect_delay, "bar poll failed");
                        failed = true;
                    }
                }
            }

            let now = Instant::now();
            next_round = if failed {
                now + self.reconnect_delay
            } else {
                (next_round + self.poll_interval).max(now)
            };
            pause(next_round.saturating_duration_since(now), &shutdown);
        }

        info!("polling bar feed stopped");
        Ok(())
    }
}
