//! Serializable strategy configuration.
//!
//! Every field has a default, so an empty TOML file yields the stock
//! SOXL/SOXS pair. Durations are written as seconds and the cutoff as a
//! wall-clock time string.
//!
//! ```toml
//! [[pairs]]
//! bullish_symbol = "SOXL"
//! bearish_symbol = "SOXS"
//!
//! [pairs.risk]
//! close_all_at = "15:55"
//! funds_wait_timeout_secs = 30
//!
//! [pairs.allocation]
//! cash_fraction = 0.9
//! ```

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::domain::TimeInForce;

/// Errors raised while loading or validating configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config for pair {pair}: {reason}")]
    Invalid { pair: String, reason: String },

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
}

/// Top-level configuration: one entry per traded pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub pairs: Vec<StrategyConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pairs: vec![StrategyConfig::default()],
        }
    }
}

impl AppConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pairs.is_empty() {
            return Err(ConfigError::Invalid {
                pair: "-".into(),
                reason: "at least one pair must be configured".into(),
            });
        }
        self.pairs.iter().try_for_each(StrategyConfig::validate)
    }
}

/// Everything one crossover engine needs for a bullish/bearish pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyConfig {
    pub bullish_symbol: String,
    pub bearish_symbol: String,
    pub stream: StreamConfig,
    pub risk: RiskConfig,
    pub indicators: IndicatorConfig,
    pub allocation: AllocationConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            bullish_symbol: "SOXL".into(),
            bearish_symbol: "SOXS".into(),
            stream: StreamConfig::default(),
            risk: RiskConfig::default(),
            indicators: IndicatorConfig::default(),
            allocation: AllocationConfig::default(),
        }
    }
}

impl StrategyConfig {
    /// Short label used in logs and errors, e.g. `SOXL/SOXS`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.bullish_symbol, self.bearish_symbol)
    }

    /// Symbols subscribed on the bar stream. Falls back to the bullish symbol.
    pub fn stream_symbols(&self) -> Vec<String> {
        if self.stream.symbols.is_empty() {
            vec![self.bullish_symbol.clone()]
        } else {
            self.stream.symbols.clone()
        }
    }

    /// Bullish, bearish and stream symbols, first occurrence wins.
    pub fn all_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let candidates = [&self.bullish_symbol, &self.bearish_symbol]
            .into_iter()
            .chain(self.stream.symbols.iter());
        for symbol in candidates {
            if !out.contains(symbol) {
                out.push(symbol.clone());
            }
        }
        out
    }

    /// Deterministic BLAKE3 hash of the full configuration.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("StrategyConfig must serialize");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            pair: self.label(),
            reason,
        };

        if self.bullish_symbol.trim().is_empty() || self.bearish_symbol.trim().is_empty() {
            return Err(invalid("symbols must not be empty".into()));
        }
        if self.bullish_symbol == self.bearish_symbol {
            return Err(invalid("bullish and bearish symbols must differ".into()));
        }

        let ind = &self.indicators;
        for (name, period) in [
            ("ema_period", ind.ema_period),
            ("sma_period", ind.sma_period),
            ("atr_period", ind.atr_period),
        ] {
            if period == 0 {
                return Err(invalid(format!("{name} must be >= 1")));
            }
        }

        let fraction = self.allocation.cash_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(invalid(format!(
                "cash_fraction must be in (0, 1], got {fraction}"
            )));
        }
        self.allocation
            .time_in_force()
            .map_err(|e| invalid(e.to_string()))?;

        if self.risk.funds_poll_interval.is_zero() {
            return Err(invalid("funds_poll_interval_secs must be positive".into()));
        }
        self.risk.exchange_tz().map_err(|e| invalid(e.to_string()))?;

        if self.stream.poll_interval.is_zero() {
            return Err(invalid("stream poll_interval_secs must be positive".into()));
        }

        Ok(())
    }
}

/// Market data stream settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Symbols to subscribe to. Empty means the bullish symbol only.
    pub symbols: Vec<String>,
    /// Pause after a failed poll before trying again.
    #[serde(rename = "reconnect_delay_secs", with = "secs")]
    pub reconnect_delay: Duration,
    /// How often the REST feed asks for the latest bar.
    #[serde(rename = "poll_interval_secs", with = "secs")]
    pub poll_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            reconnect_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Which positions `flatten` closes at the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlattenScope {
    /// Every open position in the account.
    Account,
    /// Only this pair's bullish and bearish symbols.
    Pair,
}

/// Risk management parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RiskConfig {
    /// Exchange-local time after which positions are flattened. `None` disables.
    #[serde(with = "cutoff")]
    pub close_all_at: Option<NaiveTime>,
    #[serde(rename = "funds_wait_timeout_secs", with = "secs")]
    pub funds_wait_timeout: Duration,
    #[serde(rename = "funds_poll_interval_secs", with = "secs")]
    pub funds_poll_interval: Duration,
    /// IANA zone the cutoff is read in. Bar timestamps are converted to it,
    /// daylight saving included.
    pub exchange_timezone: String,
    pub flatten_scope: FlattenScope,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            close_all_at: NaiveTime::from_hms_opt(15, 55, 0),
            funds_wait_timeout: Duration::from_secs(30),
            funds_poll_interval: Duration::from_secs(2),
            exchange_timezone: "America/New_York".into(),
            flatten_scope: FlattenScope::Account,
        }
    }
}

impl RiskConfig {
    pub fn exchange_tz(&self) -> Result<Tz, ConfigError> {
        self.exchange_timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Invalid {
                pair: "-".into(),
                reason: format!("exchange_timezone '{}': {e}", self.exchange_timezone),
            })
    }
}

/// Indicator lookback windows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IndicatorConfig {
    pub ema_period: usize,
    pub sma_period: usize,
    pub atr_period: usize,
    /// Historical bars fetched to warm indicators up before going live.
    pub seed_bars: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_period: 10,
            sma_period: 50,
            atr_period: 14,
            seed_bars: 100,
        }
    }
}

/// Order sizing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AllocationConfig {
    /// Share of buying power committed to one entry.
    pub cash_fraction: f64,
    pub order_time_in_force: String,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            cash_fraction: 0.9,
            order_time_in_force: "day".into(),
        }
    }
}

impl AllocationConfig {
    pub fn time_in_force(&self) -> Result<TimeInForce, crate::domain::ParseTimeInForceError> {
        self.order_time_in_force.parse()
    }
}

/// Alpaca API credentials, read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub key_id: String,
    pub secret_key: String,
    pub paper: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("secret_key", &"<redacted>")
            .field("paper", &self.paper)
            .finish()
    }
}

impl Credentials {
    pub const KEY_ID_VAR: &'static str = "ALPACA_K";
    pub const SECRET_KEY_VAR: &'static str = "ALPACA_SK";
    pub const PAPER_VAR: &'static str = "ALPACA_PAPER";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Paper trading unless the flag is "false".
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };
        let key_id = required(Self::KEY_ID_VAR)?;
        let secret_key = required(Self::SECRET_KEY_VAR)?;
        let paper = lookup(Self::PAPER_VAR)
            .map(|v| !v.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(true);
        Ok(Self {
            key_id,
            secret_key,
            paper,
        })
    }
}

/// `Duration` as fractional seconds.
mod secs {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| de::Error::custom(format!("invalid duration: {secs} seconds")))
    }
}

/// Optional wall-clock cutoff: `"HH:MM"`, `"HH:MM:SS"` or `"off"`.
mod cutoff {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_str(&t.format("%H:%M:%S").to_string()),
            None => s.serialize_str("off"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw = String::deserialize(d)?;
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("off") || raw.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid cutoff time '{raw}'")))
    }
}
