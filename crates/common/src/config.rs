use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result, Timeframe};

/// Process-wide configuration loaded from environment variables at startup.
/// Per-symbol trading parameters live in the symbols file, see [`SymbolFileConfig`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the TOML file listing the traded symbols.
    pub symbols_config_path: String,
    /// SQLite URL for the trade journal. Journal is log-only when unset.
    pub database_url: Option<String>,
    /// Base URL of the market data REST endpoint.
    pub market_data_url: String,
    pub paper_slippage_bps: f64,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            symbols_config_path: optional_env("SYMBOLS_CONFIG_PATH")
                .unwrap_or_else(|| "config/symbols.toml".to_string()),
            database_url: optional_env("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            market_data_url: optional_env("MARKET_DATA_URL")
                .unwrap_or_else(|| "https://api.binance.com".to_string()),
            paper_slippage_bps: optional_env("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Which candle's body decides the trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionRule {
    /// BUY when the breakout candle itself closed above its open.
    #[default]
    LastCandle,
    /// BUY when the candle before the breakout closed above its open.
    PreviousCandle,
}

/// How the history window's ranges are reduced to the breakout baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeBaseline {
    #[default]
    Mean,
    Max,
}

/// Trading parameters for a single symbol.
///
/// Example `config/symbols.toml` entry:
/// ```toml
/// [[symbol]]
/// symbol = "BTCUSDT"
/// volume = 0.5
/// timeframe = "M1"
/// interval = 1
/// breakout_multiplier = 1.2
/// stop_loss_distance = 15.0
/// take_profit_distance = 15.0
/// profit_target = 5.0
/// trailing_trigger = 10.0
/// trailing_adjustment = 2.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    /// Order size in lots.
    pub volume: f64,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    /// Scheduler cadence in minutes. Cycles start on multiples of this since the epoch.
    #[serde(default = "default_interval", alias = "interval")]
    pub interval_minutes: u32,
    /// Number of history candles (W) compared against the newest one.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Sensitivity multiplier k: breakout when `last_range >= k * baseline`.
    #[serde(default = "default_breakout_multiplier")]
    pub breakout_multiplier: f64,
    /// Fraction of the breakout range retraced from the candle's extreme.
    #[serde(default = "default_retracement_fraction")]
    pub retracement_fraction: f64,
    #[serde(default)]
    pub direction_rule: DirectionRule,
    #[serde(default)]
    pub range_baseline: RangeBaseline,
    /// Price distance of the initial stop from the trigger price.
    pub stop_loss_distance: f64,
    /// Price distance of the initial target from the trigger price.
    pub take_profit_distance: f64,
    /// Unrealized profit (account currency) at which the position is closed.
    pub profit_target: f64,
    /// Unrealized profit (account currency) from which the stop is trailed.
    pub trailing_trigger: f64,
    /// Price step applied to the stop each time trailing fires.
    pub trailing_adjustment: f64,
    /// Account currency per price unit per lot.
    #[serde(default = "default_contract_size")]
    pub contract_size: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up on an untriggered signal after this long. Defaults to one interval.
    #[serde(default)]
    pub max_watch_secs: Option<u64>,
}

fn default_timeframe() -> Timeframe {
    Timeframe::M1
}
fn default_interval() -> u32 {
    1
}
fn default_history_window() -> usize {
    5
}
fn default_breakout_multiplier() -> f64 {
    1.2
}
fn default_retracement_fraction() -> f64 {
    0.4
}
fn default_contract_size() -> f64 {
    100.0
}
fn default_poll_interval_ms() -> u64 {
    1_000
}

impl SymbolConfig {
    /// A config with every defaulted field at its default.
    pub fn new(symbol: impl Into<String>, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            volume,
            timeframe: default_timeframe(),
            interval_minutes: default_interval(),
            history_window: default_history_window(),
            breakout_multiplier: default_breakout_multiplier(),
            retracement_fraction: default_retracement_fraction(),
            direction_rule: DirectionRule::default(),
            range_baseline: RangeBaseline::default(),
            stop_loss_distance: 0.0,
            take_profit_distance: 0.0,
            profit_target: f64::INFINITY,
            trailing_trigger: f64::INFINITY,
            trailing_adjustment: 0.0,
            contract_size: default_contract_size(),
            poll_interval_ms: default_poll_interval_ms(),
            max_watch_secs: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_watch(&self) -> Duration {
        self.max_watch_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.interval())
    }

    /// Reject parameter combinations the detector or position manager cannot act on.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(format!("{}: {msg}", self.symbol)));

        if self.symbol.trim().is_empty() {
            return Err(Error::Config("symbol name must not be empty".into()));
        }
        if !(self.volume > 0.0) {
            return fail(format!("volume must be > 0, got {}", self.volume));
        }
        if self.interval_minutes == 0 {
            return fail("interval must be at least 1 minute".into());
        }
        if self.history_window == 0 {
            return fail("history_window must be at least 1".into());
        }
        if !(self.breakout_multiplier > 0.0) {
            return fail(format!(
                "breakout_multiplier must be > 0, got {}",
                self.breakout_multiplier
            ));
        }
        if !(self.retracement_fraction > 0.0 && self.retracement_fraction < 1.0) {
            return fail(format!(
                "retracement_fraction must be in (0, 1), got {}",
                self.retracement_fraction
            ));
        }
        if !(self.stop_loss_distance >= 0.0 && self.take_profit_distance >= 0.0) {
            return fail("stop_loss_distance and take_profit_distance must be >= 0".into());
        }
        if !(self.trailing_adjustment >= 0.0 && self.trailing_adjustment.is_finite()) {
            return fail("trailing_adjustment must be a finite value >= 0".into());
        }
        // +inf disables the profit target or trailing respectively.
        if !(self.profit_target > 0.0) {
            return fail(format!("profit_target must be > 0, got {}", self.profit_target));
        }
        if !(self.trailing_trigger >= 0.0) {
            return fail(format!("trailing_trigger must be >= 0, got {}", self.trailing_trigger));
        }
        if !(self.contract_size > 0.0) {
            return fail(format!("contract_size must be > 0, got {}", self.contract_size));
        }
        if self.poll_interval_ms == 0 {
            return fail("poll_interval_ms must be > 0".into());
        }
        if self.trailing_adjustment > 0.0 && self.trailing_trigger.is_finite() && !self.trailing_reachable() {
            warn!(
                symbol = %self.symbol,
                trailing_trigger = self.trailing_trigger,
                profit_target = self.profit_target,
                "trailing_trigger is not below profit_target, positions close before the stop ever trails"
            );
        }
        Ok(())
    }

    /// Whether profit can pass the trailing trigger without first reaching
    /// the profit target.
    pub fn trailing_reachable(&self) -> bool {
        self.trailing_trigger.is_finite() && self.trailing_trigger < self.profit_target
    }
}

/// Top-level symbols file (TOML): one `[[symbol]]` table per traded symbol.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SymbolFileConfig {
    #[serde(rename = "symbol")]
    pub symbols: Vec<SymbolConfig>,
}

impl SymbolFileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read symbols config at '{}': {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: SymbolFileConfig = toml::from_str(content)?;

        let mut seen = HashSet::new();
        for cfg in &file.symbols {
            cfg.validate()?;
            if !seen.insert(cfg.symbol.as_str()) {
                return Err(Error::Config(format!("symbol '{}' configured twice", cfg.symbol)));
            }
        }
        Ok(file)
    }
}
