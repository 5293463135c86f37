//! Configuration management for the trading bot

use crate::error::{BotError, BotResult};
use crate::exchange::binance::{ReferenceMode, BINANCE_BASE_URL};
use crate::types::TradingPair;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for interval and cooldown settings (ten years)
const MAX_PERIOD_SECONDS: u64 = 10 * 365 * 24 * 3600;

/// Bot configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Binance API key (optional, only for live trading)
    pub api_key: Option<String>,
    pub api_secret: Option<String>,

    /// REST endpoint, overridable for testnet
    pub binance_base_url: String,

    /// Traded pair
    pub pair: TradingPair,

    /// Which decision engine to run
    pub strategy: StrategyKind,

    /// Threshold strategy settings
    pub threshold: ThresholdConfig,

    /// How the reference price is computed
    pub reference_mode: ReferenceMode,

    /// Order sizing
    pub sizing: SizingMode,

    /// Seconds between scheduler ticks
    pub interval_seconds: u64,

    /// Minimum seconds between two trades
    pub cooldown_seconds: u64,

    /// Stop after this many evaluated ticks (None = run forever)
    pub max_iterations: Option<u64>,

    /// Start in the paused state
    pub start_paused: bool,

    /// Last-action record file
    pub state_path: PathBuf,

    /// Tick journal file (backs the `log` command)
    pub journal_path: PathBuf,

    /// Whether running in paper trading mode
    pub paper_trading: bool,

    /// Telegram control channel (optional)
    pub telegram: Option<TelegramConfig>,
}

/// Decision engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Buy dips / sell rallies beyond a percentage threshold
    Threshold,
    /// Buy on every tick (dollar-cost averaging)
    Accumulation,
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "threshold" | "volatility" => Ok(StrategyKind::Threshold),
            "accumulation" | "dca" => Ok(StrategyKind::Accumulation),
            other => anyhow::bail!("Unknown STRATEGY '{}' (expected threshold or accumulation)", other),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Threshold => write!(f, "THRESHOLD"),
            StrategyKind::Accumulation => write!(f, "ACCUMULATION"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    /// Trigger distance from the reference price, in percent (default: 3)
    pub threshold_percent: Decimal,
    /// Allow sell decisions; false = buy the dip only (default: true)
    pub sell_enabled: bool,
    /// Reference price window in hours (default: 12)
    pub lookback_hours: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            threshold_percent: Decimal::from(3),
            sell_enabled: true,
            lookback_hours: 12,
        }
    }
}

/// How much quote currency a single trade moves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizingMode {
    /// Fixed notional in quote currency
    Fixed(Decimal),
    /// Fraction of the free balance (quote for buys, base for sells)
    BalanceRatio(Decimal),
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = var("BINANCE_API_KEY");
        let api_secret = var("BINANCE_API_SECRET");

        let binance_base_url = var("BINANCE_BASE_URL").unwrap_or_else(|| BINANCE_BASE_URL.to_string());

        let base_asset = var("BASE_ASSET").unwrap_or_else(|| "BTC".to_string());
        let quote_asset = var("QUOTE_ASSET").unwrap_or_else(|| "EUR".to_string());

        let strategy = parse_or(var("STRATEGY"), "STRATEGY", StrategyKind::Threshold)?;

        let threshold = ThresholdConfig {
            threshold_percent: parse_or(var("THRESHOLD_PERCENT"), "THRESHOLD_PERCENT", Decimal::from(3))?,
            sell_enabled: parse_bool(var("SELL_ENABLED"), "SELL_ENABLED", true)?,
            lookback_hours: parse_or(var("LOOKBACK_HOURS"), "LOOKBACK_HOURS", 12)?,
        };

        let reference_mode = parse_or(var("REFERENCE_MODE"), "REFERENCE_MODE", ReferenceMode::Vwap)?;

        let sizing = match var("SIZING_MODE").map(|v| v.to_lowercase()).as_deref() {
            None | Some("fixed") => {
                SizingMode::Fixed(parse_or(var("TRADE_AMOUNT"), "TRADE_AMOUNT", Decimal::from(5))?)
            }
            Some("ratio") | Some("balance_ratio") => {
                SizingMode::BalanceRatio(parse_or(var("BUDGET_RATIO"), "BUDGET_RATIO", Decimal::new(10, 2))?)
            }
            Some(other) => anyhow::bail!("Unknown SIZING_MODE '{}' (expected fixed or ratio)", other),
        };

        let interval_seconds = parse_or(var("INTERVAL_SECONDS"), "INTERVAL_SECONDS", 3600)?;
        let cooldown_seconds = parse_or(var("COOLDOWN_SECONDS"), "COOLDOWN_SECONDS", 86_400)?;

        let max_iterations = var("MAX_ITERATIONS")
            .map(|v| v.parse::<u64>().with_context(|| format!("Invalid MAX_ITERATIONS '{}'", v)))
            .transpose()?;

        let start_paused = parse_bool(var("START_PAUSED"), "START_PAUSED", false)?;

        let state_path = PathBuf::from(var("STATE_PATH").unwrap_or_else(|| "last_action.json".to_string()));
        let journal_path = PathBuf::from(var("JOURNAL_PATH").unwrap_or_else(|| "bot.log".to_string()));

        // Default to paper trading for safety
        let paper_trading = parse_bool(var("PAPER_TRADING"), "PAPER_TRADING", true)?;

        let telegram = match (var("TELEGRAM_TOKEN"), var("TELEGRAM_CHAT_ID")) {
            (Some(token), Some(chat_id)) => Some(TelegramConfig { token, chat_id }),
            _ => None,
        };

        let config = Self {
            api_key,
            api_secret,
            binance_base_url,
            pair: TradingPair::new(&base_asset, &quote_asset),
            strategy,
            threshold,
            reference_mode,
            sizing,
            interval_seconds,
            cooldown_seconds,
            max_iterations,
            start_paused,
            state_path,
            journal_path,
            paper_trading,
            telegram,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the bot cannot run with
    pub fn validate(&self) -> BotResult<()> {
        if !self.paper_trading && (self.api_key.is_none() || self.api_secret.is_none()) {
            return Err(BotError::InvalidInput(
                "BINANCE_API_KEY and BINANCE_API_SECRET required for live trading".to_string(),
            ));
        }
        if self.interval_seconds == 0 {
            return Err(BotError::InvalidInput("INTERVAL_SECONDS must be positive".to_string()));
        }
        if self.interval_seconds > MAX_PERIOD_SECONDS {
            return Err(BotError::InvalidInput(format!(
                "INTERVAL_SECONDS must be at most {}",
                MAX_PERIOD_SECONDS
            )));
        }
        if self.cooldown_seconds > MAX_PERIOD_SECONDS {
            return Err(BotError::InvalidInput(format!(
                "COOLDOWN_SECONDS must be at most {}",
                MAX_PERIOD_SECONDS
            )));
        }
        if self.threshold.threshold_percent <= Decimal::ZERO {
            return Err(BotError::InvalidInput("THRESHOLD_PERCENT must be positive".to_string()));
        }
        if self.threshold.lookback_hours == 0 {
            return Err(BotError::InvalidInput("LOOKBACK_HOURS must be positive".to_string()));
        }
        match self.sizing {
            SizingMode::Fixed(amount) if amount <= Decimal::ZERO => {
                return Err(BotError::InvalidInput("TRADE_AMOUNT must be positive".to_string()));
            }
            SizingMode::BalanceRatio(ratio) if ratio <= Decimal::ZERO || ratio > Decimal::ONE => {
                return Err(BotError::InvalidInput("BUDGET_RATIO must be in (0, 1]".to_string()));
            }
            // Balances can only be read with credentials, even when paper trading
            SizingMode::BalanceRatio(_) if self.api_key.is_none() || self.api_secret.is_none() => {
                return Err(BotError::InvalidInput(
                    "SIZING_MODE=ratio needs BINANCE_API_KEY and BINANCE_API_SECRET to read balances".to_string(),
                ));
            }
            _ => {}
        }
        if self.max_iterations == Some(0) {
            return Err(BotError::InvalidInput("MAX_ITERATIONS must be positive when set".to_string()));
        }
        Ok(())
    }

    /// Check if live trading is enabled
    pub fn is_live(&self) -> bool {
        !self.paper_trading && self.api_key.is_some()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_seconds as i64)
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", key, v, e)),
    }
}

fn parse_bool(value: Option<String>, key: &str, default: bool) -> Result<bool> {
    match value.map(|v| v.to_lowercase()).as_deref() {
        None => Ok(default),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(other) => anyhow::bail!("Invalid {} '{}' (expected true or false)", key, other),
    }
}
