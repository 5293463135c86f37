//! Scheduled Binance Trading Bot Library
//!
//! A periodic trading loop for a single spot pair implementing two strategies:
//!
//! 1. **Threshold**: Buy when the price falls a set percentage below the
//!    reference price (VWAP or the open `LOOKBACK_HOURS` ago), sell when it
//!    rises the same distance above.
//!
//! 2. **Accumulation**: Dollar-cost averaging, a buy on every tick.
//!
//! A cooldown record on disk keeps restarts from trading twice inside the
//! window. Operators pause, resume and inspect the bot over Telegram.

pub mod commands;
pub mod config;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod journal;
pub mod scheduler;
pub mod state;
pub mod strategies;
pub mod telegram;
pub mod types;

pub use commands::{Command, CommandHandler};
pub use config::Config;
pub use error::{BotError, BotResult};
pub use exchange::{BinanceClient, ExchangeError};
pub use executor::{ExecutionResult, TradeExecutor};
pub use journal::TickJournal;
pub use scheduler::{ControlHandle, LoopState, RunSummary, Scheduler, SchedulerSettings, TickOutcome};
pub use state::StateStore;
pub use strategies::Strategy;
pub use telegram::TelegramBot;
pub use types::{OrderSide, PriceSample, TradeDecision, TradingPair};
