//! Scheduled Binance Trading Bot CLI
//!
//! Threshold / accumulation trading on a single spot pair.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dca_bot::exchange::{AccountSource, MarketData};
use dca_bot::strategies;
use dca_bot::{
    BinanceClient, CommandHandler, Config, ControlHandle, PriceSample, Scheduler, SchedulerSettings, StateStore,
    TelegramBot, TickJournal, TradeExecutor, TradingPair,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dca-bot")]
#[command(about = "Scheduled Binance trading bot (threshold / DCA) with Telegram control")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop
    Run {
        /// Seconds between ticks (overrides INTERVAL_SECONDS)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Stop after this many evaluated ticks (overrides MAX_ITERATIONS)
        #[arg(short = 'n', long)]
        iterations: Option<u64>,

        /// Start paused; resume from Telegram
        #[arg(long)]
        paused: bool,
    },

    /// Show account balances and the last recorded trade
    Status,

    /// Fetch one price sample and print the decision without trading
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run {
            interval,
            iterations,
            paused,
        } => run_bot(config, interval, iterations, paused).await?,
        Commands::Status => show_status(&config).await?,
        Commands::Check => check_market(&config).await?,
    }

    Ok(())
}

async fn run_bot(mut config: Config, interval: Option<u64>, iterations: Option<u64>, paused: bool) -> Result<()> {
    if let Some(secs) = interval {
        config.interval_seconds = secs;
    }
    if iterations.is_some() {
        config.max_iterations = iterations;
    }
    config.start_paused |= paused;
    config.validate()?;

    println!("\n{}", "=".repeat(70));
    println!("  {} BOT on {}", config.strategy, config.pair);
    println!(
        "  Interval: {}s | Cooldown: {}s | Budget: {}",
        config.interval_seconds,
        config.cooldown_seconds,
        config
            .max_iterations
            .map(|n| format!("{} ticks", n))
            .unwrap_or_else(|| "unlimited".to_string())
    );
    println!("  Paper Trading: {}", if config.paper_trading { "YES" } else { "NO - LIVE MODE" });
    if config.telegram.is_some() {
        println!("  Telegram: ENABLED");
    }
    println!("{}\n", "=".repeat(70));

    let client = Arc::new(BinanceClient::new(&config)?);
    if config.is_live() {
        client
            .verify_credentials()
            .await
            .context("Binance rejected the configured API credentials")?;
        info!("Binance credentials verified");
    } else if let Err(e) = client.ping().await {
        warn!("Binance ping failed: {}", e);
    }

    let state = StateStore::open(&config.state_path, config.cooldown())?;
    let journal = TickJournal::new(&config.journal_path);
    let control = ControlHandle::new(config.start_paused);

    let executor = TradeExecutor::new(client.clone(), config.pair.clone(), config.sizing, config.paper_trading);
    let strategy = strategies::from_config(config.strategy, &config.threshold);
    let mut scheduler = Scheduler::new(
        client.clone(),
        strategy,
        executor,
        state,
        control.clone(),
        SchedulerSettings::from_config(&config),
    )
    .with_journal(journal.clone());

    // Ctrl+C only raises the flag; the scheduler stops between ticks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    scheduler = scheduler.with_shutdown(shutdown_rx.clone());
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = shutdown_tx.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, finishing current tick before shutdown");
            signal_tx.send_replace(true);
        }
    });

    // Telegram is optional; without it the bot runs headless
    let mut telegram = None;
    if let Some(tg_config) = &config.telegram {
        let bot = TelegramBot::new(tg_config)?.with_journal(journal.clone());
        let (notify_tx, notify_rx) = mpsc::channel(64);
        scheduler = scheduler.with_notifier(notify_tx);

        let handler = Arc::new(CommandHandler::new(
            client.clone(),
            config.pair.clone(),
            control.clone(),
            journal.clone(),
            config.state_path.clone(),
            config.cooldown(),
        ));
        let outbound = bot.spawn_outbound(notify_rx);
        let polling = bot.spawn_polling(handler, shutdown_rx);

        let summary = account_summary(client.as_ref(), &config.pair).await;
        if let Err(e) = bot.send_message(&format!("Bot started. {}", summary)).await {
            warn!("Failed to send start message: {:#}", e);
        }
        telegram = Some((bot, outbound, polling));
    }

    if let Err(e) = journal.append("Bot started").await {
        warn!("Failed to write journal: {:#}", e);
    }
    println!("Starting trading loop (Ctrl+C to stop)...\n");

    let result = scheduler.run().await;

    // Dropping the scheduler closes the notification channel
    drop(scheduler);
    signal_task.abort();
    shutdown_tx.send_replace(true);

    let stop_reason = match &result {
        Ok(summary) => format!("Bot stopped after {}.", summary),
        Err(e) => format!("Bot stopped on error: {}.", e),
    };
    if let Err(e) = journal.append(&stop_reason).await {
        warn!("Failed to write journal: {:#}", e);
    }

    if let Some((bot, outbound, polling)) = telegram {
        if tokio::time::timeout(Duration::from_secs(10), outbound).await.is_err() {
            warn!("Timed out flushing Telegram notifications");
        }
        let summary = account_summary(client.as_ref(), &config.pair).await;
        if let Err(e) = bot.send_message(&format!("{} {}", stop_reason, summary)).await {
            warn!("Failed to send stop message: {:#}", e);
        }
        polling.abort();
    }

    match result {
        Ok(_) => {
            info!("{}", stop_reason);
            Ok(())
        }
        Err(e) => {
            error!("{}", stop_reason);
            Err(e.into())
        }
    }
}

async fn show_status(config: &Config) -> Result<()> {
    let client = BinanceClient::new(config)?;

    println!("\n{}", "=".repeat(70));
    println!("  BOT STATUS - {}", config.pair);
    println!("{}\n", "=".repeat(70));

    println!("Account:");
    println!("  {}", account_summary(&client, &config.pair).await);

    let record = StateStore::read_record(&config.state_path)?;
    println!("\nLast trade:");
    match record.last_action_at {
        Some(at) => {
            println!("  {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
            let next = at + config.cooldown();
            if next > chrono::Utc::now() {
                println!("  Next trade allowed: {}", next.format("%Y-%m-%d %H:%M:%S UTC"));
            } else {
                println!("  Cooldown elapsed");
            }
        }
        None => println!("  none recorded ({})", config.state_path.display()),
    }

    Ok(())
}

async fn check_market(config: &Config) -> Result<()> {
    let client = BinanceClient::new(config)?;
    let strategy = strategies::from_config(config.strategy, &config.threshold);

    let current = client.current_price(&config.pair).await?;
    let reference = client
        .reference_price(&config.pair, config.threshold.lookback_hours)
        .await?;
    let sample = PriceSample::new(current, reference, chrono::Utc::now());
    let decision = strategy.decide(&sample)?;

    println!("\n{}", "=".repeat(70));
    println!("  MARKET CHECK - {} ({} strategy)", config.pair, strategy.name());
    println!("{}\n", "=".repeat(70));
    println!("  Current price:   {}", current);
    println!(
        "  Reference price: {} ({:?}, {}h)",
        reference.round_dp(2),
        config.reference_mode,
        config.threshold.lookback_hours
    );
    if let Some(dev) = sample.deviation_percent() {
        println!("  Deviation:       {:+.2}% (threshold {}%)", dev, config.threshold.threshold_percent);
    }
    println!("  Decision:        {}", decision);

    let record = StateStore::read_record(&config.state_path)?;
    if let Some(at) = record.last_action_at {
        let next = at + config.cooldown();
        if next > chrono::Utc::now() {
            println!("  Cooldown active until {}", next.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }

    Ok(())
}

async fn account_summary<A: AccountSource>(account: &A, pair: &TradingPair) -> String {
    match account.account_snapshot(pair).await {
        Ok(snapshot) => snapshot.to_string(),
        Err(e) => format!("Account unavailable: {}", e),
    }
}
