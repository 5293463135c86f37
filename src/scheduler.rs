//! Scheduler loop: the periodic decide-and-trade cycle
//!
//! One tick = read the control snapshot, fetch a price sample, ask the
//! strategy for a decision, gate it through the cooldown store, execute,
//! record. Pause/resume arrive through [`ControlHandle`] and are only
//! observed at the start of a tick, never in the middle of one.

use crate::config::Config;
use crate::error::BotError;
use crate::exchange::{AccountSource, MarketData, OrderGateway};
use crate::executor::{ExecutionResult, TradeExecutor};
use crate::journal::TickJournal;
use crate::state::StateStore;
use crate::strategies::Strategy;
use crate::types::{PriceSample, TradeDecision, TradingPair};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Wall-clock source, injectable for tests
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Process-wide control flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BotControlState {
    pub paused: bool,
}

/// Shared handle to the control state; cheap to clone
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: Arc<watch::Sender<BotControlState>>,
}

impl ControlHandle {
    pub fn new(paused: bool) -> Self {
        let (tx, _rx) = watch::channel(BotControlState { paused });
        Self { tx: Arc::new(tx) }
    }

    /// Returns false if already paused
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|state| !std::mem::replace(&mut state.paused, true))
    }

    /// Returns false if already running
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|state| std::mem::replace(&mut state.paused, false))
    }

    pub fn snapshot(&self) -> BotControlState {
        *self.tx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.snapshot().paused
    }

    pub fn subscribe(&self) -> watch::Receiver<BotControlState> {
        self.tx.subscribe()
    }
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Loop parameters taken from configuration
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub pair: TradingPair,
    pub interval: Duration,
    pub lookback_hours: u32,
    pub max_iterations: Option<u64>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pair: config.pair.clone(),
            interval: config.interval(),
            lookback_hours: config.threshold.lookback_hours,
            max_iterations: config.max_iterations,
        }
    }
}

/// Why a non-Hold decision did not turn into an order
#[derive(Debug, Clone)]
pub enum SkipReason {
    Cooldown { until: DateTime<Utc> },
    Executor(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Cooldown { until } => {
                write!(f, "cooldown active until {}", until.format("%Y-%m-%d %H:%M:%S UTC"))
            }
            SkipReason::Executor(reason) => write!(f, "{}", reason),
        }
    }
}

/// What one evaluated tick did
#[derive(Debug)]
pub enum TickOutcome {
    Held {
        sample: PriceSample,
    },
    Executed {
        decision: TradeDecision,
        sample: PriceSample,
        result: ExecutionResult,
        /// Set when the trade went through but the cooldown record could not be saved
        persistence_error: Option<BotError>,
    },
    Skipped {
        decision: TradeDecision,
        sample: PriceSample,
        reason: SkipReason,
    },
    Failed {
        decision: Option<TradeDecision>,
        error: BotError,
    },
}

impl TickOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TickOutcome::Failed { error, .. } if error.is_fatal())
    }
}

fn describe_sample(f: &mut fmt::Formatter<'_>, sample: &PriceSample) -> fmt::Result {
    match sample.deviation_percent() {
        Some(dev) => write!(
            f,
            "price {} (ref {}, {:+.2}%)",
            sample.current_price.round_dp(2),
            sample.reference_price.round_dp(2),
            dev
        ),
        None => write!(f, "price {}", sample.current_price.round_dp(2)),
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Held { sample } => {
                write!(f, "HOLD | ")?;
                describe_sample(f, sample)
            }
            TickOutcome::Executed { decision, sample, result, .. } => {
                write!(f, "{} | ", decision)?;
                describe_sample(f, sample)?;
                if let ExecutionResult::Executed {
                    order_id,
                    filled_quantity,
                    quote_amount,
                    paper,
                    ..
                } = result
                {
                    write!(
                        f,
                        " | executed {} for {} (order {}){}",
                        filled_quantity.normalize(),
                        quote_amount.round_dp(2),
                        order_id,
                        if *paper { " [PAPER]" } else { "" }
                    )?;
                }
                Ok(())
            }
            TickOutcome::Skipped { decision, sample, reason } => {
                write!(f, "{} | ", decision)?;
                describe_sample(f, sample)?;
                write!(f, " | skipped: {}", reason)
            }
            TickOutcome::Failed { decision, error } => match decision {
                Some(d) => write!(f, "{} | failed: {}", d, error),
                None => write!(f, "failed: {}", error),
            },
        }
    }
}

/// Counters returned when the loop ends cleanly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Evaluated (non-paused) ticks
    pub ticks: u64,
    pub paused_ticks: u64,
    pub trades: u64,
    pub holds: u64,
    pub skipped: u64,
    pub failures: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::Held { .. } => self.holds += 1,
            TickOutcome::Executed { .. } => self.trades += 1,
            TickOutcome::Skipped { .. } => self.skipped += 1,
            TickOutcome::Failed { .. } => self.failures += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ticks ({} trades, {} holds, {} skipped, {} failed), {} paused",
            self.ticks, self.trades, self.holds, self.skipped, self.failures, self.paused_ticks
        )
    }
}

/// The periodic trading loop
pub struct Scheduler<M, G> {
    market: M,
    strategy: Box<dyn Strategy>,
    executor: TradeExecutor<G>,
    state: StateStore,
    control: ControlHandle,
    settings: SchedulerSettings,
    clock: Box<dyn Clock>,
    journal: Option<TickJournal>,
    notifier: Option<mpsc::Sender<String>>,
    shutdown: Option<watch::Receiver<bool>>,
    loop_state: LoopState,
}

impl<M, G> Scheduler<M, G>
where
    M: MarketData,
    G: OrderGateway + AccountSource,
{
    pub fn new(
        market: M,
        strategy: Box<dyn Strategy>,
        executor: TradeExecutor<G>,
        state: StateStore,
        control: ControlHandle,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            market,
            strategy,
            executor,
            state,
            control,
            settings,
            clock: Box::new(SystemClock),
            journal: None,
            notifier: None,
            shutdown: None,
            loop_state: LoopState::Idle,
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_journal(mut self, journal: TickJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Outbound channel for operator notifications (e.g. Telegram)
    pub fn with_notifier(mut self, notifier: mpsc::Sender<String>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Stop between ticks once this flag turns true; a tick in progress always completes
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    /// Run until the iteration budget is spent, shutdown is requested, or a
    /// fatal error occurs.
    ///
    /// Paused ticks are skipped without touching the market and do not
    /// count against the budget.
    pub async fn run(&mut self) -> Result<RunSummary, BotError> {
        self.loop_state = if self.control.is_paused() {
            LoopState::Paused
        } else {
            LoopState::Running
        };

        info!(
            "[Scheduler] Starting {} strategy on {} every {:?} (budget: {}, paper: {})",
            self.strategy.name(),
            self.settings.pair,
            self.settings.interval,
            self.settings
                .max_iterations
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unlimited".to_string()),
            self.executor.is_paper()
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = RunSummary::default();
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    self.loop_state = LoopState::Stopped;
                    info!("[Scheduler] Shutdown requested: {}", summary);
                    return Ok(summary);
                }
                _ = ticker.tick() => {}
            }

            if self.control.snapshot().paused {
                if self.loop_state != LoopState::Paused {
                    info!("[Scheduler] Paused");
                }
                self.loop_state = LoopState::Paused;
                summary.paused_ticks += 1;
                debug!("[Scheduler] Tick skipped (paused)");
                continue;
            }
            if self.loop_state == LoopState::Paused {
                info!("[Scheduler] Resumed");
            }
            self.loop_state = LoopState::Running;

            summary.ticks += 1;
            let outcome = self.tick().await;
            summary.record(&outcome);
            self.report(summary.ticks, &outcome).await;

            if let TickOutcome::Failed { error, .. } = outcome {
                if error.is_fatal() {
                    self.loop_state = LoopState::Stopped;
                    error!("[Scheduler] Fatal error on tick {}, stopping: {}", summary.ticks, error);
                    return Err(error);
                }
            }

            if let Some(max) = self.settings.max_iterations {
                if summary.ticks >= max {
                    self.loop_state = LoopState::Stopped;
                    info!("[Scheduler] Iteration budget reached: {}", summary);
                    return Ok(summary);
                }
            }
        }
    }

    /// Evaluate one tick. Not cancel-safe: an order may be in flight.
    pub async fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now();

        let sample = match self.fetch_sample(now).await {
            Ok(sample) => sample,
            Err(error) => return TickOutcome::Failed { decision: None, error },
        };

        let decision = match self.strategy.decide(&sample) {
            Ok(decision) => decision,
            Err(error) => return TickOutcome::Failed { decision: None, error },
        };

        let Some(side) = decision.side() else {
            return TickOutcome::Held { sample };
        };

        if !self.state.can_act_now(now) {
            let until = self.state.next_allowed_at(now).unwrap_or(now);
            return TickOutcome::Skipped {
                decision,
                sample,
                reason: SkipReason::Cooldown { until },
            };
        }

        let amount = match self.executor.order_amount(side, sample.current_price).await {
            Ok(amount) => amount,
            Err(e) => {
                return TickOutcome::Failed {
                    decision: Some(decision),
                    error: e.into(),
                }
            }
        };

        match self.executor.execute(side, amount, sample.current_price).await {
            result @ ExecutionResult::Executed { .. } => {
                let persistence_error = self.state.record_action(now).err();
                TickOutcome::Executed {
                    decision,
                    sample,
                    result,
                    persistence_error,
                }
            }
            ExecutionResult::Skipped { reason } => TickOutcome::Skipped {
                decision,
                sample,
                reason: SkipReason::Executor(reason),
            },
            ExecutionResult::Failed { error } => TickOutcome::Failed {
                decision: Some(decision),
                error: error.into(),
            },
        }
    }

    async fn fetch_sample(&self, now: DateTime<Utc>) -> Result<PriceSample, BotError> {
        let pair = &self.settings.pair;
        let (current, reference) = tokio::try_join!(
            self.market.current_price(pair),
            self.market.reference_price(pair, self.settings.lookback_hours),
        )?;
        Ok(PriceSample::new(current, reference, now))
    }

    /// Log, journal and (when worth it) notify the tick outcome
    async fn report(&self, tick: u64, outcome: &TickOutcome) {
        let line = match self.settings.max_iterations {
            Some(max) => format!("Tick {}/{}: {}", tick, max, outcome),
            None => format!("Tick {}: {}", tick, outcome),
        };

        match outcome {
            TickOutcome::Failed { error, .. } if error.is_fatal() => error!("[Scheduler] {}", line),
            TickOutcome::Failed { .. } => warn!("[Scheduler] {}", line),
            _ => info!("[Scheduler] {}", line),
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&line).await {
                warn!("[Scheduler] Failed to write journal: {:#}", e);
            }
        }

        match outcome {
            TickOutcome::Executed { persistence_error, .. } => {
                self.notify(&line);
                if let Some(err) = persistence_error {
                    let msg = format!("Trade executed but cooldown record may be stale: {}", err);
                    warn!("[Scheduler] {}", msg);
                    self.notify(&msg);
                }
            }
            TickOutcome::Skipped {
                reason: SkipReason::Executor(_),
                ..
            }
            | TickOutcome::Failed { .. } => self.notify(&line),
            _ => {}
        }
    }

    fn notify(&self, message: &str) {
        if let Some(tx) = &self.notifier {
            if let Err(e) = tx.try_send(message.to_string()) {
                debug!("[Scheduler] Notification dropped: {}", e);
            }
        }
    }
}

/// Resolves once the flag is true; never resolves without a flag or once its sender is gone
async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => {
            if rx.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SizingMode, ThresholdConfig};
    use crate::exchange::ExchangeError;
    use crate::strategies::{AccumulationStrategy, ThresholdStrategy};
    use crate::types::{AccountSnapshot, OrderFill, OrderSide, SymbolRules};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    /// Wall clock that follows tokio's (pausable) clock
    #[derive(Debug)]
    struct TokioClock {
        wall_start: DateTime<Utc>,
        start: tokio::time::Instant,
    }

    impl TokioClock {
        fn new() -> Self {
            Self {
                wall_start: Utc::now(),
                start: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = tokio::time::Instant::now() - self.start;
            self.wall_start + chrono::Duration::from_std(elapsed).unwrap()
        }
    }

    /// Scripted prices; reference is fixed at 100
    #[derive(Default)]
    struct FakeMarket {
        prices: Mutex<VecDeque<Decimal>>,
        calls: AtomicU32,
        /// Pause+resume through this handle while serving a given call number
        toggle_on_call: Mutex<Option<(u32, ControlHandle, bool)>>,
        /// Request shutdown while serving a given call number
        shutdown_on_call: Mutex<Option<(u32, watch::Sender<bool>)>>,
    }

    impl FakeMarket {
        fn with_prices(prices: &[Decimal]) -> Arc<Self> {
            Arc::new(Self {
                prices: Mutex::new(prices.iter().copied().collect()),
                ..Default::default()
            })
        }
    }

    impl MarketData for FakeMarket {
        async fn current_price(&self, _pair: &TradingPair) -> Result<Decimal, ExchangeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, control, resume)) = self.toggle_on_call.lock().unwrap().as_ref() {
                if *at == call {
                    control.pause();
                    if *resume {
                        control.resume();
                    }
                }
            }
            if let Some((at, shutdown)) = self.shutdown_on_call.lock().unwrap().as_ref() {
                if *at == call {
                    shutdown.send_replace(true);
                }
            }
            Ok(self.prices.lock().unwrap().pop_front().unwrap_or(dec!(100)))
        }

        async fn reference_price(&self, _pair: &TradingPair, _lookback: u32) -> Result<Decimal, ExchangeError> {
            Ok(dec!(100))
        }
    }

    #[derive(Default)]
    struct FakeGateway {
        orders: Mutex<Vec<OrderSide>>,
        attempts: AtomicU32,
        fail_on_attempt: Option<(u32, ExchangeError)>,
    }

    impl OrderGateway for FakeGateway {
        async fn place_market_order(
            &self,
            _pair: &TradingPair,
            side: OrderSide,
            quote_amount: Decimal,
        ) -> Result<OrderFill, ExchangeError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((n, err)) = &self.fail_on_attempt {
                if *n == attempt {
                    return Err(err.clone());
                }
            }
            self.orders.lock().unwrap().push(side);
            Ok(OrderFill {
                order_id: attempt.to_string(),
                filled_quantity: dec!(0.0001),
                quote_amount,
            })
        }

        async fn symbol_rules(&self, _pair: &TradingPair) -> Result<SymbolRules, ExchangeError> {
            Ok(SymbolRules::default())
        }
    }

    impl AccountSource for FakeGateway {
        async fn free_balance(&self, _asset: &str) -> Result<Decimal, ExchangeError> {
            Ok(dec!(1000))
        }

        async fn account_snapshot(&self, _pair: &TradingPair) -> Result<AccountSnapshot, ExchangeError> {
            unreachable!("not used by the scheduler")
        }
    }

    struct Harness {
        dir: TempDir,
        control: ControlHandle,
        scheduler: Scheduler<Arc<FakeMarket>, Arc<FakeGateway>>,
    }

    fn harness(
        market: Arc<FakeMarket>,
        gateway: Arc<FakeGateway>,
        strategy: Box<dyn Strategy>,
        cooldown: chrono::Duration,
        max_iterations: Option<u64>,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let state = StateStore::open(dir.path().join("last_action.json"), cooldown).unwrap();
        let executor = TradeExecutor::new(gateway, TradingPair::new("BTC", "EUR"), SizingMode::Fixed(dec!(5)), false);
        let control = ControlHandle::new(false);
        let settings = SchedulerSettings {
            pair: TradingPair::new("BTC", "EUR"),
            interval: WEEK,
            lookback_hours: 12,
            max_iterations,
        };
        let scheduler = Scheduler::new(market, strategy, executor, state, control.clone(), settings)
            .with_clock(Box::new(TokioClock::new()))
            .with_journal(TickJournal::new(dir.path().join("bot.log")));
        Harness {
            dir,
            control,
            scheduler,
        }
    }

    fn threshold() -> Box<dyn Strategy> {
        Box::new(ThresholdStrategy::new(ThresholdConfig::default()))
    }

    #[test]
    fn test_control_handle_transitions() {
        let control = ControlHandle::new(false);
        assert!(control.pause());
        assert!(!control.pause());
        assert!(control.is_paused());
        assert!(control.resume());
        assert!(!control.resume());
        assert!(!control.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_hold_never_trades_and_stops_after_budget() {
        let market = FakeMarket::with_prices(&[]);
        let gateway = Arc::new(FakeGateway::default());
        let mut h = harness(market.clone(), gateway.clone(), threshold(), chrono::Duration::hours(24), Some(10));

        assert_eq!(h.scheduler.loop_state(), LoopState::Idle);
        let summary = h.scheduler.run().await.unwrap();

        assert_eq!(summary.ticks, 10);
        assert_eq!(summary.holds, 10);
        assert_eq!(gateway.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(market.calls.load(Ordering::SeqCst), 10);
        assert_eq!(h.scheduler.loop_state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_on_tick_three_stops_loop() {
        let market = FakeMarket::with_prices(&[]);
        let gateway = Arc::new(FakeGateway {
            fail_on_attempt: Some((3, ExchangeError::Authentication("Invalid API-key".into()))),
            ..Default::default()
        });
        let mut h = harness(
            market.clone(),
            gateway.clone(),
            Box::new(AccumulationStrategy::new()),
            chrono::Duration::zero(),
            Some(10),
        );

        let err = h.scheduler.run().await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(gateway.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(market.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.scheduler.loop_state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_errors_do_not_stop_loop() {
        let market = FakeMarket::with_prices(&[]);
        let gateway = Arc::new(FakeGateway {
            fail_on_attempt: Some((2, ExchangeError::InsufficientFunds("no EUR".into()))),
            ..Default::default()
        });
        let mut h = harness(
            market,
            gateway.clone(),
            Box::new(AccumulationStrategy::new()),
            chrono::Duration::zero(),
            Some(4),
        );
        let (tx, mut rx) = mpsc::channel(16);
        h.scheduler = h.scheduler.with_notifier(tx);

        let summary = h.scheduler.run().await.unwrap();

        assert_eq!(summary.trades, 3);
        assert_eq!(summary.failures, 1);
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        assert_eq!(messages.len(), 4);
        assert!(messages[1].contains("Insufficient balance"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_second_trade_within_window() {
        // Interval of one week is longer than the 24h cooldown, so use a longer cooldown
        let market = FakeMarket::with_prices(&[dec!(90), dec!(90), dec!(90)]);
        let gateway = Arc::new(FakeGateway::default());
        let mut h = harness(market, gateway.clone(), threshold(), chrono::Duration::days(10), Some(3));

        let summary = h.scheduler.run().await.unwrap();

        // Tick 1 buys, tick 2 (7 days later) is inside the 10 day window, tick 3 (14 days) is not
        assert_eq!(summary.trades, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(*gateway.orders.lock().unwrap(), vec![OrderSide::Buy, OrderSide::Buy]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_round_trip_is_transparent() {
        let prices = [dec!(90), dec!(110), dec!(101), dec!(95)];

        let baseline_gateway = Arc::new(FakeGateway::default());
        let mut baseline = harness(
            FakeMarket::with_prices(&prices),
            baseline_gateway.clone(),
            threshold(),
            chrono::Duration::zero(),
            Some(4),
        );
        let baseline_summary = baseline.scheduler.run().await.unwrap();

        let toggled_market = FakeMarket::with_prices(&prices);
        let toggled_gateway = Arc::new(FakeGateway::default());
        let mut toggled = harness(
            toggled_market.clone(),
            toggled_gateway.clone(),
            threshold(),
            chrono::Duration::zero(),
            Some(4),
        );
        *toggled_market.toggle_on_call.lock().unwrap() = Some((1, toggled.control.clone(), true));
        let toggled_summary = toggled.scheduler.run().await.unwrap();

        assert_eq!(baseline_summary, toggled_summary);
        assert_eq!(
            *baseline_gateway.orders.lock().unwrap(),
            *toggled_gateway.orders.lock().unwrap()
        );
        assert_eq!(
            *toggled_gateway.orders.lock().unwrap(),
            vec![OrderSide::Buy, OrderSide::Sell, OrderSide::Buy]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_mid_tick_applies_from_next_tick() {
        let market = FakeMarket::with_prices(&[dec!(90)]);
        let gateway = Arc::new(FakeGateway::default());
        let mut h = harness(market.clone(), gateway.clone(), threshold(), chrono::Duration::zero(), Some(2));
        // Pause arrives while tick 1 is fetching prices
        *market.toggle_on_call.lock().unwrap() = Some((1, h.control.clone(), false));

        let result = tokio::time::timeout(WEEK * 5, h.scheduler.run()).await;

        assert!(result.is_err(), "paused loop must not finish its budget");
        // Tick 1 still completed its trade; later ticks never reached the market
        assert_eq!(gateway.orders.lock().unwrap().len(), 1);
        assert_eq!(market.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_paused_skips_market() {
        let market = FakeMarket::with_prices(&[]);
        let gateway = Arc::new(FakeGateway::default());
        let mut h = harness(market.clone(), gateway, threshold(), chrono::Duration::zero(), Some(1));
        h.control.pause();

        let control = h.control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(WEEK * 2 + Duration::from_secs(60)).await;
            control.resume();
        });

        let summary = h.scheduler.run().await.unwrap();
        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.paused_ticks, 3);
        assert_eq!(market.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_reference_is_fatal() {
        struct ZeroReference;
        impl MarketData for ZeroReference {
            async fn current_price(&self, _pair: &TradingPair) -> Result<Decimal, ExchangeError> {
                Ok(dec!(100))
            }
            async fn reference_price(&self, _pair: &TradingPair, _lookback: u32) -> Result<Decimal, ExchangeError> {
                Ok(Decimal::ZERO)
            }
        }

        let dir = TempDir::new().unwrap();
        let state = StateStore::open(dir.path().join("s.json"), chrono::Duration::zero()).unwrap();
        let executor = TradeExecutor::new(
            Arc::new(FakeGateway::default()),
            TradingPair::new("BTC", "EUR"),
            SizingMode::Fixed(dec!(5)),
            true,
        );
        let settings = SchedulerSettings {
            pair: TradingPair::new("BTC", "EUR"),
            interval: WEEK,
            lookback_hours: 12,
            max_iterations: Some(5),
        };
        let mut scheduler = Scheduler::new(ZeroReference, threshold(), executor, state, ControlHandle::new(false), settings);

        let err = scheduler.run().await.unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));
    }

    #[test]
    fn test_status_line_format() {
        let sample = PriceSample::new(dec!(96), dec!(100), Utc::now());
        let outcome = TickOutcome::Skipped {
            decision: TradeDecision::Buy,
            sample,
            reason: SkipReason::Executor("amount below minimum notional".into()),
        };
        assert_eq!(
            outcome.to_string(),
            "BUY | price 96 (ref 100, -4.00%) | skipped: amount below minimum notional"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_tick_lets_trade_be_recorded() {
        let market = FakeMarket::with_prices(&[]);
        let gateway = Arc::new(FakeGateway::default());
        let mut h = harness(
            market.clone(),
            gateway.clone(),
            Box::new(AccumulationStrategy::new()),
            chrono::Duration::days(10),
            Some(10),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Shutdown arrives while tick 1 is fetching prices, before its order
        *market.shutdown_on_call.lock().unwrap() = Some((1, shutdown_tx));
        h.scheduler = h.scheduler.with_shutdown(shutdown_rx);

        let summary = h.scheduler.run().await.unwrap();

        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.trades, 1);
        assert_eq!(gateway.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(market.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.scheduler.loop_state(), LoopState::Stopped);
        let record = StateStore::read_record(&h.dir.path().join("last_action.json")).unwrap();
        assert!(record.last_action_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_between_ticks_stops_without_next_tick() {
        let market = FakeMarket::with_prices(&[]);
        let gateway = Arc::new(FakeGateway::default());
        let mut h = harness(market.clone(), gateway, threshold(), chrono::Duration::zero(), Some(10));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        h.scheduler = h.scheduler.with_shutdown(shutdown_rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            shutdown_tx.send_replace(true);
        });

        let summary = h.scheduler.run().await.unwrap();
        assert_eq!(summary.ticks, 1);
        assert_eq!(market.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_warns_and_keeps_cooldown() {
        let market = FakeMarket::with_prices(&[]);
        let gateway = Arc::new(FakeGateway::default());
        let mut h = harness(
            market,
            gateway.clone(),
            Box::new(AccumulationStrategy::new()),
            chrono::Duration::days(10),
            Some(2),
        );
        // A non-empty directory where the state file goes makes the rename fail
        std::fs::create_dir_all(h.dir.path().join("last_action.json").join("child")).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        h.scheduler = h.scheduler.with_notifier(tx);

        let summary = h.scheduler.run().await.unwrap();

        // Tick 2 (7 days later) is still inside the 10 day window
        assert_eq!(summary.trades, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failures, 0);
        assert_eq!(gateway.attempts.load(Ordering::SeqCst), 1);

        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        assert!(messages.iter().any(|m| m.contains("cooldown record may be stale")));
    }
}
