//! Order execution (paper or live)

use crate::config::SizingMode;
use crate::exchange::{AccountSource, ErrorKind, ExchangeError, OrderGateway};
use crate::types::{OrderSide, TradingPair};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

/// Order executor handles placing trades (paper or real)
pub struct TradeExecutor<G> {
    gateway: G,
    pair: TradingPair,
    sizing: SizingMode,
    paper_trading: bool,
    min_notional: Option<Decimal>,
    rules_loaded: bool,
}

impl<G: OrderGateway + AccountSource> TradeExecutor<G> {
    pub fn new(gateway: G, pair: TradingPair, sizing: SizingMode, paper_trading: bool) -> Self {
        Self {
            gateway,
            pair,
            sizing,
            paper_trading,
            min_notional: None,
            rules_loaded: false,
        }
    }

    pub fn is_paper(&self) -> bool {
        self.paper_trading
    }

    /// Notional for the next order, in quote currency, rounded down to cents
    pub async fn order_amount(&self, side: OrderSide, price: Decimal) -> Result<Decimal, ExchangeError> {
        let raw = match self.sizing {
            SizingMode::Fixed(amount) => amount,
            SizingMode::BalanceRatio(ratio) => match side {
                OrderSide::Buy => self.gateway.free_balance(&self.pair.quote).await? * ratio,
                OrderSide::Sell => self.gateway.free_balance(&self.pair.base).await? * price * ratio,
            },
        };
        Ok(raw.round_dp_with_strategy(2, RoundingStrategy::ToZero))
    }

    /// Execute one market order for `amount` of quote currency.
    ///
    /// `price` is the price the decision was taken at; paper fills use it.
    pub async fn execute(&mut self, side: OrderSide, amount: Decimal, price: Decimal) -> ExecutionResult {
        let amount = amount.round_dp(2);
        if amount <= Decimal::ZERO {
            return ExecutionResult::Skipped {
                reason: "Order amount is zero".to_string(),
            };
        }

        self.ensure_rules().await;
        if let Some(min) = self.min_notional {
            if amount < min {
                info!(
                    "[Executor] Amount {} {} below minimum {} {}, skipping",
                    amount, self.pair.quote, min, self.pair.quote
                );
                return ExecutionResult::Skipped {
                    reason: format!("{} {} below minimum notional {}", amount, self.pair.quote, min),
                };
            }
        }

        if self.paper_trading {
            self.paper_execute(side, amount, price)
        } else {
            self.live_execute(side, amount).await
        }
    }

    /// Paper trade execution (simulation)
    fn paper_execute(&self, side: OrderSide, amount: Decimal, price: Decimal) -> ExecutionResult {
        let filled_quantity = if price.is_zero() {
            Decimal::ZERO
        } else {
            (amount / price).round_dp(8)
        };

        info!(
            "[PAPER] {} {} {} for {} {} at {}",
            side, filled_quantity, self.pair.base, amount, self.pair.quote, price
        );

        ExecutionResult::Executed {
            order_id: format!("paper-{}", chrono::Utc::now().timestamp_millis()),
            side,
            filled_quantity,
            quote_amount: amount,
            paper: true,
        }
    }

    /// Live trade execution via the exchange
    async fn live_execute(&mut self, side: OrderSide, amount: Decimal) -> ExecutionResult {
        info!("[LIVE] Placing {} market order on {} for {} {}", side, self.pair, amount, self.pair.quote);

        match self.gateway.place_market_order(&self.pair, side, amount).await {
            Ok(fill) => ExecutionResult::Executed {
                order_id: fill.order_id,
                side,
                filled_quantity: fill.filled_quantity,
                quote_amount: fill.quote_amount,
                paper: false,
            },
            Err(error) => {
                if error.is_notional_rejection() && self.min_notional.is_none() {
                    info!("[Executor] Notional rejection, reloading trading rules before next attempt");
                    self.rules_loaded = false;
                }
                ExecutionResult::Failed { error }
            }
        }
    }

    /// Fetch the minimum notional once; failures leave the check disabled
    async fn ensure_rules(&mut self) {
        if self.rules_loaded {
            return;
        }
        match self.gateway.symbol_rules(&self.pair).await {
            Ok(rules) => {
                debug!("[Executor] {} min notional: {:?}", self.pair, rules.min_notional);
                self.min_notional = rules.min_notional;
                self.rules_loaded = true;
            }
            Err(e) => warn!("[Executor] Could not load trading rules for {}: {}", self.pair, e),
        }
    }
}

/// Result of an execution attempt
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Executed {
        order_id: String,
        side: OrderSide,
        filled_quantity: Decimal,
        quote_amount: Decimal,
        paper: bool,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: ExchangeError,
    },
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        matches!(self, ExecutionResult::Executed { .. })
    }

    /// Base quantity filled, if the order went through
    pub fn filled_amount(&self) -> Option<Decimal> {
        match self {
            ExecutionResult::Executed { filled_quantity, .. } => Some(*filled_quantity),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ExecutionResult::Failed { error } => Some(error.kind()),
            _ => None,
        }
    }
}
