//! Core types for the trading bot

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One observation of the market, produced fresh each tick
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSample {
    pub current_price: Decimal,
    pub reference_price: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl PriceSample {
    pub fn new(current_price: Decimal, reference_price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            current_price,
            reference_price,
            observed_at,
        }
    }

    /// Relative move of the current price against the reference, as a percentage.
    /// None when the reference is zero.
    pub fn deviation_percent(&self) -> Option<Decimal> {
        if self.reference_price.is_zero() {
            return None;
        }
        Some((self.current_price - self.reference_price) / self.reference_price * Decimal::ONE_HUNDRED)
    }
}

/// Outcome of a strategy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDecision {
    Buy,
    Sell,
    Hold,
}

impl TradeDecision {
    /// Order side to send, None for Hold
    pub fn side(&self) -> Option<OrderSide> {
        match self {
            TradeDecision::Buy => Some(OrderSide::Buy),
            TradeDecision::Sell => Some(OrderSide::Sell),
            TradeDecision::Hold => None,
        }
    }
}

impl fmt::Display for TradeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDecision::Buy => write!(f, "BUY"),
            TradeDecision::Sell => write!(f, "SELL"),
            TradeDecision::Hold => write!(f, "HOLD"),
        }
    }
}

/// Order side on the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Wire representation used by the exchange API
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single-asset trading pair, e.g. BTC/EUR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        }
    }

    /// Exchange symbol, e.g. "BTCEUR"
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Fill report for a market order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    /// Base asset quantity filled
    pub filled_quantity: Decimal,
    /// Quote asset amount spent (buy) or received (sell)
    pub quote_amount: Decimal,
}

/// Trading rules for a symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolRules {
    /// Minimum order value in quote currency, None if the exchange sets none
    pub min_notional: Option<Decimal>,
}

/// Balances and open orders for the traded pair
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub base_asset: String,
    pub base_total: Decimal,
    pub quote_asset: String,
    pub quote_total: Decimal,
    pub quote_free: Decimal,
    pub open_orders: usize,
}

impl fmt::Display for AccountSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} | {}: {:.2} ({:.2} free) | Open orders: {}",
            self.base_asset,
            self.base_total.normalize(),
            self.quote_asset,
            self.quote_total,
            self.quote_free,
            self.open_orders
        )
    }
}
