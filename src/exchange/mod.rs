//! Exchange access: market data, order placement and account queries
//!
//! The scheduler only sees the traits below; `binance` provides the live
//! implementation and tests substitute in-memory fakes.

pub mod binance;
pub mod errors;

pub use binance::{BinanceClient, ReferenceMode};
pub use errors::{ErrorKind, ExchangeError};

use crate::types::{AccountSnapshot, OrderFill, OrderSide, SymbolRules, TradingPair};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;

/// Price feed for the traded pair
pub trait MarketData: Send + Sync {
    /// Last traded price
    fn current_price(
        &self,
        pair: &TradingPair,
    ) -> impl Future<Output = Result<Decimal, ExchangeError>> + Send;

    /// Reference price over the last `lookback_hours`
    fn reference_price(
        &self,
        pair: &TradingPair,
        lookback_hours: u32,
    ) -> impl Future<Output = Result<Decimal, ExchangeError>> + Send;
}

/// Order entry
pub trait OrderGateway: Send + Sync {
    /// Market order for `quote_amount` worth of the base asset
    fn place_market_order(
        &self,
        pair: &TradingPair,
        side: OrderSide,
        quote_amount: Decimal,
    ) -> impl Future<Output = Result<OrderFill, ExchangeError>> + Send;

    fn symbol_rules(
        &self,
        pair: &TradingPair,
    ) -> impl Future<Output = Result<SymbolRules, ExchangeError>> + Send;
}

/// Read-only account queries
pub trait AccountSource: Send + Sync {
    fn free_balance(&self, asset: &str) -> impl Future<Output = Result<Decimal, ExchangeError>> + Send;

    fn account_snapshot(
        &self,
        pair: &TradingPair,
    ) -> impl Future<Output = Result<AccountSnapshot, ExchangeError>> + Send;
}

impl<T: MarketData> MarketData for Arc<T> {
    fn current_price(
        &self,
        pair: &TradingPair,
    ) -> impl Future<Output = Result<Decimal, ExchangeError>> + Send {
        (**self).current_price(pair)
    }

    fn reference_price(
        &self,
        pair: &TradingPair,
        lookback_hours: u32,
    ) -> impl Future<Output = Result<Decimal, ExchangeError>> + Send {
        (**self).reference_price(pair, lookback_hours)
    }
}

impl<T: OrderGateway> OrderGateway for Arc<T> {
    fn place_market_order(
        &self,
        pair: &TradingPair,
        side: OrderSide,
        quote_amount: Decimal,
    ) -> impl Future<Output = Result<OrderFill, ExchangeError>> + Send {
        (**self).place_market_order(pair, side, quote_amount)
    }

    fn symbol_rules(
        &self,
        pair: &TradingPair,
    ) -> impl Future<Output = Result<SymbolRules, ExchangeError>> + Send {
        (**self).symbol_rules(pair)
    }
}

impl<T: AccountSource> AccountSource for Arc<T> {
    fn free_balance(&self, asset: &str) -> impl Future<Output = Result<Decimal, ExchangeError>> + Send {
        (**self).free_balance(asset)
    }

    fn account_snapshot(
        &self,
        pair: &TradingPair,
    ) -> impl Future<Output = Result<AccountSnapshot, ExchangeError>> + Send {
        (**self).account_snapshot(pair)
    }
}
