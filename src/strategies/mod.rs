//! Trading strategies (decision engine variants)

pub mod accumulation;
pub mod threshold;

pub use accumulation::AccumulationStrategy;
pub use threshold::{decide, ThresholdStrategy};

use crate::config::{StrategyKind, ThresholdConfig};
use crate::error::BotResult;
use crate::types::{PriceSample, TradeDecision};

/// Trait for trading strategies
pub trait Strategy: Send + Sync {
    /// Turn one price sample into a decision. Must be pure.
    fn decide(&self, sample: &PriceSample) -> BotResult<TradeDecision>;

    /// Get strategy name for display
    fn name(&self) -> &'static str;
}

/// Build the strategy selected by configuration
pub fn from_config(kind: StrategyKind, threshold: &ThresholdConfig) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Threshold => Box::new(ThresholdStrategy::new(threshold.clone())),
        StrategyKind::Accumulation => Box::new(AccumulationStrategy::new()),
    }
}
