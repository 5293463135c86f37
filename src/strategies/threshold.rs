//! Threshold Strategy
//!
//! The play: compare the live price to a recent reference price.
//! A drop of at least `threshold_percent` is a buy; a rise of at least
//! `threshold_percent` is a sell; anything in between holds.

use crate::config::ThresholdConfig;
use crate::error::{BotError, BotResult};
use crate::types::{PriceSample, TradeDecision};
use rust_decimal::Decimal;

/// Pure threshold decision.
///
/// `threshold_percent` is expressed in percent, so `3` means 3%.
/// Both bounds are inclusive. A zero reference price is rejected rather
/// than divided by.
pub fn decide(sample: &PriceSample, threshold_percent: Decimal) -> BotResult<TradeDecision> {
    if threshold_percent.is_sign_negative() {
        return Err(BotError::InvalidInput(format!(
            "threshold percent must not be negative (got {})",
            threshold_percent
        )));
    }

    let deviation = sample.deviation_percent().ok_or_else(|| {
        BotError::InvalidInput("reference price is zero".to_string())
    })?;

    if deviation >= threshold_percent {
        Ok(TradeDecision::Sell)
    } else if deviation <= -threshold_percent {
        Ok(TradeDecision::Buy)
    } else {
        Ok(TradeDecision::Hold)
    }
}

/// Threshold strategy implementation
pub struct ThresholdStrategy {
    config: ThresholdConfig,
}

impl ThresholdStrategy {
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }
}

impl super::Strategy for ThresholdStrategy {
    fn decide(&self, sample: &PriceSample) -> BotResult<TradeDecision> {
        let decision = decide(sample, self.config.threshold_percent)?;
        if decision == TradeDecision::Sell && !self.config.sell_enabled {
            return Ok(TradeDecision::Hold);
        }
        Ok(decision)
    }

    fn name(&self) -> &'static str {
        "Threshold"
    }
}
