//! Accumulation (DCA) Strategy
//!
//! Buys on every evaluated tick regardless of price. Cadence comes from the
//! scheduler interval and the cooldown window, sizing from the executor.

use crate::error::{BotError, BotResult};
use crate::types::{PriceSample, TradeDecision};

/// Dollar-cost averaging: always buy
#[derive(Debug, Default)]
pub struct AccumulationStrategy;

impl AccumulationStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl super::Strategy for AccumulationStrategy {
    fn decide(&self, sample: &PriceSample) -> BotResult<TradeDecision> {
        if sample.reference_price.is_zero() {
            return Err(BotError::InvalidInput("reference price is zero".to_string()));
        }
        Ok(TradeDecision::Buy)
    }

    fn name(&self) -> &'static str {
        "Accumulation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::Strategy;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_always_buys() {
        let strategy = AccumulationStrategy::new();
        for current in [dec!(50), dec!(100), dec!(200)] {
            let sample = PriceSample::new(current, dec!(100), Utc::now());
            assert_eq!(strategy.decide(&sample).unwrap(), TradeDecision::Buy);
        }
    }

    #[test]
    fn test_zero_reference_rejected() {
        let sample = PriceSample::new(dec!(100), Decimal::ZERO, Utc::now());
        assert!(AccumulationStrategy::new().decide(&sample).is_err());
    }
}
