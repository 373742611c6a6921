//! RSI extremes confirmed at the Bollinger bands.

use std::collections::HashMap;

use market_core::config::StrategySettings;
use market_core::types::{IndicatorSet, Regime, SignalSide, StrategyType};
use tracing::debug;

use super::{atr_exit_plan, to_price, Candidate, SignalEngine};

#[derive(Debug, Clone, Copy)]
struct Prev {
    low: f64,
    high: f64,
    volume: f64,
    bb_lower: f64,
    bb_upper: f64,
}

pub struct MeanReversionEngine {
    settings: StrategySettings,
    prev: HashMap<String, Prev>,
}

impl MeanReversionEngine {
    pub fn new(settings: StrategySettings) -> Self {
        Self {
            settings,
            prev: HashMap::new(),
        }
    }

    /// Price at or through the band on this bar, or a bounce back inside after
    /// the previous bar touched it.
    fn band_contact(&self, side: SignalSide, set: &IndicatorSet, prev: Option<&Prev>) -> bool {
        let tol = self.settings.band_touch_tolerance;
        match side {
            SignalSide::Buy => {
                let touch = set.low <= set.bb_lower * (1.0 + tol);
                let bounce = prev.is_some_and(|p| p.low <= p.bb_lower * (1.0 + tol)) && set.close > set.bb_lower;
                touch || bounce
            }
            SignalSide::Sell => {
                let touch = set.high >= set.bb_upper * (1.0 - tol);
                let bounce = prev.is_some_and(|p| p.high >= p.bb_upper * (1.0 - tol)) && set.close < set.bb_upper;
                touch || bounce
            }
            SignalSide::Hold => false,
        }
    }

    fn near_level(&self, side: SignalSide, set: &IndicatorSet) -> bool {
        if set.close <= 0.0 {
            return false;
        }
        let level = match side {
            SignalSide::Buy => set.support,
            SignalSide::Sell => set.resistance,
            SignalSide::Hold => return false,
        };
        (set.close - level).abs() / set.close <= self.settings.level_proximity
    }
}

impl SignalEngine for MeanReversionEngine {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::MeanReversion
    }

    fn primary_regime(&self) -> Regime {
        Regime::Ranging
    }

    fn detect(&mut self, set: &IndicatorSet) -> Option<Candidate> {
        let prev = self.prev.insert(
            set.symbol.clone(),
            Prev {
                low: set.low,
                high: set.high,
                volume: set.volume,
                bb_lower: set.bb_lower,
                bb_upper: set.bb_upper,
            },
        );

        let s = &self.settings;
        let (side, overshoot) = if set.rsi < s.rsi_oversold {
            (SignalSide::Buy, s.rsi_oversold - set.rsi)
        } else if set.rsi > s.rsi_overbought {
            (SignalSide::Sell, set.rsi - s.rsi_overbought)
        } else {
            return None;
        };

        if !self.band_contact(side, set, prev.as_ref()) {
            debug!(symbol = %set.symbol, rsi = set.rsi, "RSI extreme without band contact");
            return None;
        }

        if self.settings.require_volume_decline {
            let declining = prev.is_some_and(|p| set.volume < p.volume);
            if !declining {
                debug!(symbol = %set.symbol, "Overshoot on rising volume");
                return None;
            }
        }

        let has_room = match side {
            SignalSide::Buy => set.bb_middle > set.close,
            SignalSide::Sell => set.bb_middle < set.close,
            SignalSide::Hold => false,
        };
        if !has_room {
            return None;
        }

        let mut confidence = 55.0 + (overshoot * 1.5).min(30.0);
        if self.near_level(side, set) {
            confidence += 15.0;
        }

        let mut exit_plan = atr_exit_plan(side, set.close, set.atr, &self.settings)?;
        let target = to_price(set.bb_middle)?;
        exit_plan.take_profit_1 = target;
        exit_plan.take_profit_2 = target;
        exit_plan.target_price = Some(target);
        exit_plan.trailing_distance = None;
        exit_plan.partial_close_fraction = rust_decimal::Decimal::ONE;
        exit_plan.rsi_exit_band = Some((self.settings.rsi_neutral_low, self.settings.rsi_neutral_high));

        Some(Candidate {
            side,
            confidence: confidence.min(100.0),
            exit_plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::test_support::indicator_set;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn oversold_pair() -> (IndicatorSet, IndicatorSet) {
        let before = indicator_set("ETHUSDT");
        let mut after = before.clone();
        after.timestamp = before.timestamp + Duration::minutes(15);
        after.rsi = 24.0;
        after.close = 98.1;
        after.low = 97.9;
        after.volume = 800.0;
        after.support = 97.8;
        (before, after)
    }

    #[test]
    fn test_oversold_touch_buys_toward_middle_band() {
        let mut engine = MeanReversionEngine::new(StrategySettings::default());
        let (before, after) = oversold_pair();
        assert!(engine.detect(&before).is_none());

        let candidate = engine.detect(&after).unwrap();
        assert_eq!(candidate.side, SignalSide::Buy);
        // 55 + 6*1.5 + 15 near support
        assert!((candidate.confidence - 79.0).abs() < 1e-9);
        assert_eq!(candidate.exit_plan.target_price, Some(Decimal::new(100, 0)));
        assert_eq!(candidate.exit_plan.rsi_exit_band, Some((45.0, 55.0)));
        assert_eq!(candidate.exit_plan.partial_close_fraction, Decimal::ONE);
    }

    #[test]
    fn test_rising_volume_blocks_entry() {
        let mut engine = MeanReversionEngine::new(StrategySettings::default());
        let (before, mut after) = oversold_pair();
        after.volume = 1_200.0;
        engine.detect(&before);
        assert!(engine.detect(&after).is_none());
    }

    #[test]
    fn test_no_band_contact_no_signal() {
        let mut engine = MeanReversionEngine::new(StrategySettings::default());
        let (before, mut after) = oversold_pair();
        after.low = 99.0;
        after.close = 99.2;
        engine.detect(&before);
        assert!(engine.detect(&after).is_none());
    }

    #[test]
    fn test_overbought_sells() {
        let mut engine = MeanReversionEngine::new(StrategySettings::default());
        let before = indicator_set("SOLUSDT");
        let mut after = before.clone();
        after.rsi = 80.0;
        after.high = 102.1;
        after.close = 101.8;
        after.volume = 900.0;
        engine.detect(&before);

        let candidate = engine.detect(&after).unwrap();
        assert_eq!(candidate.side, SignalSide::Sell);
        assert!(candidate.exit_plan.stop_loss > Decimal::new(1018, 1));
    }
}
