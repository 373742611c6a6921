//! EMA-cross trend follower with MACD confirmation.

use std::collections::HashMap;

use market_core::config::StrategySettings;
use market_core::types::{IndicatorSet, Regime, SignalSide, StrategyType};
use tracing::debug;

use super::{atr_exit_plan, Candidate, SignalEngine};

#[derive(Debug, Clone, Copy)]
struct Prev {
    ema_fast: f64,
    ema_slow: f64,
    macd_line: f64,
    macd_signal: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct SymbolState {
    prev: Option<Prev>,
    /// Direction and age in bars of the latest MACD cross.
    macd_cross: Option<(SignalSide, usize)>,
}

pub struct TrendFollowingEngine {
    settings: StrategySettings,
    symbols: HashMap<String, SymbolState>,
}

impl TrendFollowingEngine {
    pub fn new(settings: StrategySettings) -> Self {
        Self {
            settings,
            symbols: HashMap::new(),
        }
    }

    fn volume_spike(&self, set: &IndicatorSet) -> bool {
        set.volume > set.volume_mean + self.settings.volume_spike_k * set.volume_stddev
    }

    fn breakout(&self, side: SignalSide, set: &IndicatorSet) -> bool {
        let outside = match side {
            SignalSide::Buy => set.close > set.bb_upper,
            SignalSide::Sell => set.close < set.bb_lower,
            SignalSide::Hold => false,
        };
        outside && self.volume_spike(set)
    }
}

fn cross(prev_a: f64, prev_b: f64, a: f64, b: f64) -> Option<SignalSide> {
    if prev_a <= prev_b && a > b {
        Some(SignalSide::Buy)
    } else if prev_a >= prev_b && a < b {
        Some(SignalSide::Sell)
    } else {
        None
    }
}

impl SignalEngine for TrendFollowingEngine {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::TrendFollowing
    }

    fn primary_regime(&self) -> Regime {
        Regime::Trending
    }

    fn detect(&mut self, set: &IndicatorSet) -> Option<Candidate> {
        let mut state = self.symbols.get(&set.symbol).copied().unwrap_or_default();

        let ema_cross = state.prev.and_then(|p| cross(p.ema_fast, p.ema_slow, set.ema_fast, set.ema_slow));
        let macd_cross = state
            .prev
            .and_then(|p| cross(p.macd_line, p.macd_signal, set.macd_line, set.macd_signal));

        state.macd_cross = match macd_cross {
            Some(side) => Some((side, 0)),
            None => state.macd_cross.map(|(side, age)| (side, age + 1)),
        };
        state.prev = Some(Prev {
            ema_fast: set.ema_fast,
            ema_slow: set.ema_slow,
            macd_line: set.macd_line,
            macd_signal: set.macd_signal,
        });
        self.symbols.insert(set.symbol.clone(), state);

        let side = ema_cross?;

        let with_trend = match side {
            SignalSide::Buy => set.sma_mid > set.sma_long,
            SignalSide::Sell => set.sma_mid < set.sma_long,
            SignalSide::Hold => false,
        };
        if !with_trend {
            debug!(symbol = %set.symbol, side = ?side, "EMA cross against the 50/200 trend");
            return None;
        }

        let confirmed = matches!(
            state.macd_cross,
            Some((macd_side, age)) if macd_side == side && age <= self.settings.macd_confirm_lookback
        );
        if !confirmed {
            debug!(symbol = %set.symbol, side = ?side, "EMA cross without MACD confirmation");
            return None;
        }

        let breakout = self.breakout(side, set);
        if self.settings.require_breakout && !breakout {
            debug!(symbol = %set.symbol, side = ?side, "EMA cross without breakout volume");
            return None;
        }

        let mut confidence = 55.0 + 25.0 * set.adx.min(50.0) / 50.0;
        if breakout {
            confidence += 10.0;
        }
        if matches!(state.macd_cross, Some((_, 0))) {
            confidence += 10.0;
        }

        let exit_plan = atr_exit_plan(side, set.close, set.atr, &self.settings)?;
        Some(Candidate {
            side,
            confidence: confidence.min(100.0),
            exit_plan,
        })
    }
}
