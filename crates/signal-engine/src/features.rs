//! Feature extraction for the learned score.

use std::collections::HashMap;

use market_core::types::{FeatureVector, IndicatorSet, Regime, RegimeState};

/// Builds `FeatureVector`s, remembering each symbol's last MACD histogram so
/// the delta is bar-over-bar.
#[derive(Debug, Default)]
pub struct FeatureExtractor {
    last_histogram: HashMap<String, f64>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the histogram of a bar that produced no candidate.
    pub fn observe(&mut self, set: &IndicatorSet) {
        self.last_histogram.insert(set.symbol.clone(), set.macd_histogram);
    }

    /// Features for `set`. `orderbook_imbalance` is (bid - ask) / (bid + ask)
    /// when a book snapshot is available, else 0.
    pub fn extract(
        &mut self,
        set: &IndicatorSet,
        regime: &RegimeState,
        orderbook_imbalance: Option<f64>,
    ) -> FeatureVector {
        let previous = self
            .last_histogram
            .insert(set.symbol.clone(), set.macd_histogram)
            .unwrap_or(set.macd_histogram);

        let ema_distance = if set.close > 0.0 {
            (set.ema_fast - set.ema_slow) / set.close
        } else {
            0.0
        };

        FeatureVector {
            is_trending: regime.base_regime == Regime::Trending,
            is_ranging: regime.base_regime == Regime::Ranging,
            is_high_volatility: regime.is_high_volatility(),
            rsi: set.rsi,
            macd_histogram_delta: set.macd_histogram - previous,
            bb_percent_b: set.bb_percent_b,
            atr_pct: set.atr_pct(),
            volume_zscore: set.volume_zscore(),
            ema_distance,
            orderbook_imbalance: orderbook_imbalance.unwrap_or(0.0).clamp(-1.0, 1.0),
        }
    }
}

/// (bid - ask) / (bid + ask) over resting size, 0 for an empty book.
pub fn orderbook_imbalance(bid_size: f64, ask_size: f64) -> f64 {
    let total = bid_size + ask_size;
    if total > 0.0 {
        (bid_size - ask_size) / total
    } else {
        0.0
    }
}
