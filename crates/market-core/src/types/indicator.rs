//! Per-bar indicator snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indicator values computed for one completed bar.
///
/// Produced by the indicator engine once the longest window (SMA 200) is
/// warm; before that no `IndicatorSet` exists for the symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,

    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,

    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub atr: f64,
    pub rsi: f64,

    /// EMA(9).
    pub ema_fast: f64,
    /// EMA(21).
    pub ema_slow: f64,
    pub ema_50: f64,
    pub ema_200: f64,
    /// SMA(50).
    pub sma_mid: f64,
    /// SMA(200).
    pub sma_long: f64,

    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    /// (upper - lower) / middle.
    pub bb_width: f64,
    /// Trailing 60-bar median of `bb_width`, including the current bar.
    pub bb_width_median: f64,
    pub bb_percent_b: f64,

    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,

    pub volume_mean: f64,
    pub volume_stddev: f64,

    /// Lowest low of the last 20 bars.
    pub support: f64,
    /// Highest high of the last 20 bars.
    pub resistance: f64,
}

impl IndicatorSet {
    /// ATR as a fraction of price.
    pub fn atr_pct(&self) -> f64 {
        if self.close > 0.0 {
            self.atr / self.close
        } else {
            0.0
        }
    }

    /// |EMA50 - EMA200| as a fraction of price.
    pub fn ema_gap_pct(&self) -> f64 {
        if self.close > 0.0 {
            (self.ema_50 - self.ema_200).abs() / self.close
        } else {
            0.0
        }
    }

    /// Volume z-score against the 20-bar mean.
    pub fn volume_zscore(&self) -> f64 {
        if self.volume_stddev > 0.0 {
            (self.volume - self.volume_mean) / self.volume_stddev
        } else {
            0.0
        }
    }
}
