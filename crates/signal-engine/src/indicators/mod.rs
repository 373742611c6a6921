//! Incremental indicator engine.
//!
//! One engine instance owns the rolling state of a single (symbol, timeframe)
//! stream. Each completed bar costs a constant amount of work; the result is
//! identical to recomputing over the full history (see [`batch`]).

pub mod adx;
pub mod batch;
pub mod rolling;

use chrono::{DateTime, Utc};
use market_core::types::{IndicatorSet, MarketBar, Timeframe};
use market_core::{Error, Result};
use tracing::debug;

use adx::Adx;
use rolling::{Ema, RollingExtremes, RollingMedian, RollingStats, Sma, WilderAverage};

pub const ADX_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const RSI_PERIOD: usize = 14;
pub const EMA_FAST: usize = 9;
pub const EMA_SLOW: usize = 21;
pub const EMA_REGIME_FAST: usize = 50;
pub const EMA_REGIME_SLOW: usize = 200;
pub const SMA_MID: usize = 50;
pub const SMA_LONG: usize = 200;
pub const BB_PERIOD: usize = 20;
pub const BB_STDDEV: f64 = 2.0;
pub const BB_WIDTH_MEDIAN: usize = 60;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const VOLUME_PERIOD: usize = 20;
pub const LEVEL_PERIOD: usize = 20;

/// Bars required before the first `IndicatorSet` (the longest window).
pub const WARMUP_BARS: usize = 200;

/// Streaming indicator state for one symbol and timeframe.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    symbol: String,
    timeframe: Timeframe,
    bars_seen: usize,
    last_timestamp: Option<DateTime<Utc>>,
    prev_close: Option<f64>,

    atr: WilderAverage,
    rsi_gain: WilderAverage,
    rsi_loss: WilderAverage,
    adx: Adx,
    ema_fast: Ema,
    ema_slow: Ema,
    ema_50: Ema,
    ema_200: Ema,
    sma_mid: Sma,
    sma_long: Sma,
    bollinger: RollingStats,
    bb_width_median: RollingMedian,
    macd_fast: Ema,
    macd_slow: Ema,
    macd_signal: Ema,
    volume: RollingStats,
    levels: RollingExtremes,

    latest: Option<IndicatorSet>,
}

impl IndicatorEngine {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bars_seen: 0,
            last_timestamp: None,
            prev_close: None,
            atr: WilderAverage::new(ATR_PERIOD),
            rsi_gain: WilderAverage::new(RSI_PERIOD),
            rsi_loss: WilderAverage::new(RSI_PERIOD),
            adx: Adx::new(ADX_PERIOD),
            ema_fast: Ema::new(EMA_FAST),
            ema_slow: Ema::new(EMA_SLOW),
            ema_50: Ema::new(EMA_REGIME_FAST),
            ema_200: Ema::new(EMA_REGIME_SLOW),
            sma_mid: Sma::new(SMA_MID),
            sma_long: Sma::new(SMA_LONG),
            bollinger: RollingStats::new(BB_PERIOD),
            bb_width_median: RollingMedian::new(BB_WIDTH_MEDIAN),
            macd_fast: Ema::new(MACD_FAST),
            macd_slow: Ema::new(MACD_SLOW),
            macd_signal: Ema::new(MACD_SIGNAL),
            volume: RollingStats::new(VOLUME_PERIOD),
            levels: RollingExtremes::new(LEVEL_PERIOD),
            latest: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Most recent complete indicator set, if warm.
    pub fn latest(&self) -> Option<&IndicatorSet> {
        self.latest.as_ref()
    }

    /// Whether `bar` would be accepted, without mutating state.
    pub fn check_bar(&self, bar: &MarketBar) -> Result<()> {
        if bar.symbol != self.symbol || bar.timeframe != self.timeframe {
            return Err(Error::InvalidInputs(format!(
                "bar {}/{} fed to engine {}/{}",
                bar.symbol, bar.timeframe, self.symbol, self.timeframe
            )));
        }
        if let Some(last) = self.last_timestamp {
            if bar.timestamp <= last {
                return Err(Error::InvalidInputs(format!(
                    "bar at {} is not after {} for {}",
                    bar.timestamp, last, self.symbol
                )));
            }
        }
        if !(bar.high >= bar.low && bar.close > 0.0 && bar.volume >= 0.0) {
            return Err(Error::InvalidInputs(format!(
                "malformed bar for {} at {}",
                bar.symbol, bar.timestamp
            )));
        }
        Ok(())
    }

    /// Feed the next completed bar.
    ///
    /// Returns `InsufficientHistory` until [`WARMUP_BARS`] bars have been seen;
    /// the bar is still consumed in that case.
    pub fn update(&mut self, bar: &MarketBar) -> Result<IndicatorSet> {
        self.check_bar(bar)?;

        self.bars_seen += 1;
        self.last_timestamp = Some(bar.timestamp);

        let tr = bar.true_range(self.prev_close);
        let atr = self.atr.update(tr);

        let rsi = match self.prev_close {
            Some(pc) => {
                let change = bar.close - pc;
                let gain = self.rsi_gain.update(change.max(0.0));
                let loss = self.rsi_loss.update((-change).max(0.0));
                match (gain, loss) {
                    (Some(g), Some(l)) => Some(rsi_from_averages(g, l)),
                    _ => None,
                }
            }
            None => None,
        };
        self.prev_close = Some(bar.close);

        let adx = self.adx.update(bar.high, bar.low, bar.close);
        let ema_fast = self.ema_fast.update(bar.close);
        let ema_slow = self.ema_slow.update(bar.close);
        let ema_50 = self.ema_50.update(bar.close);
        let ema_200 = self.ema_200.update(bar.close);
        let sma_mid = self.sma_mid.update(bar.close);
        let sma_long = self.sma_long.update(bar.close);

        let bands = self.bollinger.update(bar.close).map(|(mean, sd)| {
            let upper = mean + BB_STDDEV * sd;
            let lower = mean - BB_STDDEV * sd;
            (upper, mean, lower, band_width(upper, lower, mean))
        });
        let width_median = bands.and_then(|(_, _, _, width)| self.bb_width_median.update(width));

        let macd = match (self.macd_fast.update(bar.close), self.macd_slow.update(bar.close)) {
            (Some(fast), Some(slow)) => {
                let line = fast - slow;
                self.macd_signal.update(line).map(|signal| (line, signal))
            }
            _ => None,
        };

        let volume = self.volume.update(bar.volume);
        let levels = self.levels.update(bar.low, bar.high);

        if self.bars_seen < WARMUP_BARS {
            return Err(self.insufficient());
        }

        let (
            Some(atr),
            Some(rsi),
            Some(adx),
            Some(ema_fast),
            Some(ema_slow),
            Some(ema_50),
            Some(ema_200),
            Some(sma_mid),
            Some(sma_long),
            Some((bb_upper, bb_middle, bb_lower, bb_width)),
            Some(bb_width_median),
            Some((macd_line, macd_signal)),
            Some((volume_mean, volume_stddev)),
            Some((support, resistance)),
        ) = (
            atr,
            rsi,
            adx,
            ema_fast,
            ema_slow,
            ema_50,
            ema_200,
            sma_mid,
            sma_long,
            bands,
            width_median,
            macd,
            volume,
            levels,
        )
        else {
            return Err(self.insufficient());
        };

        let set = IndicatorSet {
            symbol: self.symbol.clone(),
            timestamp: bar.timestamp,
            close: bar.close,
            high: bar.high,
            low: bar.low,
            volume: bar.volume,
            adx: adx.adx,
            plus_di: adx.plus_di,
            minus_di: adx.minus_di,
            atr,
            rsi,
            ema_fast,
            ema_slow,
            ema_50,
            ema_200,
            sma_mid,
            sma_long,
            bb_upper,
            bb_middle,
            bb_lower,
            bb_width,
            bb_width_median,
            bb_percent_b: percent_b(bar.close, bb_upper, bb_lower),
            macd_line,
            macd_signal,
            macd_histogram: macd_line - macd_signal,
            volume_mean,
            volume_stddev,
            support,
            resistance,
        };

        debug!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            adx = set.adx,
            atr = set.atr,
            rsi = set.rsi,
            "Indicators updated"
        );

        self.latest = Some(set.clone());
        Ok(set)
    }

    fn insufficient(&self) -> Error {
        Error::InsufficientHistory {
            symbol: self.symbol.clone(),
            have: self.bars_seen,
            need: WARMUP_BARS,
        }
    }
}

/// RSI from Wilder-averaged gains and losses. A flat window reads neutral.
pub fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

pub fn band_width(upper: f64, lower: f64, middle: f64) -> f64 {
    if middle != 0.0 {
        (upper - lower) / middle
    } else {
        0.0
    }
}

pub fn percent_b(close: f64, upper: f64, lower: f64) -> f64 {
    let span = upper - lower;
    if span > 0.0 {
        (close - lower) / span
    } else {
        0.5
    }
}
