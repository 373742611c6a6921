//! Whole-history indicator functions.
//!
//! These recompute from a slice and are used for backfills and to check the
//! streaming engine. Every series is aligned with its input: index `i` holds the
//! value after input `i`, `None` while the window is cold.

use market_core::types::{IndicatorSet, MarketBar};
use market_core::{Error, Result};

use super::adx::{di_and_dx, directional_movement, AdxValue};
use super::rolling::median;
use super::*;

pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                None
            } else {
                let window = &values[i + 1 - period..=i];
                Some(window.iter().sum::<f64>() / period as f64)
            }
        })
        .collect()
}

/// EMA seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for i in period..values.len() {
        prev = values[i] * k + prev * (1.0 - k);
        out[i] = Some(prev);
    }
    out
}

/// Wilder smoothing seeded with the mean of the first `period` values.
pub fn wilder(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let n = period as f64;
    let mut prev = values[..period].iter().sum::<f64>() / n;
    out[period - 1] = Some(prev);
    for i in period..values.len() {
        prev = (prev * (n - 1.0) + values[i]) / n;
        out[i] = Some(prev);
    }
    out
}

/// Rolling (mean, population stddev).
pub fn mean_stddev(values: &[f64], period: usize) -> Vec<Option<(f64, f64)>> {
    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let window = &values[i + 1 - period..=i];
            let n = period as f64;
            let mean = window.iter().sum::<f64>() / n;
            let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
            Some((mean, variance.sqrt()))
        })
        .collect()
}

pub fn true_ranges(bars: &[MarketBar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| bar.true_range(i.checked_sub(1).map(|p| bars[p].close)))
        .collect()
}

pub fn atr(bars: &[MarketBar], period: usize) -> Vec<Option<f64>> {
    wilder(&true_ranges(bars), period)
}

pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = changes.iter().map(|c| c.max(0.0)).collect();
    let losses: Vec<f64> = changes.iter().map(|c| (-c).max(0.0)).collect();
    let avg_gain = wilder(&gains, period);
    let avg_loss = wilder(&losses, period);

    let mut out = vec![None; closes.len()];
    for j in 0..changes.len() {
        if let (Some(g), Some(l)) = (avg_gain[j], avg_loss[j]) {
            out[j + 1] = Some(rsi_from_averages(g, l));
        }
    }
    out
}

pub fn adx(bars: &[MarketBar], period: usize) -> Vec<Option<AdxValue>> {
    let mut out = vec![None; bars.len()];
    if bars.len() < 2 {
        return out;
    }

    let mut trs = Vec::with_capacity(bars.len() - 1);
    let mut plus = Vec::with_capacity(bars.len() - 1);
    let mut minus = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let (prev, bar) = (&w[0], &w[1]);
        let (p, m) = directional_movement(bar.high, bar.low, prev.high, prev.low);
        trs.push(bar.true_range(Some(prev.close)));
        plus.push(p);
        minus.push(m);
    }

    let tr_avg = wilder(&trs, period);
    let plus_avg = wilder(&plus, period);
    let minus_avg = wilder(&minus, period);

    // (move index, +DI, -DI, DX)
    let mut dis = Vec::new();
    for j in 0..trs.len() {
        if let (Some(t), Some(p), Some(m)) = (tr_avg[j], plus_avg[j], minus_avg[j]) {
            let (pdi, mdi, dx) = di_and_dx(t, p, m);
            dis.push((j, pdi, mdi, dx));
        }
    }

    let dx_values: Vec<f64> = dis.iter().map(|d| d.3).collect();
    let smoothed = wilder(&dx_values, period);
    for (k, value) in smoothed.into_iter().enumerate() {
        if let Some(adx) = value {
            let (j, plus_di, minus_di, _) = dis[k];
            out[j + 1] = Some(AdxValue {
                adx,
                plus_di,
                minus_di,
            });
        }
    }
    out
}

/// MACD line and signal line.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<Option<(f64, f64)>> {
    let fast = ema(closes, fast);
    let slow = ema(closes, slow);

    let mut idx = Vec::new();
    let mut lines = Vec::new();
    for i in 0..closes.len() {
        if let (Some(f), Some(s)) = (fast[i], slow[i]) {
            idx.push(i);
            lines.push(f - s);
        }
    }

    let signals = ema(&lines, signal);
    let mut out = vec![None; closes.len()];
    for (k, sig) in signals.into_iter().enumerate() {
        if let Some(sig) = sig {
            out[idx[k]] = Some((lines[k], sig));
        }
    }
    out
}

/// Indicator set for the last bar of `bars`, computed from scratch.
pub fn compute_latest(symbol: &str, bars: &[MarketBar]) -> Result<IndicatorSet> {
    if bars.len() < WARMUP_BARS {
        return Err(Error::InsufficientHistory {
            symbol: symbol.to_string(),
            have: bars.len(),
            need: WARMUP_BARS,
        });
    }
    if bars.windows(2).any(|w| w[1].timestamp <= w[0].timestamp) {
        return Err(Error::InvalidInputs(format!("bars for {} are not strictly ordered", symbol)));
    }
    if bars.iter().any(|b| b.symbol != symbol) {
        return Err(Error::InvalidInputs(format!("mixed symbols in history for {}", symbol)));
    }

    let last = bars.len() - 1;
    let bar = &bars[last];
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let missing = |what: &str| Error::InvalidInputs(format!("{} unavailable for {}", what, symbol));

    let adx = adx(bars, ADX_PERIOD)[last].ok_or_else(|| missing("adx"))?;
    let atr = atr(bars, ATR_PERIOD)[last].ok_or_else(|| missing("atr"))?;
    let rsi = rsi(&closes, RSI_PERIOD)[last].ok_or_else(|| missing("rsi"))?;
    let ema_fast = ema(&closes, EMA_FAST)[last].ok_or_else(|| missing("ema_fast"))?;
    let ema_slow = ema(&closes, EMA_SLOW)[last].ok_or_else(|| missing("ema_slow"))?;
    let ema_50 = ema(&closes, EMA_REGIME_FAST)[last].ok_or_else(|| missing("ema_50"))?;
    let ema_200 = ema(&closes, EMA_REGIME_SLOW)[last].ok_or_else(|| missing("ema_200"))?;
    let sma_mid = sma(&closes, SMA_MID)[last].ok_or_else(|| missing("sma_mid"))?;
    let sma_long = sma(&closes, SMA_LONG)[last].ok_or_else(|| missing("sma_long"))?;

    let widths: Vec<f64> = mean_stddev(&closes, BB_PERIOD)
        .into_iter()
        .flatten()
        .map(|(mean, sd)| band_width(mean + BB_STDDEV * sd, mean - BB_STDDEV * sd, mean))
        .collect();
    if widths.len() < BB_WIDTH_MEDIAN {
        return Err(missing("bb_width_median"));
    }
    let mut recent = widths[widths.len() - BB_WIDTH_MEDIAN..].to_vec();
    let bb_width_median = median(&mut recent);

    let (bb_middle, sd) = mean_stddev(&closes[closes.len() - BB_PERIOD..], BB_PERIOD)[BB_PERIOD - 1]
        .ok_or_else(|| missing("bollinger"))?;
    let bb_upper = bb_middle + BB_STDDEV * sd;
    let bb_lower = bb_middle - BB_STDDEV * sd;

    let (macd_line, macd_signal) =
        macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL)[last].ok_or_else(|| missing("macd"))?;

    let (volume_mean, volume_stddev) = mean_stddev(&volumes[volumes.len() - VOLUME_PERIOD..], VOLUME_PERIOD)
        [VOLUME_PERIOD - 1]
        .ok_or_else(|| missing("volume"))?;

    let level_window = &bars[bars.len() - LEVEL_PERIOD..];
    let support = level_window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let resistance = level_window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);

    Ok(IndicatorSet {
        symbol: symbol.to_string(),
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
        bb_width: band_width(bb_upper, bb_lower, bb_middle),
        bb_width_median,
        bb_percent_b: percent_b(bar.close, bb_upper, bb_lower),
        macd_line,
        macd_signal,
        macd_histogram: macd_line - macd_signal,
        volume_mean,
        volume_stddev,
        support,
        resistance,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::synthetic_bars;
    use super::*;

    #[test]
    fn test_series_alignment() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 3), vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(ema(&values, 3)[2], Some(2.0));
        assert_eq!(ema(&values, 3)[3], Some(3.0));
        assert_eq!(wilder(&values, 5)[4], Some(3.0));
    }

    #[test]
    fn test_rsi_monotonic_rise_is_100() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&closes, 14);
        assert_eq!(out[13], None);
        assert_eq!(out[14], Some(100.0));
    }

    #[test]
    fn test_flat_prices_give_neutral_rsi_and_centered_percent_b() {
        let mut bars = synthetic_bars("FLAT", WARMUP_BARS, 0.0);
        for bar in &mut bars {
            bar.open = 100.0;
            bar.high = 100.0;
            bar.low = 100.0;
            bar.close = 100.0;
            bar.volume = 10.0;
        }
        let set = compute_latest("FLAT", &bars).unwrap();
        assert_eq!(set.rsi, 50.0);
        assert_eq!(set.bb_percent_b, 0.5);
        assert_eq!(set.atr, 0.0);
        assert_eq!(set.adx, 0.0);
    }

    #[test]
    fn test_compute_latest_requires_warmup() {
        let bars = synthetic_bars("BTCUSDT", WARMUP_BARS - 1, 0.1);
        assert!(matches!(
            compute_latest("BTCUSDT", &bars),
            Err(Error::InsufficientHistory { have, .. }) if have == WARMUP_BARS - 1
        ));
    }

    #[test]
    fn test_compute_latest_rejects_unordered_history() {
        let mut bars = synthetic_bars("BTCUSDT", WARMUP_BARS, 0.1);
        bars.swap(10, 11);
        assert!(matches!(compute_latest("BTCUSDT", &bars), Err(Error::InvalidInputs(_))));
    }
}
