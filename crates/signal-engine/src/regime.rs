//! Market regime classification.
//!
//! [`RegimeClassifier`] is a pure function of one `IndicatorSet`.
//! [`RegimeTracker`] keeps the per-symbol current state, emits change events and
//! applies the dwell-time debounce used for execution decisions. The debounce
//! runs on the base regime; the high-volatility overlay applies immediately.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use market_core::types::{IndicatorSet, Regime, RegimeChange, RegimeState};
use tracing::{debug, info};

/// ADX at or above which a market may be trending.
pub const ADX_TREND_THRESHOLD: f64 = 20.0;
/// |EMA50 - EMA200| / price required for trending.
pub const EMA_GAP_THRESHOLD: f64 = 0.005;
/// ATR / price at or above which the high-volatility overlay applies.
pub const ATR_PCT_THRESHOLD: f64 = 0.02;

const BASE_CONFIDENCE: f64 = 50.0;
const MAX_CONFIDENCE: f64 = 100.0;
const AUDIT_HISTORY: usize = 500;

/// Thresholds for the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeClassifier {
    pub adx_threshold: f64,
    pub ema_gap_threshold: f64,
    pub atr_pct_threshold: f64,
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self {
            adx_threshold: ADX_TREND_THRESHOLD,
            ema_gap_threshold: EMA_GAP_THRESHOLD,
            atr_pct_threshold: ATR_PCT_THRESHOLD,
        }
    }
}

impl RegimeClassifier {
    /// Label the bar behind `set`.
    ///
    /// The same input always yields the same state.
    pub fn classify(&self, set: &IndicatorSet) -> RegimeState {
        let adx_past = excess_ratio(set.adx, self.adx_threshold);
        let gap_past = excess_ratio(set.ema_gap_pct(), self.ema_gap_threshold);
        let adx_below = shortfall_ratio(set.adx, self.adx_threshold);
        let width_below = shortfall_ratio(set.bb_width, set.bb_width_median);

        let trending = set.adx >= self.adx_threshold && set.ema_gap_pct() >= self.ema_gap_threshold;
        let ranging = set.adx < self.adx_threshold && set.bb_width < set.bb_width_median;

        let (base_regime, base_confidence) = if trending {
            (Regime::Trending, linear_confidence(&[adx_past, gap_past]))
        } else if ranging {
            (Regime::Ranging, linear_confidence(&[adx_below, width_below]))
        } else if set.adx >= self.adx_threshold {
            (Regime::Trending, linear_confidence(&[adx_past]) / 2.0)
        } else {
            (Regime::Ranging, linear_confidence(&[adx_below]) / 2.0)
        };

        let atr_pct = set.atr_pct();
        let (regime, confidence) = if atr_pct >= self.atr_pct_threshold {
            let vol_past = excess_ratio(atr_pct, self.atr_pct_threshold);
            (Regime::HighVolatility, linear_confidence(&[vol_past]))
        } else {
            (base_regime, base_confidence)
        };

        RegimeState {
            symbol: set.symbol.clone(),
            regime,
            base_regime,
            confidence,
            volatility: atr_pct,
            trend_strength: set.adx,
            timestamp: set.timestamp,
        }
    }
}

/// How far `value` is past `threshold`, relative to the threshold.
fn excess_ratio(value: f64, threshold: f64) -> f64 {
    if threshold > 0.0 {
        ((value - threshold) / threshold).max(0.0)
    } else {
        0.0
    }
}

/// How far `value` is below `threshold`, relative to the threshold.
fn shortfall_ratio(value: f64, threshold: f64) -> f64 {
    if threshold > 0.0 {
        ((threshold - value) / threshold).max(0.0)
    } else {
        0.0
    }
}

/// 50 at the threshold, rising linearly with the mean excess, capped at 100.
fn linear_confidence(ratios: &[f64]) -> f64 {
    if ratios.is_empty() {
        return BASE_CONFIDENCE;
    }
    let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
    (BASE_CONFIDENCE + BASE_CONFIDENCE * mean).min(MAX_CONFIDENCE)
}

#[derive(Debug, Clone)]
struct SymbolRegime {
    current: RegimeState,
    /// Debounced base regime; never `HighVolatility`.
    confirmed: Regime,
    candidate: Option<(Regime, DateTime<Utc>)>,
}

/// Per-symbol regime state with change events and a dwell-time debounce.
#[derive(Debug)]
pub struct RegimeTracker {
    min_dwell: Duration,
    symbols: HashMap<String, SymbolRegime>,
    history: VecDeque<RegimeChange>,
}

impl RegimeTracker {
    pub fn new(min_dwell: Duration) -> Self {
        Self {
            min_dwell,
            symbols: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    /// Record a new classification.
    ///
    /// Returns a `RegimeChange` when the label differs from the previous
    /// evaluation for the symbol (including the first one).
    pub fn observe(&mut self, state: RegimeState) -> Option<RegimeChange> {
        let now = state.timestamp;
        let symbol = state.symbol.clone();

        let change = match self.symbols.get_mut(&symbol) {
            None => {
                self.symbols.insert(
                    symbol.clone(),
                    SymbolRegime {
                        confirmed: state.base_regime,
                        candidate: None,
                        current: state.clone(),
                    },
                );
                Some(RegimeChange {
                    symbol: symbol.clone(),
                    from: None,
                    to: state.regime,
                    confidence: state.confidence,
                    timestamp: now,
                })
            }
            Some(entry) => {
                let previous = entry.current.regime;
                let label = state.regime;
                let base = state.base_regime;
                entry.current = state.clone();

                if base == entry.confirmed {
                    entry.candidate = None;
                } else {
                    let since = match entry.candidate {
                        Some((pending, since)) if pending == base => since,
                        _ => now,
                    };
                    if now - since >= self.min_dwell {
                        info!(
                            symbol = %symbol,
                            from = %entry.confirmed,
                            to = %base,
                            "Regime flip confirmed after dwell"
                        );
                        entry.confirmed = base;
                        entry.candidate = None;
                    } else {
                        entry.candidate = Some((base, since));
                    }
                }

                (previous != label).then(|| RegimeChange {
                    symbol: symbol.clone(),
                    from: Some(previous),
                    to: label,
                    confidence: state.confidence,
                    timestamp: now,
                })
            }
        };

        match &change {
            Some(c) => {
                info!(
                    symbol = %c.symbol,
                    from = ?c.from,
                    to = %c.to,
                    confidence = c.confidence,
                    "Regime changed"
                );
                if self.history.len() == AUDIT_HISTORY {
                    self.history.pop_front();
                }
                self.history.push_back(c.clone());
            }
            None => debug!(symbol = %symbol, regime = %state.regime, "Regime unchanged"),
        }

        change
    }

    /// Latest classification for `symbol`.
    pub fn current(&self, symbol: &str) -> Option<&RegimeState> {
        self.symbols.get(symbol).map(|s| &s.current)
    }

    /// Base regime honored for execution. A trending/ranging flip only counts
    /// once it has held for the minimum dwell time, whether or not the
    /// high-volatility overlay is on meanwhile.
    pub fn execution_regime(&self, symbol: &str) -> Option<Regime> {
        self.symbols.get(symbol).map(|s| s.confirmed)
    }

    /// Recent change events, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &RegimeChange> {
        self.history.iter()
    }
}
