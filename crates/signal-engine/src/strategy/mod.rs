//! Strategy engines and the open-signal book.

pub mod mean_reversion;
pub mod trend_following;

use std::collections::HashMap;

use market_core::config::StrategySettings;
use market_core::types::{ExitPlan, IndicatorSet, Regime, Signal, SignalSide, StrategyType};
use market_core::{Error, Result};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use mean_reversion::MeanReversionEngine;
pub use trend_following::TrendFollowingEngine;

/// Raw entry detected by an engine, before regime weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub side: SignalSide,
    /// 0-100 before any regime penalty.
    pub confidence: f64,
    pub exit_plan: ExitPlan,
}

/// A directional strategy fed one `IndicatorSet` per completed bar.
pub trait SignalEngine: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    /// Regime in which this engine is primary.
    fn primary_regime(&self) -> Regime;

    /// Inspect the latest bar for an entry. Engines keep whatever per-symbol
    /// history they need, so every completed bar must be passed in order.
    fn detect(&mut self, set: &IndicatorSet) -> Option<Candidate>;
}

/// Open signals keyed by (strategy, symbol).
#[derive(Debug, Default)]
pub struct SignalBook {
    open: HashMap<(StrategyType, String), Uuid>,
}

impl SignalBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `signal` as open. Fails if its engine already has one open for
    /// the symbol.
    pub fn open(&mut self, signal: &Signal) -> Result<()> {
        let key = (signal.strategy_type, signal.symbol.clone());
        if self.open.contains_key(&key) {
            return Err(Error::DuplicateSignal {
                symbol: signal.symbol.clone(),
                strategy: signal.strategy_type.to_string(),
            });
        }
        self.open.insert(key, signal.id);
        Ok(())
    }

    /// Mark a signal resolved. Returns false if it was not open.
    pub fn resolve(&mut self, signal_id: Uuid) -> bool {
        let before = self.open.len();
        self.open.retain(|_, id| *id != signal_id);
        before != self.open.len()
    }

    pub fn is_open(&self, strategy: StrategyType, symbol: &str) -> bool {
        self.open.contains_key(&(strategy, symbol.to_string()))
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

/// Runs the enabled engines for each bar and applies regime weighting and
/// duplicate detection.
pub struct SignalGenerator {
    engines: Vec<Box<dyn SignalEngine>>,
    book: SignalBook,
    regime_mismatch_penalty: f64,
}

impl SignalGenerator {
    pub fn new(settings: &StrategySettings) -> Self {
        let mut engines: Vec<Box<dyn SignalEngine>> = Vec::new();
        if settings.trend_enabled {
            engines.push(Box::new(TrendFollowingEngine::new(settings.clone())));
        }
        if settings.mean_reversion_enabled {
            engines.push(Box::new(MeanReversionEngine::new(settings.clone())));
        }
        Self::with_engines(engines, settings.regime_mismatch_penalty)
    }

    pub fn with_engines(engines: Vec<Box<dyn SignalEngine>>, regime_mismatch_penalty: f64) -> Self {
        Self {
            engines,
            book: SignalBook::new(),
            regime_mismatch_penalty,
        }
    }

    /// Evaluate every engine against `set`.
    ///
    /// `regime` is the trend regime honored for execution. Signals from the
    /// engine that does not match it are kept with reduced confidence.
    /// Duplicates come back as `Err(DuplicateSignal)`.
    pub fn evaluate(&mut self, set: &IndicatorSet, regime: Regime) -> Vec<Result<Signal>> {
        let mut out = Vec::new();
        for engine in self.engines.iter_mut() {
            let Some(candidate) = engine.detect(set) else {
                continue;
            };

            let strategy_type = engine.strategy_type();
            let confidence = if engine.primary_regime() == regime {
                candidate.confidence
            } else {
                candidate.confidence * self.regime_mismatch_penalty
            };

            let Some(price) = to_price(set.close) else {
                warn!(symbol = %set.symbol, close = set.close, "Unrepresentable close price");
                continue;
            };

            let signal = Signal {
                id: Uuid::new_v4(),
                symbol: set.symbol.clone(),
                strategy_type,
                side: candidate.side,
                confidence: confidence.clamp(0.0, 100.0),
                price,
                indicators: set.clone(),
                exit_plan: Some(candidate.exit_plan),
                timestamp: set.timestamp,
            };

            match self.book.open(&signal) {
                Ok(()) => {
                    info!(
                        signal_id = %signal.id,
                        symbol = %signal.symbol,
                        strategy = %strategy_type,
                        side = ?signal.side,
                        confidence = signal.confidence,
                        "Signal generated"
                    );
                    out.push(Ok(signal));
                }
                Err(e) => {
                    debug!(symbol = %set.symbol, strategy = %strategy_type, "Duplicate signal ignored");
                    out.push(Err(e));
                }
            }
        }
        out
    }

    /// Advance engine state for a bar without emitting signals, e.g. while
    /// replaying history.
    pub fn prime(&mut self, set: &IndicatorSet) {
        for engine in self.engines.iter_mut() {
            let _ = engine.detect(set);
        }
    }

    pub fn resolve(&mut self, signal_id: Uuid) -> bool {
        self.book.resolve(signal_id)
    }

    pub fn book(&self) -> &SignalBook {
        &self.book
    }
}

/// f64 price to an 8-decimal `Decimal`.
pub(crate) fn to_price(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64_retain(value).map(|d| d.round_dp(8))
}

/// Build an exit plan from ATR multiples around `entry`.
pub(crate) fn atr_exit_plan(
    side: SignalSide,
    entry: f64,
    atr: f64,
    settings: &StrategySettings,
) -> Option<ExitPlan> {
    let dir = match side {
        SignalSide::Buy => 1.0,
        SignalSide::Sell => -1.0,
        SignalSide::Hold => return None,
    };
    if atr <= 0.0 {
        return None;
    }
    Some(ExitPlan {
        stop_loss: to_price(entry - dir * settings.stop_atr_multiple * atr)?,
        take_profit_1: to_price(entry + dir * settings.first_target_atr_multiple * atr)?,
        take_profit_2: to_price(entry + dir * settings.final_target_atr_multiple * atr)?,
        trailing_distance: to_price(settings.trailing_atr_multiple * atr),
        partial_close_fraction: to_price(settings.partial_close_fraction)?,
        target_price: None,
        rsi_exit_band: None,
    })
}
