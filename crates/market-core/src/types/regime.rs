//! Market regime types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified market state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Trending,
    Ranging,
    HighVolatility,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Trending => "trending",
            Regime::Ranging => "ranging",
            Regime::HighVolatility => "high_volatility",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current regime of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub symbol: String,
    /// Reported label; `HighVolatility` overrides the trend state.
    pub regime: Regime,
    /// Trend state underneath a volatility overlay (`Trending` or `Ranging`).
    pub base_regime: Regime,
    /// 0..=100.
    pub confidence: f64,
    /// ATR / price.
    pub volatility: f64,
    /// ADX.
    pub trend_strength: f64,
    pub timestamp: DateTime<Utc>,
}

impl RegimeState {
    pub fn is_high_volatility(&self) -> bool {
        self.regime == Regime::HighVolatility
    }
}

/// Emitted when the reported label differs from the previous evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeChange {
    pub symbol: String,
    pub from: Option<Regime>,
    pub to: Regime,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}
