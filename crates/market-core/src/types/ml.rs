//! Learned-score gate types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inputs handed to the external scoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub is_trending: bool,
    pub is_ranging: bool,
    pub is_high_volatility: bool,
    pub rsi: f64,
    pub macd_histogram_delta: f64,
    pub bb_percent_b: f64,
    pub atr_pct: f64,
    pub volume_zscore: f64,
    /// (EMA fast - EMA slow) / price.
    pub ema_distance: f64,
    /// (bid depth - ask depth) / (bid depth + ask depth), in -1..=1.
    pub orderbook_imbalance: f64,
}

impl FeatureVector {
    /// Flattened representation in a fixed column order.
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            bool_flag(self.is_trending),
            bool_flag(self.is_ranging),
            bool_flag(self.is_high_volatility),
            self.rsi,
            self.macd_histogram_delta,
            self.bb_percent_b,
            self.atr_pct,
            self.volume_zscore,
            self.ema_distance,
            self.orderbook_imbalance,
        ]
    }
}

fn bool_flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Probability and expected reward returned by the scoring collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    /// 0..=1.
    pub probability: f64,
    /// Expected reward in multiples of the stop distance.
    pub expected_r: f64,
}

/// Gate outcome for one candidate signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlDecision {
    pub signal_ref: Uuid,
    pub probability: f64,
    pub expected_r: f64,
    pub executed: bool,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}
