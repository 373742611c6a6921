//! Strategy signal types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{IndicatorSet, OrderSide};

/// Strategy that produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    TrendFollowing,
    MeanReversion,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::TrendFollowing => "trend_following",
            StrategyType::MeanReversion => "mean_reversion",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Buy,
    Sell,
    Hold,
}

impl SignalSide {
    /// Order side for an actionable signal; `Hold` has none.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            SignalSide::Buy => Some(OrderSide::Buy),
            SignalSide::Sell => Some(OrderSide::Sell),
            SignalSide::Hold => None,
        }
    }
}

/// Stop and take-profit levels attached to a signal at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitPlan {
    pub stop_loss: Decimal,
    /// First target; `partial_close_fraction` of the position closes here.
    pub take_profit_1: Decimal,
    /// Final target.
    pub take_profit_2: Decimal,
    /// Trailing distance applied after the first target.
    pub trailing_distance: Option<Decimal>,
    pub partial_close_fraction: Decimal,
    /// Mean-reversion target (middle band) when set.
    pub target_price: Option<Decimal>,
    /// RSI band whose re-entry closes a mean-reversion trade.
    pub rsi_exit_band: Option<(f64, f64)>,
}

impl ExitPlan {
    /// Distance from entry to the stop.
    pub fn stop_distance(&self, entry: Decimal) -> Decimal {
        (entry - self.stop_loss).abs()
    }

    /// Distance from entry to the first take-profit.
    pub fn first_target_distance(&self, entry: Decimal) -> Decimal {
        (self.take_profit_1 - entry).abs()
    }
}

/// A directional signal produced by exactly one strategy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub strategy_type: StrategyType,
    pub side: SignalSide,
    /// 0..=100.
    pub confidence: f64,
    pub price: Decimal,
    pub indicators: IndicatorSet,
    pub exit_plan: Option<ExitPlan>,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn is_actionable(&self) -> bool {
        self.side != SignalSide::Hold && self.exit_plan.is_some()
    }

    /// Stop distance in price units, if the signal carries an exit plan.
    pub fn stop_distance(&self) -> Option<Decimal> {
        self.exit_plan.as_ref().map(|p| p.stop_distance(self.price))
    }
}
