//! Order sizing for accepted signals.

use chrono::{DateTime, Datelike, Utc, Weekday};
use market_core::types::{RiskSettings, SizingMethod, SizingResult};
use market_core::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Historical trade statistics for Kelly sizing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    /// 0..=1.
    pub win_rate: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
}

/// Everything one sizing decision depends on, snapshotted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingRequest {
    pub symbol: String,
    pub capital: Decimal,
    pub price: Decimal,
    pub stop_distance: Decimal,
    /// ATR / price, required for `volatility_adjusted`.
    pub atr_pct: Option<Decimal>,
    /// Required for `kelly`.
    pub trade_stats: Option<TradeStats>,
    /// Signal confidence, 0..=100.
    pub confidence: f64,
    pub high_volatility: bool,
    pub low_liquidity: bool,
    /// Portfolio risk budget left, for `risk_parity`.
    pub remaining_risk_budget: Decimal,
    /// Notional left before the symbol exposure ceiling.
    pub remaining_symbol_budget: Decimal,
    pub breaker_epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizerConfig {
    pub high_volatility_factor: Decimal,
    pub low_liquidity_factor: Decimal,
    /// Target ATR% for volatility-adjusted sizing.
    pub target_volatility: Decimal,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            high_volatility_factor: Decimal::new(5, 1),
            low_liquidity_factor: Decimal::new(5, 1),
            target_volatility: Decimal::new(1, 2),
        }
    }
}

/// Weekend sessions are treated as low liquidity.
pub fn is_low_liquidity(at: DateTime<Utc>) -> bool {
    matches!(at.weekday(), Weekday::Sat | Weekday::Sun)
}

#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: SizerConfig,
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizerConfig {
        &self.config
    }

    /// Size an order with the configured method, adjusted and clamped.
    pub fn calculate(
        &self,
        settings: &RiskSettings,
        request: &SizingRequest,
        now: DateTime<Utc>,
    ) -> Result<SizingResult> {
        validate_common(settings, request)?;

        let method = settings.position_sizing_method;
        let computed = match method {
            SizingMethod::FixedPercentage => {
                fixed_percentage(request.capital, settings.risk_per_trade, request.stop_distance)
            }
            SizingMethod::Kelly => {
                let stats = request.trade_stats.ok_or_else(|| {
                    Error::InvalidInputs("kelly sizing requires trade statistics".to_string())
                })?;
                kelly(request.capital, &stats, settings.risk_per_trade, request.stop_distance)?
            }
            SizingMethod::VolatilityAdjusted => {
                let atr_pct = request.atr_pct.unwrap_or(Decimal::ZERO);
                if atr_pct <= Decimal::ZERO {
                    return Err(Error::InvalidInputs(format!(
                        "volatility sizing requires a positive ATR%, got {}",
                        atr_pct
                    )));
                }
                fixed_percentage(request.capital, settings.risk_per_trade, request.stop_distance)
                    * (self.config.target_volatility / atr_pct)
            }
            SizingMethod::RiskParity => {
                let per_slot = request.capital * settings.max_portfolio_risk
                    / Decimal::from(settings.max_positions);
                let risk_amount = per_slot.min(request.remaining_risk_budget.max(Decimal::ZERO));
                risk_amount / request.stop_distance
            }
        };

        let mut adjusted = computed;
        if request.high_volatility {
            adjusted *= self.config.high_volatility_factor;
        }
        if request.low_liquidity {
            adjusted *= self.config.low_liquidity_factor;
        }

        let max_size = settings.max_position_size * request.capital / request.price;
        let budget_size = request.remaining_symbol_budget.max(Decimal::ZERO) / request.price;
        let recommended = adjusted
            .min(max_size)
            .min(budget_size)
            .max(Decimal::ZERO)
            .round_dp(8);

        let risk_score =
            (recommended * request.stop_distance / request.capital * Decimal::ONE_HUNDRED).round_dp(4);
        let confidence_level = Decimal::from_f64_retain(request.confidence.clamp(0.0, 100.0))
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);

        debug!(
            symbol = %request.symbol,
            method = method.as_str(),
            computed = %computed,
            recommended = %recommended,
            max_size = %max_size,
            "Position sized"
        );

        Ok(SizingResult {
            symbol: request.symbol.clone(),
            method,
            recommended_size: recommended,
            max_size: max_size.round_dp(8),
            risk_score,
            confidence_level,
            computed_at: now,
            breaker_epoch: request.breaker_epoch,
        })
    }
}

fn validate_common(settings: &RiskSettings, request: &SizingRequest) -> Result<()> {
    let checks = [
        ("capital", request.capital),
        ("price", request.price),
        ("stop_distance", request.stop_distance),
        ("risk_per_trade", settings.risk_per_trade),
    ];
    for (name, value) in checks {
        if value <= Decimal::ZERO {
            return Err(Error::InvalidInputs(format!("{} must be positive, got {}", name, value)));
        }
    }
    Ok(())
}

/// capital × risk_per_trade / stop_distance.
pub fn fixed_percentage(capital: Decimal, risk_per_trade: Decimal, stop_distance: Decimal) -> Decimal {
    capital * risk_per_trade / stop_distance
}

/// Raw Kelly fraction: w − (1 − w) / (avg_win / avg_loss).
pub fn kelly_fraction(stats: &TradeStats) -> Result<Decimal> {
    if stats.win_rate <= Decimal::ZERO || stats.win_rate > Decimal::ONE {
        return Err(Error::InvalidInputs(format!(
            "win_rate must be in (0, 1], got {}",
            stats.win_rate
        )));
    }
    if stats.avg_win <= Decimal::ZERO || stats.avg_loss <= Decimal::ZERO {
        return Err(Error::InvalidInputs(format!(
            "avg_win and avg_loss must be positive, got {} / {}",
            stats.avg_win, stats.avg_loss
        )));
    }
    let payoff = stats.avg_win / stats.avg_loss;
    Ok(stats.win_rate - (Decimal::ONE - stats.win_rate) / payoff)
}

/// capital × clamp(f, 0, cap) / stop_distance.
pub fn kelly(capital: Decimal, stats: &TradeStats, cap: Decimal, stop_distance: Decimal) -> Result<Decimal> {
    let f = kelly_fraction(stats)?.max(Decimal::ZERO).min(cap);
    Ok(capital * f / stop_distance)
}
