//! Risk configuration, limit status and audit event types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Position sizing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    FixedPercentage,
    Kelly,
    VolatilityAdjusted,
    RiskParity,
}

impl SizingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingMethod::FixedPercentage => "fixed_percentage",
            SizingMethod::Kelly => "kelly",
            SizingMethod::VolatilityAdjusted => "volatility_adjusted",
            SizingMethod::RiskParity => "risk_parity",
        }
    }
}

/// Active risk configuration for one account.
///
/// `max_daily_loss` is an absolute currency amount. The remaining limits and
/// `circuit_breaker_threshold` are fractions (0.10 = 10%) of capital or equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSettings {
    pub max_daily_loss: Decimal,
    pub max_position_size: Decimal,
    pub max_portfolio_risk: Decimal,
    pub max_symbol_exposure: Decimal,
    pub max_correlation_exposure: Decimal,
    pub circuit_breaker_enabled: bool,
    /// Equity drawdown from the reference high that triggers an emergency stop.
    pub circuit_breaker_threshold: Decimal,
    pub position_sizing_method: SizingMethod,
    pub max_positions: usize,
    pub risk_per_trade: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_daily_loss: Decimal::new(500, 0),          // $500
            max_position_size: Decimal::new(10, 2),        // 10% of capital
            max_portfolio_risk: Decimal::new(6, 2),        // 6% of capital at risk
            max_symbol_exposure: Decimal::new(20, 2),      // 20% per symbol
            max_correlation_exposure: Decimal::new(30, 2), // 30% per correlated group
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: Decimal::new(5, 2), // 5% drawdown
            position_sizing_method: SizingMethod::FixedPercentage,
            max_positions: 4,
            risk_per_trade: Decimal::new(1, 2), // 1%
        }
    }
}

impl RiskSettings {
    /// Check every field; an invalid configuration must never be applied partially.
    pub fn validate(&self) -> Result<()> {
        let fraction_fields = [
            ("max_position_size", self.max_position_size),
            ("max_portfolio_risk", self.max_portfolio_risk),
            ("max_symbol_exposure", self.max_symbol_exposure),
            ("max_correlation_exposure", self.max_correlation_exposure),
            ("circuit_breaker_threshold", self.circuit_breaker_threshold),
            ("risk_per_trade", self.risk_per_trade),
        ];

        for (name, value) in fraction_fields {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(Error::Config {
                    message: format!("{} must be in (0, 1], got {}", name, value),
                });
            }
        }

        if self.max_daily_loss <= Decimal::ZERO {
            return Err(Error::Config {
                message: format!("max_daily_loss must be positive, got {}", self.max_daily_loss),
            });
        }

        if self.max_positions == 0 {
            return Err(Error::Config {
                message: "max_positions must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Named risk limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    DailyLoss,
    PositionSize,
    PortfolioRisk,
    SymbolExposure,
    CorrelationExposure,
    PositionCount,
}

impl LimitType {
    /// Limits tracked continuously by the risk monitor.
    pub const MONITORED: [LimitType; 5] = [
        LimitType::DailyLoss,
        LimitType::PositionSize,
        LimitType::PortfolioRisk,
        LimitType::SymbolExposure,
        LimitType::CorrelationExposure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::DailyLoss => "daily_loss",
            LimitType::PositionSize => "position_size",
            LimitType::PortfolioRisk => "portfolio_risk",
            LimitType::SymbolExposure => "symbol_exposure",
            LimitType::CorrelationExposure => "correlation_exposure",
            LimitType::PositionCount => "position_count",
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Utilization band of a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStatus {
    Normal,
    Warning,
    Critical,
}

/// Utilization percentage above which a limit is `Warning`.
pub const WARNING_UTILIZATION: Decimal = Decimal::from_parts(75, 0, 0, false, 0);
/// Utilization percentage above which a limit is `Critical`.
pub const CRITICAL_UTILIZATION: Decimal = Decimal::from_parts(90, 0, 0, false, 0);

/// Snapshot of one limit against its ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimitStatus {
    pub limit_type: LimitType,
    pub current_value: Decimal,
    pub limit_value: Decimal,
    pub utilization_percentage: Decimal,
    pub status: LimitStatus,
}

impl RiskLimitStatus {
    pub fn evaluate(limit_type: LimitType, current_value: Decimal, limit_value: Decimal) -> Self {
        let utilization_percentage = if limit_value > Decimal::ZERO {
            (current_value / limit_value * Decimal::ONE_HUNDRED).round_dp(4)
        } else if current_value > Decimal::ZERO {
            Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        let status = if utilization_percentage > CRITICAL_UTILIZATION {
            LimitStatus::Critical
        } else if utilization_percentage > WARNING_UTILIZATION {
            LimitStatus::Warning
        } else {
            LimitStatus::Normal
        };

        Self {
            limit_type,
            current_value,
            limit_value,
            utilization_percentage,
            status,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.status == LimitStatus::Critical
    }
}

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskEventType {
    DailyLossLimit,
    LimitCritical,
    ManualEmergencyStop,
    MaxDrawdown,
    VolatilitySpike,
    CorrelationBreakdown,
    CircuitReset,
    PauseExpired,
    BreakerDisabled,
    BreakerEnabled,
    SettingsUpdated,
    OrderRejected,
    PositionsFlattened,
}

impl RiskEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskEventType::DailyLossLimit => "daily_loss_limit",
            RiskEventType::LimitCritical => "limit_critical",
            RiskEventType::ManualEmergencyStop => "manual_emergency_stop",
            RiskEventType::MaxDrawdown => "max_drawdown",
            RiskEventType::VolatilitySpike => "volatility_spike",
            RiskEventType::CorrelationBreakdown => "correlation_breakdown",
            RiskEventType::CircuitReset => "circuit_reset",
            RiskEventType::PauseExpired => "pause_expired",
            RiskEventType::BreakerDisabled => "breaker_disabled",
            RiskEventType::BreakerEnabled => "breaker_enabled",
            RiskEventType::SettingsUpdated => "settings_updated",
            RiskEventType::OrderRejected => "order_rejected",
            RiskEventType::PositionsFlattened => "positions_flattened",
        }
    }
}

impl fmt::Display for RiskEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Action taken in response to a risk event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    HaltTrading,
    PauseTrading,
    ClosePositions,
    ResumeTrading,
    RejectOrder,
    NotifyOperator,
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: Uuid,
    pub event_type: RiskEventType,
    pub severity: Severity,
    pub description: String,
    pub triggered_by: String,
    pub actions_taken: Vec<RiskAction>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RiskEvent {
    pub fn new(
        event_type: RiskEventType,
        severity: Severity,
        description: impl Into<String>,
        triggered_by: impl Into<String>,
        actions_taken: Vec<RiskAction>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            severity,
            description: description.into(),
            triggered_by: triggered_by.into(),
            actions_taken,
            created_at,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Output of the position sizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    pub symbol: String,
    pub method: SizingMethod,
    pub recommended_size: Decimal,
    /// Hard cap: max_position_size × capital / price.
    pub max_size: Decimal,
    /// Percent of capital at risk at the recommended size.
    pub risk_score: Decimal,
    pub confidence_level: Decimal,
    pub computed_at: DateTime<Utc>,
    /// Breaker epoch observed when sizing ran.
    pub breaker_epoch: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(RiskSettings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = RiskSettings {
            max_position_size: dec!(1.5),
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = RiskSettings {
            max_daily_loss: Decimal::ZERO,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = RiskSettings {
            max_positions: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_limit_status_bands() {
        let s = RiskLimitStatus::evaluate(LimitType::DailyLoss, dec!(75), dec!(100));
        assert_eq!(s.status, LimitStatus::Normal);

        let s = RiskLimitStatus::evaluate(LimitType::DailyLoss, dec!(76), dec!(100));
        assert_eq!(s.status, LimitStatus::Warning);

        let s = RiskLimitStatus::evaluate(LimitType::DailyLoss, dec!(90), dec!(100));
        assert_eq!(s.status, LimitStatus::Warning);

        let s = RiskLimitStatus::evaluate(LimitType::DailyLoss, dec!(90.01), dec!(100));
        assert_eq!(s.status, LimitStatus::Critical);
        assert_eq!(s.utilization_percentage, dec!(90.01));
    }

    #[test]
    fn test_event_starts_unresolved() {
        let event = RiskEvent::new(
            RiskEventType::DailyLossLimit,
            Severity::Critical,
            "loss",
            "risk_monitor",
            vec![RiskAction::PauseTrading],
            Utc::now(),
        );
        assert!(!event.is_resolved());
        assert_eq!(event.event_type.as_str(), "daily_loss_limit");
    }
}
