//! Limit utilization tracking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use market_core::config::{correlation_group_of, CorrelationGroup};
use market_core::types::{
    LimitStatus, LimitType, RiskAction, RiskEvent, RiskEventType, RiskLimitStatus, RiskSettings,
    Severity,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use trading_engine::PositionManager;
use uuid::Uuid;

use crate::events::RiskEventLog;

/// Account figures the limits are computed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    pub capital: Decimal,
    /// Realized P&L for the current day.
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Sum of open position risk at their stops.
    pub open_risk: Decimal,
    /// Largest single open notional.
    pub largest_position: Decimal,
    /// Open notional per symbol.
    pub exposure_by_symbol: HashMap<String, Decimal>,
}

impl ExposureSnapshot {
    pub fn from_positions(capital: Decimal, realized_pnl: Decimal, positions: &PositionManager) -> Self {
        Self {
            capital,
            realized_pnl,
            unrealized_pnl: positions.unrealized_pnl(),
            open_risk: positions.open_risk(),
            largest_position: positions.largest_position(),
            exposure_by_symbol: positions.exposure_by_symbol(),
        }
    }

    pub fn daily_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    /// Count an accepted order that has not filled yet against the budgets.
    pub fn reserve(&mut self, symbol: &str, notional: Decimal, risk: Decimal) {
        self.open_risk += risk;
        *self.exposure_by_symbol.entry(symbol.to_string()).or_default() += notional;
        self.largest_position = self.largest_position.max(notional);
    }

    pub fn symbol_exposure(&self, symbol: &str) -> Decimal {
        self.exposure_by_symbol
            .iter()
            .filter(|(s, _)| s.eq_ignore_ascii_case(symbol))
            .map(|(_, v)| *v)
            .sum()
    }

    fn group_exposures(&self, groups: &[CorrelationGroup]) -> HashMap<String, Decimal> {
        let mut by_group: HashMap<String, Decimal> = HashMap::new();
        for (symbol, notional) in &self.exposure_by_symbol {
            *by_group.entry(correlation_group_of(groups, symbol)).or_default() += *notional;
        }
        by_group
    }
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorUpdate {
    pub statuses: Vec<RiskLimitStatus>,
    /// Limits that crossed into `critical` on this pass.
    pub newly_critical: Vec<LimitType>,
    /// realized + unrealized ≤ −max_daily_loss.
    pub daily_loss_breached: bool,
}

/// Recomputes limit statuses and records edge-triggered critical events.
pub struct RiskMonitor {
    settings: RiskSettings,
    correlation_groups: Vec<CorrelationGroup>,
    statuses: HashMap<LimitType, RiskLimitStatus>,
    /// Open `limit_critical` event per limit.
    critical_events: HashMap<LimitType, Uuid>,
    last_snapshot: Option<ExposureSnapshot>,
}

impl RiskMonitor {
    pub fn new(settings: RiskSettings, correlation_groups: Vec<CorrelationGroup>) -> Self {
        Self {
            settings,
            correlation_groups,
            statuses: HashMap::new(),
            critical_events: HashMap::new(),
            last_snapshot: None,
        }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    /// Swap in new settings. Callers re-evaluate afterwards.
    pub fn update_settings(&mut self, settings: RiskSettings) {
        self.settings = settings;
    }

    pub fn last_snapshot(&self) -> Option<&ExposureSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Evaluate every monitored limit against `snapshot`.
    pub fn evaluate(
        &mut self,
        snapshot: ExposureSnapshot,
        now: DateTime<Utc>,
        events: &mut RiskEventLog,
    ) -> MonitorUpdate {
        let computed = self.compute(&snapshot);
        let mut newly_critical = Vec::new();

        for status in &computed {
            let was_critical = self
                .statuses
                .get(&status.limit_type)
                .map(|s| s.is_critical())
                .unwrap_or(false);

            match (was_critical, status.is_critical()) {
                (false, true) => {
                    let event = RiskEvent::new(
                        RiskEventType::LimitCritical,
                        Severity::Critical,
                        format!(
                            "{} at {}% of limit ({} / {})",
                            status.limit_type,
                            status.utilization_percentage.round_dp(2),
                            status.current_value.round_dp(6),
                            status.limit_value
                        ),
                        "risk_monitor",
                        vec![RiskAction::NotifyOperator],
                        now,
                    );
                    let id = events.record(event);
                    self.critical_events.insert(status.limit_type, id);
                    newly_critical.push(status.limit_type);
                }
                (true, false) => {
                    if let Some(id) = self.critical_events.remove(&status.limit_type) {
                        events.resolve(id, now);
                    }
                }
                _ => {}
            }

            if status.status == LimitStatus::Warning {
                debug!(
                    limit = %status.limit_type,
                    utilization = %status.utilization_percentage,
                    "Limit in warning band"
                );
            }
        }

        let daily_loss_breached = snapshot.daily_pnl() <= -self.settings.max_daily_loss;
        if daily_loss_breached {
            warn!(
                daily_pnl = %snapshot.daily_pnl(),
                max_daily_loss = %self.settings.max_daily_loss,
                "Daily loss limit breached"
            );
        }

        self.statuses = computed
            .iter()
            .map(|s| (s.limit_type, s.clone()))
            .collect();
        self.last_snapshot = Some(snapshot);

        MonitorUpdate {
            statuses: computed,
            newly_critical,
            daily_loss_breached,
        }
    }

    /// Re-run the last evaluation, e.g. after a settings change.
    pub fn reevaluate(&mut self, now: DateTime<Utc>, events: &mut RiskEventLog) -> Option<MonitorUpdate> {
        let snapshot = self.last_snapshot.clone()?;
        Some(self.evaluate(snapshot, now, events))
    }

    /// Current statuses in monitoring order.
    pub fn statuses(&self) -> Vec<RiskLimitStatus> {
        LimitType::MONITORED
            .iter()
            .filter_map(|t| self.statuses.get(t).cloned())
            .collect()
    }

    pub fn status(&self, limit_type: LimitType) -> Option<&RiskLimitStatus> {
        self.statuses.get(&limit_type)
    }

    pub fn has_critical(&self) -> bool {
        self.statuses.values().any(|s| s.is_critical())
    }

    /// Notional still allowed on `symbol` before its exposure ceiling.
    pub fn remaining_symbol_budget(&self, snapshot: &ExposureSnapshot, symbol: &str) -> Decimal {
        let ceiling = self.settings.max_symbol_exposure * snapshot.capital;
        (ceiling - snapshot.symbol_exposure(symbol)).max(Decimal::ZERO)
    }

    /// Risk amount still allowed before the portfolio risk ceiling.
    pub fn remaining_risk_budget(&self, snapshot: &ExposureSnapshot) -> Decimal {
        let ceiling = self.settings.max_portfolio_risk * snapshot.capital;
        (ceiling - snapshot.open_risk).max(Decimal::ZERO)
    }

    fn compute(&self, snapshot: &ExposureSnapshot) -> Vec<RiskLimitStatus> {
        let s = &self.settings;
        let capital = snapshot.capital;

        let daily_loss = (-snapshot.daily_pnl()).max(Decimal::ZERO);
        let largest_symbol = snapshot
            .exposure_by_symbol
            .values()
            .copied()
            .max()
            .unwrap_or(Decimal::ZERO);
        let largest_group = snapshot
            .group_exposures(&self.correlation_groups)
            .into_values()
            .max()
            .unwrap_or(Decimal::ZERO);

        vec![
            RiskLimitStatus::evaluate(LimitType::DailyLoss, daily_loss, s.max_daily_loss),
            RiskLimitStatus::evaluate(
                LimitType::PositionSize,
                fraction_of(snapshot.largest_position, capital),
                s.max_position_size,
            ),
            RiskLimitStatus::evaluate(
                LimitType::PortfolioRisk,
                fraction_of(snapshot.open_risk, capital),
                s.max_portfolio_risk,
            ),
            RiskLimitStatus::evaluate(
                LimitType::SymbolExposure,
                fraction_of(largest_symbol, capital),
                s.max_symbol_exposure,
            ),
            RiskLimitStatus::evaluate(
                LimitType::CorrelationExposure,
                fraction_of(largest_group, capital),
                s.max_correlation_exposure,
            ),
        ]
    }
}

/// `value / capital`; any exposure against non-positive capital counts as 100%.
fn fraction_of(value: Decimal, capital: Decimal) -> Decimal {
    if capital > Decimal::ZERO {
        value / capital
    } else if value > Decimal::ZERO {
        Decimal::ONE
    } else {
        Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(realized: Decimal, exposures: &[(&str, Decimal)]) -> ExposureSnapshot {
        let exposure_by_symbol: HashMap<String, Decimal> =
            exposures.iter().map(|(s, v)| (s.to_string(), *v)).collect();
        ExposureSnapshot {
            capital: dec!(1000),
            realized_pnl: realized,
            largest_position: exposure_by_symbol.values().copied().max().unwrap_or_default(),
            exposure_by_symbol,
            ..Default::default()
        }
    }

    fn monitor() -> RiskMonitor {
        let settings = RiskSettings {
            max_daily_loss: dec!(100),
            ..Default::default()
        };
        let groups = vec![CorrelationGroup {
            name: "majors".to_string(),
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        }];
        RiskMonitor::new(settings, groups)
    }

    #[test]
    fn test_bands_and_values() {
        let mut m = monitor();
        let mut log = RiskEventLog::new();
        let update = m.evaluate(snapshot(dec!(-80), &[("ETHUSDT", dec!(50))]), Utc::now(), &mut log);

        let daily = m.status(LimitType::DailyLoss).unwrap();
        assert_eq!(daily.current_value, dec!(80));
        assert_eq!(daily.status, LimitStatus::Warning);

        let size = m.status(LimitType::PositionSize).unwrap();
        assert_eq!(size.current_value, dec!(0.05));
        assert_eq!(size.utilization_percentage, dec!(50));
        assert_eq!(size.status, LimitStatus::Normal);

        assert_eq!(update.statuses.len(), 5);
        assert!(!update.daily_loss_breached);
        assert!(log.is_empty());
    }

    #[test]
    fn test_critical_is_edge_triggered() {
        let mut m = monitor();
        let mut log = RiskEventLog::new();

        let update = m.evaluate(snapshot(dec!(-95), &[]), Utc::now(), &mut log);
        assert_eq!(update.newly_critical, vec![LimitType::DailyLoss]);
        assert!(m.has_critical());
        assert_eq!(log.len(), 1);

        // still critical, no new event
        let update = m.evaluate(snapshot(dec!(-96), &[]), Utc::now(), &mut log);
        assert!(update.newly_critical.is_empty());
        assert_eq!(log.len(), 1);

        // recovery resolves the open event
        m.evaluate(snapshot(dec!(-10), &[]), Utc::now(), &mut log);
        assert!(!m.has_critical());
        assert!(!log.has_unresolved(RiskEventType::LimitCritical));
    }

    #[test]
    fn test_daily_loss_breach_includes_unrealized() {
        let mut m = monitor();
        let mut log = RiskEventLog::new();
        let mut snap = snapshot(dec!(-60), &[]);
        snap.unrealized_pnl = dec!(-40);
        assert!(m.evaluate(snap, Utc::now(), &mut log).daily_loss_breached);
    }

    #[test]
    fn test_correlation_groups_aggregate() {
        let mut m = monitor();
        let mut log = RiskEventLog::new();
        m.evaluate(
            snapshot(
                Decimal::ZERO,
                &[("BTCUSDT", dec!(150)), ("ETHUSDT", dec!(150)), ("SOLUSDT", dec!(100))],
            ),
            Utc::now(),
            &mut log,
        );

        let corr = m.status(LimitType::CorrelationExposure).unwrap();
        assert_eq!(corr.current_value, dec!(0.3));
        assert!(corr.is_critical());

        let sym = m.status(LimitType::SymbolExposure).unwrap();
        assert_eq!(sym.current_value, dec!(0.15));
        assert_eq!(sym.status, LimitStatus::Normal);
    }

    #[test]
    fn test_budgets() {
        let m = monitor();
        let mut snap = snapshot(Decimal::ZERO, &[("ETHUSDT", dec!(150))]);
        snap.open_risk = dec!(20);
        assert_eq!(m.remaining_symbol_budget(&snap, "ethusdt"), dec!(50));
        assert_eq!(m.remaining_symbol_budget(&snap, "SOLUSDT"), dec!(200));
        assert_eq!(m.remaining_risk_budget(&snap), dec!(40));
    }

    #[test]
    fn test_reserved_orders_shrink_budgets() {
        let m = monitor();
        let mut snap = snapshot(Decimal::ZERO, &[("ETHUSDT", dec!(50))]);
        snap.reserve("ETHUSDT", dec!(100), dec!(25));
        assert_eq!(snap.symbol_exposure("ETHUSDT"), dec!(150));
        assert_eq!(m.remaining_symbol_budget(&snap, "ETHUSDT"), dec!(50));
        assert_eq!(m.remaining_risk_budget(&snap), dec!(35));
    }

    #[test]
    fn test_settings_change_reevaluates() {
        let mut m = monitor();
        let mut log = RiskEventLog::new();
        m.evaluate(snapshot(dec!(-50), &[]), Utc::now(), &mut log);
        assert!(!m.has_critical());

        m.update_settings(RiskSettings {
            max_daily_loss: dec!(50),
            ..Default::default()
        });
        let update = m.reevaluate(Utc::now(), &mut log).unwrap();
        assert_eq!(update.newly_critical, vec![LimitType::DailyLoss]);
        assert!(update.daily_loss_breached);
    }
}
