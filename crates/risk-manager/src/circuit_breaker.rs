//! Circuit breaker for trading halts.
//!
//! ```text
//! active --daily loss--> paused --timer elapsed, nothing critical--> active
//! active|paused --emergency--> triggered --explicit reset--> active
//! active <--circuit_breaker_enabled--> disabled
//! ```
//!
//! Every halting transition bumps the epoch, so sizing computed before a halt
//! can be recognized as stale.

use chrono::{DateTime, Duration, Utc};
use market_core::types::{RiskAction, RiskEvent, RiskEventType, Severity};
use market_core::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events::RiskEventLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Active,
    Paused,
    Triggered,
    Disabled,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Active => "active",
            BreakerState::Paused => "paused",
            BreakerState::Triggered => "triggered",
            BreakerState::Disabled => "disabled",
        }
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, BreakerState::Paused | BreakerState::Triggered)
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason for a halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    DailyLossLimit,
    MaxDrawdown,
    ManualEmergencyStop,
    VolatilitySpike,
    CorrelationBreakdown,
    CriticalLimit,
}

impl TripReason {
    pub fn event_type(&self) -> RiskEventType {
        match self {
            TripReason::DailyLossLimit => RiskEventType::DailyLossLimit,
            TripReason::MaxDrawdown => RiskEventType::MaxDrawdown,
            TripReason::ManualEmergencyStop => RiskEventType::ManualEmergencyStop,
            TripReason::VolatilitySpike => RiskEventType::VolatilitySpike,
            TripReason::CorrelationBreakdown => RiskEventType::CorrelationBreakdown,
            TripReason::CriticalLimit => RiskEventType::LimitCritical,
        }
    }
}

/// Configuration for circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Equity drawdown from the high-water mark that triggers a halt (0.05 = 5%).
    pub drawdown_threshold: Decimal,
    /// Length of the daily-loss pause.
    pub pause_hours: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            drawdown_threshold: Decimal::new(5, 2),
            pause_hours: 12,
        }
    }
}

/// Published breaker snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub epoch: u64,
    pub reason: Option<TripReason>,
    pub changed_at: DateTime<Utc>,
    /// When a daily-loss pause may lift.
    pub resume_at: Option<DateTime<Utc>>,
    /// Event that caused the current halt.
    pub halt_event: Option<Uuid>,
    pub peak_equity: Decimal,
    pub current_equity: Decimal,
    pub trips_today: u32,
}

/// Account-level circuit breaker. Owned by a single writer.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    status: BreakerStatus,
    tx: watch::Sender<BreakerStatus>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, starting_equity: Decimal, now: DateTime<Utc>) -> Self {
        let status = BreakerStatus {
            state: if config.enabled {
                BreakerState::Active
            } else {
                BreakerState::Disabled
            },
            epoch: 0,
            reason: None,
            changed_at: now,
            resume_at: None,
            halt_event: None,
            peak_equity: starting_equity,
            current_equity: starting_equity,
            trips_today: 0,
        };
        let (tx, _) = watch::channel(status.clone());
        Self { config, status, tx }
    }

    /// Watch breaker transitions.
    pub fn subscribe(&self) -> watch::Receiver<BreakerStatus> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> BreakerState {
        self.status.state
    }

    pub fn epoch(&self) -> u64 {
        self.status.epoch
    }

    pub fn status(&self) -> &BreakerStatus {
        &self.status
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether new orders may be accepted.
    pub fn can_trade(&self) -> bool {
        self.status.state == BreakerState::Active
    }

    /// `CircuitOpen` unless active and `epoch` is current.
    pub fn ensure_open(&self, epoch: u64) -> Result<()> {
        if !self.can_trade() {
            return Err(Error::CircuitOpen {
                state: self.status.state.to_string(),
            });
        }
        if epoch != self.status.epoch {
            return Err(Error::CircuitOpen {
                state: format!("stale epoch {} (current {})", epoch, self.status.epoch),
            });
        }
        Ok(())
    }

    /// Daily loss limit breached: pause for the configured hours.
    pub fn pause_for_daily_loss(
        &mut self,
        daily_pnl: Decimal,
        max_daily_loss: Decimal,
        now: DateTime<Utc>,
        events: &mut RiskEventLog,
    ) -> bool {
        if self.status.state != BreakerState::Active {
            return false;
        }

        let resume_at = now + Duration::hours(self.config.pause_hours);
        let event = RiskEvent::new(
            RiskEventType::DailyLossLimit,
            Severity::Critical,
            format!(
                "Daily P&L {} breached max daily loss {}; trading paused until {}",
                daily_pnl, max_daily_loss, resume_at
            ),
            "risk_monitor",
            vec![RiskAction::PauseTrading, RiskAction::NotifyOperator],
            now,
        );
        let event_id = events.record(event);

        self.halt(BreakerState::Paused, TripReason::DailyLossLimit, event_id, now);
        self.status.resume_at = Some(resume_at);
        self.publish();

        warn!(
            daily_pnl = %daily_pnl,
            max_daily_loss = %max_daily_loss,
            resume_at = %resume_at,
            epoch = self.status.epoch,
            "Circuit breaker PAUSED - daily loss limit"
        );
        true
    }

    /// Emergency halt that only an explicit reset clears.
    ///
    /// Manual stops apply even when the breaker is disabled; automatic reasons
    /// are ignored then.
    pub fn trigger(
        &mut self,
        reason: TripReason,
        description: impl Into<String>,
        triggered_by: impl Into<String>,
        now: DateTime<Utc>,
        events: &mut RiskEventLog,
    ) -> bool {
        match self.status.state {
            BreakerState::Triggered => return false,
            BreakerState::Disabled if reason != TripReason::ManualEmergencyStop => return false,
            _ => {}
        }

        // The pause, if any, is superseded by the trigger.
        if let Some(previous) = self.status.halt_event {
            events.resolve(previous, now);
        }

        let event = RiskEvent::new(
            reason.event_type(),
            Severity::Critical,
            description,
            triggered_by,
            vec![
                RiskAction::HaltTrading,
                RiskAction::ClosePositions,
                RiskAction::NotifyOperator,
            ],
            now,
        );
        let event_id = events.record(event);

        self.halt(BreakerState::Triggered, reason, event_id, now);
        self.status.resume_at = None;
        self.publish();

        error!(
            reason = ?reason,
            epoch = self.status.epoch,
            trips_today = self.status.trips_today,
            "Circuit breaker TRIGGERED - trading halted"
        );
        true
    }

    /// Track equity against the high-water mark; trigger on excessive drawdown.
    pub fn update_equity(&mut self, equity: Decimal, now: DateTime<Utc>, events: &mut RiskEventLog) -> bool {
        self.status.current_equity = equity;
        if equity > self.status.peak_equity {
            self.status.peak_equity = equity;
        }

        let peak = self.status.peak_equity;
        if peak <= Decimal::ZERO {
            return false;
        }
        let drawdown = (peak - equity) / peak;
        if drawdown >= self.config.drawdown_threshold {
            return self.trigger(
                TripReason::MaxDrawdown,
                format!(
                    "Equity {} is {}% below high-water mark {}",
                    equity,
                    (drawdown * Decimal::ONE_HUNDRED).round_dp(2),
                    peak
                ),
                "circuit_breaker",
                now,
                events,
            );
        }
        false
    }

    /// Lift an expired pause if nothing is critical.
    pub fn tick(&mut self, now: DateTime<Utc>, has_critical: bool, events: &mut RiskEventLog) -> bool {
        if self.status.state != BreakerState::Paused {
            return false;
        }
        let Some(resume_at) = self.status.resume_at else {
            return false;
        };
        if now < resume_at {
            return false;
        }
        if has_critical {
            info!(resume_at = %resume_at, "Pause expired but a limit is still critical; staying paused");
            return false;
        }

        self.resume(
            RiskEventType::PauseExpired,
            "Daily loss pause elapsed; trading resumed",
            "circuit_breaker",
            now,
            events,
        );
        true
    }

    /// Explicit reset from `triggered` or `paused`.
    pub fn reset(
        &mut self,
        operator: &str,
        has_critical: bool,
        now: DateTime<Utc>,
        events: &mut RiskEventLog,
    ) -> Result<BreakerState> {
        if !self.status.state.is_halted() {
            return Ok(self.status.state);
        }
        if has_critical {
            warn!(operator = %operator, state = %self.status.state, "Reset refused: a limit is critical");
            return Err(Error::CircuitOpen {
                state: format!("{} (limit still critical)", self.status.state),
            });
        }

        self.resume(
            RiskEventType::CircuitReset,
            format!("Circuit breaker reset by {}", operator),
            operator,
            now,
            events,
        );
        Ok(self.status.state)
    }

    /// Follow `circuit_breaker_enabled`. A halt is never cleared by this.
    pub fn set_enabled(&mut self, enabled: bool, now: DateTime<Utc>, events: &mut RiskEventLog) {
        if self.config.enabled == enabled {
            return;
        }
        self.config.enabled = enabled;

        let (from, to, event_type) = match (self.status.state, enabled) {
            (BreakerState::Active, false) => {
                (BreakerState::Active, BreakerState::Disabled, RiskEventType::BreakerDisabled)
            }
            (BreakerState::Disabled, true) => {
                (BreakerState::Disabled, BreakerState::Active, RiskEventType::BreakerEnabled)
            }
            _ => return,
        };

        events.record(RiskEvent::new(
            event_type,
            Severity::Warning,
            format!("Circuit breaker {} -> {}", from, to),
            "configuration",
            Vec::new(),
            now,
        ));
        self.status.state = to;
        self.status.changed_at = now;
        self.publish();
        info!(from = %from, to = %to, "Circuit breaker enablement changed");
    }

    pub fn update_config(&mut self, drawdown_threshold: Decimal, pause_hours: i64) {
        self.config.drawdown_threshold = drawdown_threshold;
        self.config.pause_hours = pause_hours;
    }

    /// Day roll-over: clears day counters. A halt stays in place.
    pub fn reset_daily(&mut self) {
        self.status.trips_today = 0;
        self.publish();
        info!("Circuit breaker daily reset");
    }

    fn halt(&mut self, state: BreakerState, reason: TripReason, event_id: Uuid, now: DateTime<Utc>) {
        self.status.state = state;
        self.status.epoch += 1;
        self.status.reason = Some(reason);
        self.status.changed_at = now;
        self.status.halt_event = Some(event_id);
        self.status.trips_today += 1;
    }

    fn resume(
        &mut self,
        event_type: RiskEventType,
        description: impl Into<String>,
        triggered_by: impl Into<String>,
        now: DateTime<Utc>,
        events: &mut RiskEventLog,
    ) {
        let from = self.status.state;
        if let Some(halt_event) = self.status.halt_event.take() {
            events.resolve(halt_event, now);
        }
        events.record(RiskEvent::new(
            event_type,
            Severity::Info,
            description,
            triggered_by,
            vec![RiskAction::ResumeTrading],
            now,
        ));

        self.status.state = if self.config.enabled {
            BreakerState::Active
        } else {
            BreakerState::Disabled
        };
        self.status.reason = None;
        self.status.resume_at = None;
        self.status.changed_at = now;
        // Drawdown is measured from equity at the time trading resumes.
        self.status.peak_equity = self.status.current_equity;
        self.publish();

        info!(from = %from, to = %self.status.state, epoch = self.status.epoch, "Circuit breaker resumed");
    }

    fn publish(&self) {
        self.tx.send_replace(self.status.clone());
    }
}
