//! Risk Manager
//!
//! Position sizing, limit monitoring, circuit breaker, exit rules and the
//! final order gate.

pub mod circuit_breaker;
pub mod events;
pub mod exit_rules;
pub mod order_validator;
pub mod position_sizer;
pub mod risk_monitor;

pub use circuit_breaker::{BreakerState, BreakerStatus, CircuitBreaker, CircuitBreakerConfig, TripReason};
pub use events::RiskEventLog;
pub use exit_rules::{ExitDecision, ExitReason};
pub use order_validator::{OrderValidator, SignalBinding, ValidationContext};
pub use position_sizer::{is_low_liquidity, PositionSizer, SizerConfig, SizingRequest, TradeStats};
pub use risk_monitor::{ExposureSnapshot, MonitorUpdate, RiskMonitor};
