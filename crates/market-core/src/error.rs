//! Error types for the tradeguard control core.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::LimitType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Insufficient history for {symbol}: have {have} bars, need {need}")]
    InsufficientHistory {
        symbol: String,
        have: usize,
        need: usize,
    },

    #[error("Invalid inputs: {0}")]
    InvalidInputs(String),

    #[error("Duplicate signal: {strategy} already has an open signal for {symbol}")]
    DuplicateSignal { symbol: String, strategy: String },

    #[error("Limit breach on {limit}: {message}")]
    LimitBreach { limit: LimitType, message: String },

    #[error("Circuit open: trading halted (breaker {state})")]
    CircuitOpen { state: String },

    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("Estimated costs {costs} exceed {max_fraction} of take-profit distance {reward}")]
    ExcessiveCost {
        costs: Decimal,
        reward: Decimal,
        max_fraction: Decimal,
    },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("Execution error: {message}")]
    Execution { message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code used on the action boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InsufficientHistory { .. } => "insufficient_history",
            Error::InvalidInputs(_) => "invalid_inputs",
            Error::DuplicateSignal { .. } => "duplicate_signal",
            Error::LimitBreach { .. } => "limit_breach",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::StaleData(_) => "stale_data",
            Error::ExecutionTimeout { .. } => "execution_timeout",
            Error::ExcessiveCost { .. } => "excessive_cost",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::Execution { .. } => "execution_error",
            Error::NotFound(_) => "not_found",
            Error::ConfigFile(_) | Error::Config { .. } => "config_error",
            Error::Json(_) => "serialization_error",
        }
    }

    /// Whether the caller may retry the same request later without changing it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InsufficientHistory { .. }
                | Error::StaleData(_)
                | Error::ExecutionTimeout { .. }
                | Error::CircuitOpen { .. }
        )
    }

    /// Whether the process cannot continue (configuration corruption).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConfigFile(_) | Error::Config { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
