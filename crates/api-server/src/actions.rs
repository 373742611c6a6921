//! Tagged request/response boundary.
//!
//! Requests look like `{"action": "calculate_position_size", ...params}` and
//! every response is `{"success": bool, "result"?: ..., "error"?: {code, message}}`.

use chrono::Utc;
use market_core::types::{
    ExecutionReport, MarketBar, MlDecision, OrderRequest, RiskSettings, Timeframe,
};
use market_core::{Error, Result};
use risk_manager::TripReason;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use signal_engine::WARMUP_BARS;
use tracing::{info, warn};

use crate::account::{Evaluation, SizingParams};
use crate::state::AppState;

const DEFAULT_OPERATOR: &str = "api";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateSignalParams {
    pub symbol: String,
    /// Must match the trading timeframe when given.
    #[serde(default)]
    pub timeframe: Option<Timeframe>,
    /// Bars oldest first. Already-seen bars are ignored.
    pub bars: Vec<MarketBar>,
    /// Precomputed (bid − ask) / (bid + ask), if the caller has depth.
    #[serde(default)]
    pub orderbook_imbalance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    GenerateSignal(GenerateSignalParams),
    CalculatePositionSize(SizingParams),
    ValidateOrder {
        order: OrderRequest,
    },
    GetRiskStatus,
    UpdateRiskSettings {
        settings: RiskSettings,
    },
    EmergencyStop {
        #[serde(default)]
        reason: Option<TripReason>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        operator: Option<String>,
    },
    ResetCircuitBreaker {
        #[serde(default)]
        operator: Option<String>,
    },
    RecordFill {
        report: ExecutionReport,
    },
    UpdatePrice {
        symbol: String,
        price: Decimal,
        #[serde(default)]
        rsi: Option<f64>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::GenerateSignal(_) => "generate_signal",
            Action::CalculatePositionSize(_) => "calculate_position_size",
            Action::ValidateOrder { .. } => "validate_order",
            Action::GetRiskStatus => "get_risk_status",
            Action::UpdateRiskSettings { .. } => "update_risk_settings",
            Action::EmergencyStop { .. } => "emergency_stop",
            Action::ResetCircuitBreaker { .. } => "reset_circuit_breaker",
            Action::RecordFill { .. } => "record_fill",
            Action::UpdatePrice { .. } => "update_price",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    pub code: String,
    pub message: String,
    /// Whether the same request may succeed later.
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl ActionResponse {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: &Error) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(ActionError {
                code: error.code().to_string(),
                message: error.to_string(),
                retryable: error.is_recoverable(),
            }),
        }
    }
}

/// Result of `generate_signal`: the evaluation plus gate decisions when a
/// scoring collaborator is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSignals {
    #[serde(flatten)]
    pub evaluation: Evaluation,
    pub decisions: Vec<MlDecision>,
}

/// Run `action` against the account and wrap the outcome.
pub async fn dispatch(state: &AppState, action: Action) -> ActionResponse {
    let name = action.name();
    match execute(state, action).await {
        Ok(result) => ActionResponse::ok(result),
        Err(e) => {
            warn!(action = name, code = e.code(), error = %e, "Action failed");
            ActionResponse::err(&e)
        }
    }
}

async fn execute(state: &AppState, action: Action) -> Result<serde_json::Value> {
    let account = &state.account;
    let value = match action {
        Action::GenerateSignal(params) => serde_json::to_value(generate_signal(state, params).await?)?,
        Action::CalculatePositionSize(params) => serde_json::to_value(account.size_position(params).await?)?,
        Action::ValidateOrder { order } => serde_json::to_value(account.validate_order(order).await?)?,
        Action::GetRiskStatus => serde_json::to_value(account.status().await?)?,
        Action::UpdateRiskSettings { settings } => {
            serde_json::to_value(account.update_settings(settings).await?)?
        }
        Action::EmergencyStop {
            reason,
            description,
            operator,
        } => {
            let reason = reason.unwrap_or(TripReason::ManualEmergencyStop);
            let operator = operator.unwrap_or_else(|| DEFAULT_OPERATOR.to_string());
            let description =
                description.unwrap_or_else(|| format!("Emergency stop requested by {}", operator));
            info!(reason = ?reason, operator = %operator, "Emergency stop requested");
            serde_json::to_value(account.emergency_stop(reason, description, operator).await?)?
        }
        Action::ResetCircuitBreaker { operator } => {
            let operator = operator.unwrap_or_else(|| DEFAULT_OPERATOR.to_string());
            serde_json::to_value(account.reset_breaker(operator).await?)?
        }
        Action::RecordFill { report } => serde_json::to_value(account.record_fill(report).await?)?,
        Action::UpdatePrice { symbol, price, rsi } => {
            serde_json::to_value(account.update_price(symbol, price, rsi).await?)?
        }
    };
    Ok(value)
}

async fn generate_signal(state: &AppState, params: GenerateSignalParams) -> Result<GeneratedSignals> {
    let registry = &state.registry;
    if let Some(tf) = params.timeframe {
        if tf != registry.timeframe() {
            return Err(Error::InvalidInputs(format!(
                "timeframe {} does not match trading timeframe {}",
                tf,
                registry.timeframe()
            )));
        }
    }
    if let Some(bar) = params.bars.iter().find(|b| b.symbol != params.symbol) {
        return Err(Error::InvalidInputs(format!(
            "bar for {} in a {} request",
            bar.symbol, params.symbol
        )));
    }
    if let Some(imbalance) = params.orderbook_imbalance {
        if !(-1.0..=1.0).contains(&imbalance) {
            return Err(Error::InvalidInputs(format!(
                "orderbook_imbalance must be in [-1, 1], got {}",
                imbalance
            )));
        }
    }

    let sets = registry.ingest(&params.symbol, &params.bars, Utc::now())?;
    if sets.is_empty() {
        let have = registry.bars_seen(&params.symbol);
        if have < WARMUP_BARS {
            return Err(Error::InsufficientHistory {
                symbol: params.symbol,
                have,
                need: WARMUP_BARS,
            });
        }
        return Err(Error::InvalidInputs(format!(
            "no new completed bars for {}",
            params.symbol
        )));
    }

    let evaluation = state
        .account
        .evaluate(sets, params.orderbook_imbalance)
        .await?;

    let mut decisions = Vec::new();
    if let Some(inference) = &state.inference {
        for candidate in &evaluation.signals {
            match state
                .gate
                .evaluate(inference.as_ref(), &candidate.signal, &candidate.features)
                .await
            {
                Ok(decision) => {
                    state.account.record_decision(decision.clone()).await?;
                    decisions.push(decision);
                }
                Err(e) => {
                    state
                        .account
                        .resolve_signal(candidate.signal.id, e.code())
                        .await?;
                    warn!(signal_id = %candidate.signal.id, error = %e, "Signal not scored");
                }
            }
        }
    }

    Ok(GeneratedSignals {
        evaluation,
        decisions,
    })
}
