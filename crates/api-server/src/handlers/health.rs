//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
    /// Circuit breaker state, on readiness checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker: Option<String>,
}

/// Liveness endpoint.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        breaker: None,
    })
}

/// Readiness endpoint: the account actor must answer, otherwise 503.
pub async fn readiness(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let status = state.account.status().await?;

    Ok(Json(HealthResponse {
        status: if status.can_trade { "ready" } else { "halted" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        breaker: Some(status.breaker.state.to_string()),
    }))
}
