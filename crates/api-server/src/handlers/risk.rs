//! Risk monitoring handlers.

use axum::extract::{Query, State};
use axum::Json;
use market_core::types::{RiskEvent, RiskLimitStatus};
use serde::Deserialize;
use std::sync::Arc;

use crate::account::RiskStatus;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// Current utilization of every monitored limit.
pub async fn get_limits(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<RiskLimitStatus>>> {
    Ok(Json(state.account.limits().await?))
}

/// Most recent risk events, newest first.
pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<RiskEvent>>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    if limit == 0 || limit > MAX_EVENT_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_EVENT_LIMIT
        )));
    }
    Ok(Json(state.account.events(limit).await?))
}

/// Breaker, limits, settings and today's P&L in one snapshot.
pub async fn get_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<RiskStatus>> {
    Ok(Json(state.account.status().await?))
}
