//! Action boundary handler.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

use crate::actions::{dispatch, Action, ActionResponse};
use crate::error::ApiResult;
use crate::state::AppState;

/// Run one tagged action. Action failures are reported in the envelope with
/// status 200; only malformed requests are HTTP errors.
pub async fn handle_action(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Action>, JsonRejection>,
) -> ApiResult<Json<ActionResponse>> {
    let Json(action) = payload?;
    Ok(Json(dispatch(&state, action).await))
}
