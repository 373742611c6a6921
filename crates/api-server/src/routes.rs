//! API route definitions.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::handlers::{actions, health, risk};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Action boundary
        .route("/actions", post(actions::handle_action))
        // Risk monitoring
        .route("/risk/status", get(risk::get_status))
        .route("/risk/limits", get(risk::get_limits))
        .route("/risk/events", get(risk::get_events));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .nest("/api/v1", api_routes)
        .with_state(state)
}
