//! API Server
//!
//! HTTP boundary and live pipeline for the tradeguard control core.
//!
//! # Features
//!
//! - **Action boundary**: tagged JSON actions (`generate_signal`,
//!   `calculate_position_size`, `validate_order`, `emergency_stop`, ...)
//! - **Risk monitoring**: breaker status, limit utilization and the event log
//! - **Pipeline**: periodic bar fetch, evaluation, gating and paper execution
//!
//! # Example
//!
//! ```ignore
//! use api_server::{ApiServer, AppState, ServerConfig};
//!
//! let state = AppState::new(AppConfig::from_env()?, None)?;
//! let server = ApiServer::new(ServerConfig::from_env(), state);
//! server.run().await?;
//! ```

pub mod account;
pub mod actions;
pub mod error;
pub mod feeds;
pub mod handlers;
pub mod market;
pub mod pipeline;
pub mod routes;
pub mod state;

pub use account::{Account, AccountHandle, Evaluation, RiskStatus, SizingParams};
pub use actions::{dispatch, Action, ActionResponse};
pub use error::ApiError;
pub use feeds::{HttpInferenceClient, HttpMarketFeed};
pub use market::MarketRegistry;
pub use pipeline::{spawn_pipeline, MarketFeed, Pipeline, PipelineConfig};
pub use routes::create_router;
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};
use trading_engine::{ExecutorConfig, OrderExecutor, PaperExecutor};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for all origins (development only).
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_permissive: true,
        }
    }
}

impl ServerConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .or_else(|_| std::env::var("API_PORT"))
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            cors_permissive: std::env::var("CORS_PERMISSIVE")
                .map(|v| v == "true")
                .unwrap_or(true),
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid socket address {}:{}: {}", self.host, self.port, e))
    }
}

/// The API server.
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server.
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Run the server.
    pub async fn run(self) -> anyhow::Result<()> {
        let state = Arc::new(self.state);

        let router = create_router(state.clone())
            .layer(
                TraceLayer::new_for_http()
                    .on_request(|request: &Request<_>, _span: &tracing::Span| {
                        tracing::info!(
                            method = %request.method(),
                            uri = %request.uri(),
                            "Incoming request"
                        );
                    })
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG))
                    .on_failure(
                        |error: tower_http::classify::ServerErrorsFailureClass,
                         latency: Duration,
                         _span: &tracing::Span| {
                            tracing::error!(
                                error = %error,
                                latency_ms = latency.as_millis(),
                                "Request failed"
                            );
                        },
                    ),
            )
            .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB
            .layer(if self.config.cors_permissive {
                CorsLayer::permissive()
            } else {
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            });

        // ── Spawn background tasks ──
        let pipeline_config = PipelineConfig::from_env(&state.config.engine);
        if pipeline_config.enabled {
            match &state.inference {
                Some(inference) => {
                    let engine = &state.config.engine;
                    let feed = Arc::new(HttpMarketFeed::from_env()?);
                    let executor = Arc::new(OrderExecutor::new(
                        Arc::new(PaperExecutor::new(engine.fee_rate, engine.slippage_rate)),
                        ExecutorConfig {
                            timeout: Duration::from_millis(engine.execution_timeout_ms),
                            ..Default::default()
                        },
                    ));
                    spawn_pipeline(
                        pipeline_config,
                        feed,
                        state.account.clone(),
                        state.registry.clone(),
                        state.gate,
                        inference.clone(),
                        executor,
                    );
                }
                None => warn!("PIPELINE_ENABLED is set but INFERENCE_URL is not; pipeline not started"),
            }
        }

        let addr = self.config.socket_addr()?;
        info!("Starting API server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
