//! API Server binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use api_server::{ApiServer, AppState, HttpInferenceClient, ServerConfig};
use market_core::config::AppConfig;
use signal_engine::InferenceClient;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    // Invalid risk settings are fatal at startup
    let config = AppConfig::from_env()?;

    let inference: Option<Arc<dyn InferenceClient>> =
        HttpInferenceClient::from_env(Duration::from_millis(config.engine.inference_timeout_ms))?
            .map(|client| Arc::new(client) as Arc<dyn InferenceClient>);
    if inference.is_none() {
        info!("INFERENCE_URL not set; signals are returned ungated");
    }

    let state = AppState::new(config, inference)?;
    let server = ApiServer::new(ServerConfig::from_env(), state);
    server.run().await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "api_server=info,risk_manager=info,signal_engine=info,trading_engine=info,tower_http=info".into()
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
