//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use market_core::config::AppConfig;
use signal_engine::{InferenceClient, MlGate};

use crate::account::{Account, AccountHandle};
use crate::market::MarketRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Validated configuration the account was built from.
    pub config: Arc<AppConfig>,
    /// Handle to the account actor.
    pub account: AccountHandle,
    /// Indicator engines fed by `generate_signal` and the pipeline.
    pub registry: Arc<MarketRegistry>,
    /// Probability and expected-R thresholds.
    pub gate: MlGate,
    /// Scoring collaborator; without one `generate_signal` returns ungated candidates.
    pub inference: Option<Arc<dyn InferenceClient>>,
}

impl AppState {
    /// Build the account from `config` and spawn its actor. Invalid settings fail here.
    pub fn new(config: AppConfig, inference: Option<Arc<dyn InferenceClient>>) -> market_core::Result<Self> {
        let account = Account::new(&config, Utc::now())?;
        let engine = &config.engine;
        let gate = MlGate::new(
            engine.min_probability,
            engine.min_expected_r,
            Duration::from_millis(engine.inference_timeout_ms),
        );
        let registry = Arc::new(MarketRegistry::new(engine.trading_timeframe));

        Ok(Self {
            account: AccountHandle::spawn(account),
            config: Arc::new(config),
            registry,
            gate,
            inference,
        })
    }
}
