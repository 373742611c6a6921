//! Continuous evaluation loop.
//!
//! Every tick the pipeline pulls recent bars for each configured symbol, marks
//! open positions, and runs completed bars through the account: regime,
//! strategies, the learned-score gate, sizing, validation and execution.
//! A failing symbol is logged and skipped; the others still run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::config::EngineSettings;
use market_core::types::{MarketBar, Position, Timeframe};
use market_core::{Error, Result};
use risk_manager::BreakerState;
use rust_decimal::Decimal;
use signal_engine::features::orderbook_imbalance;
use signal_engine::{InferenceClient, MlGate};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use trading_engine::OrderExecutor;

use crate::account::{AccountHandle, SignalCandidate};
use crate::market::MarketRegistry;

/// Source of bars and order book depth.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Up to `limit` most recent bars, oldest first. The last one may still be forming.
    async fn recent_bars(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> anyhow::Result<Vec<MarketBar>>;

    /// Resting bid and ask size near the touch, if the venue provides depth.
    async fn book_depth(&self, symbol: &str) -> anyhow::Result<Option<(f64, f64)>>;
}

/// Configuration for the pipeline (env-var driven).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub enabled: bool,
    pub symbols: Vec<String>,
    pub interval_secs: u64,
    /// Bars requested per symbol each tick.
    pub bar_limit: usize,
    /// Latest complete bar older than this is stale.
    pub max_bar_age_secs: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            interval_secs: 60,
            bar_limit: 300,
            max_bar_age_secs: 1_800,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables, with timing defaults from `engine`.
    pub fn from_env(engine: &EngineSettings) -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("PIPELINE_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(false),
            symbols: std::env::var("PIPELINE_SYMBOLS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_uppercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.symbols),
            interval_secs: std::env::var("PIPELINE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(engine.evaluation_interval_secs),
            bar_limit: std::env::var("PIPELINE_BAR_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bar_limit),
            max_bar_age_secs: engine.max_bar_age_secs,
        }
    }
}

/// Outcome of one pass over all symbols.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub symbols_processed: usize,
    pub symbols_failed: usize,
    pub signals: usize,
    pub positions_opened: usize,
}

#[derive(Debug, Default)]
struct SymbolOutcome {
    signals: usize,
    positions_opened: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    feed: Arc<dyn MarketFeed>,
    account: AccountHandle,
    registry: Arc<MarketRegistry>,
    gate: MlGate,
    inference: Arc<dyn InferenceClient>,
    executor: Arc<OrderExecutor>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        feed: Arc<dyn MarketFeed>,
        account: AccountHandle,
        registry: Arc<MarketRegistry>,
        gate: MlGate,
        inference: Arc<dyn InferenceClient>,
        executor: Arc<OrderExecutor>,
    ) -> Self {
        Self {
            config,
            feed,
            account,
            registry,
            gate,
            inference,
            executor,
        }
    }

    /// Run until the account actor goes away.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            symbols = ?self.config.symbols,
            interval_secs = self.config.interval_secs,
            timeframe = %self.registry.timeframe(),
            "Pipeline started"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let report = self.run_once(Utc::now()).await?;
            debug!(
                processed = report.symbols_processed,
                failed = report.symbols_failed,
                signals = report.signals,
                opened = report.positions_opened,
                "Pipeline cycle complete"
            );
        }
    }

    /// One pass: account housekeeping, then every symbol in isolation.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.account.tick_at(now).await?;

        let mut report = CycleReport::default();
        for symbol in &self.config.symbols {
            match self.process_symbol(symbol, now).await {
                Ok(outcome) => {
                    report.symbols_processed += 1;
                    report.signals += outcome.signals;
                    report.positions_opened += outcome.positions_opened;
                }
                Err(e) => {
                    report.symbols_failed += 1;
                    warn!(symbol = %symbol, error = %e, code = e.code(), "Symbol evaluation failed");
                }
            }
        }
        Ok(report)
    }

    async fn process_symbol(&self, symbol: &str, now: DateTime<Utc>) -> Result<SymbolOutcome> {
        let timeframe = self.registry.timeframe();
        let bars = self
            .feed
            .recent_bars(symbol, timeframe, self.config.bar_limit)
            .await
            .map_err(|e| Error::StaleData(format!("market feed for {}: {}", symbol, e)))?;

        let Some(last) = bars.iter().rev().find(|b| b.is_complete(now)) else {
            return Err(Error::StaleData(format!("no complete {} bar for {}", timeframe, symbol)));
        };
        let age = now - last.close_time();
        if age.num_seconds() > self.config.max_bar_age_secs {
            return Err(Error::StaleData(format!(
                "latest {} bar closed {}s ago",
                symbol,
                age.num_seconds()
            )));
        }
        let mark = Decimal::from_f64_retain(last.close)
            .ok_or_else(|| Error::InvalidInputs(format!("unrepresentable close {}", last.close)))?;

        let sets = self.registry.ingest(symbol, &bars, now)?;
        let rsi = self.registry.latest(symbol).map(|s| s.rsi);
        self.account.update_price(symbol, mark, rsi).await?;

        if sets.is_empty() {
            return Ok(SymbolOutcome::default());
        }

        let imbalance = match self.feed.book_depth(symbol).await {
            Ok(depth) => depth.map(|(bid, ask)| orderbook_imbalance(bid, ask)),
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "Book depth unavailable");
                None
            }
        };

        let evaluation = self.account.evaluate(sets, imbalance).await?;
        for change in &evaluation.regime_changes {
            info!(
                symbol = %change.symbol,
                from = ?change.from,
                to = %change.to.as_str(),
                confidence = change.confidence,
                "Regime change"
            );
        }

        let mut outcome = SymbolOutcome {
            signals: evaluation.signals.len(),
            ..Default::default()
        };
        for candidate in evaluation.signals {
            let signal_id = candidate.signal.id;
            match self.act_on(candidate).await {
                Ok(Some(_)) => outcome.positions_opened += 1,
                Ok(None) => {}
                Err(e) => {
                    debug!(symbol = %symbol, signal_id = %signal_id, code = e.code(), error = %e, "Signal not executed")
                }
            }
        }
        Ok(outcome)
    }

    /// Gate, size, validate and execute one signal.
    async fn act_on(&self, candidate: SignalCandidate) -> Result<Option<Position>> {
        let signal_id = candidate.signal.id;
        let decision = match self
            .gate
            .evaluate(self.inference.as_ref(), &candidate.signal, &candidate.features)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                self.account.resolve_signal(signal_id, e.code()).await?;
                return Err(e);
            }
        };

        let executed = decision.executed;
        self.account.record_decision(decision).await?;
        if !executed {
            return Ok(None);
        }

        let validated = self.account.prepare_order(signal_id).await?;

        // A halt recorded after validation must stop the order here.
        let halted = {
            let breaker = self.account.breaker();
            let status = breaker.borrow();
            status.state != BreakerState::Active || status.epoch != validated.order.sizing.breaker_epoch
        };
        if halted {
            self.account
                .order_failed(validated.order.id, "breaker halted before submission")
                .await?;
            return Err(Error::CircuitOpen {
                state: "halted before submission".to_string(),
            });
        }

        match self.executor.execute(&validated).await {
            Ok(report) => self.account.record_fill(report).await,
            Err(e) => {
                self.account.order_failed(validated.order.id, e.code()).await?;
                Err(e)
            }
        }
    }
}

/// Spawn the pipeline as a background task.
pub fn spawn_pipeline(
    config: PipelineConfig,
    feed: Arc<dyn MarketFeed>,
    account: AccountHandle,
    registry: Arc<MarketRegistry>,
    gate: MlGate,
    inference: Arc<dyn InferenceClient>,
    executor: Arc<OrderExecutor>,
) {
    let pipeline = Pipeline::new(config, feed, account, registry, gate, inference, executor);

    tokio::spawn(async move {
        if let Err(e) = pipeline.run().await {
            error!(error = %e, "Pipeline failed");
        }
    });

    info!("Pipeline spawned as background task");
}
