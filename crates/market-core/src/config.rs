//! Configuration management for the tradeguard control core.
//!
//! Values are layered: built-in defaults, then an optional TOML file named by
//! `TRADEGUARD_CONFIG`, then `TRADEGUARD__SECTION__KEY` environment overrides.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

use crate::types::{RiskSettings, Timeframe};
use crate::{Error, Result};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub risk: RiskSettings,
    pub engine: EngineSettings,
    pub strategy: StrategySettings,
    /// Symbols that move together; exposure is limited per group.
    pub correlation_groups: Vec<CorrelationGroup>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            risk: RiskSettings::default(),
            engine: EngineSettings::default(),
            strategy: StrategySettings::default(),
            correlation_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub name: String,
    pub symbols: Vec<String>,
}

/// Pipeline cadence, gate thresholds and collaborator timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Timeframe whose completed bars produce signals.
    pub trading_timeframe: Timeframe,
    /// Slower timeframe used for regime confirmation.
    pub confirmation_timeframe: Timeframe,
    /// Minimum time a new regime must persist before execution honors it.
    pub regime_min_dwell_minutes: i64,
    pub evaluation_interval_secs: u64,
    pub daily_loss_pause_hours: i64,
    pub min_probability: f64,
    pub min_expected_r: f64,
    /// Maximum fees+slippage as a fraction of the first take-profit reward.
    pub max_cost_fraction: Decimal,
    pub high_volatility_size_factor: Decimal,
    pub low_liquidity_size_factor: Decimal,
    /// Target ATR% for volatility-adjusted sizing.
    pub target_volatility: Decimal,
    /// ATR% that counts as a volatility spike (emergency stop).
    pub volatility_spike_atr_pct: f64,
    pub fee_rate: Decimal,
    pub slippage_rate: Decimal,
    pub inference_timeout_ms: u64,
    pub execution_timeout_ms: u64,
    /// Bars whose close is older than this are stale.
    pub max_bar_age_secs: i64,
    pub starting_capital: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trading_timeframe: Timeframe::M15,
            confirmation_timeframe: Timeframe::H4,
            regime_min_dwell_minutes: 240,
            evaluation_interval_secs: 60,
            daily_loss_pause_hours: 12,
            min_probability: 0.60,
            min_expected_r: 1.8,
            max_cost_fraction: Decimal::new(25, 2),
            high_volatility_size_factor: Decimal::new(5, 1),
            low_liquidity_size_factor: Decimal::new(5, 1),
            target_volatility: Decimal::new(1, 2),
            volatility_spike_atr_pct: 0.05,
            fee_rate: Decimal::new(1, 3),
            slippage_rate: Decimal::new(5, 4),
            inference_timeout_ms: 2_000,
            execution_timeout_ms: 5_000,
            max_bar_age_secs: 1_800,
            starting_capital: Decimal::new(10_000, 0),
        }
    }
}

/// Strategy thresholds shared by both signal engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub trend_enabled: bool,
    pub mean_reversion_enabled: bool,
    /// Require a Bollinger breakout with a volume spike for trend entries.
    pub require_breakout: bool,
    /// Volume spike: volume > mean + k × stddev.
    pub volume_spike_k: f64,
    /// Bars within which a MACD cross confirms an EMA cross.
    pub macd_confirm_lookback: usize,
    pub stop_atr_multiple: f64,
    pub first_target_atr_multiple: f64,
    pub final_target_atr_multiple: f64,
    pub trailing_atr_multiple: f64,
    pub partial_close_fraction: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub rsi_neutral_low: f64,
    pub rsi_neutral_high: f64,
    /// Band touch tolerance as a fraction of price.
    pub band_touch_tolerance: f64,
    /// Distance to support/resistance that counts as "near", fraction of price.
    pub level_proximity: f64,
    pub require_volume_decline: bool,
    /// Confidence multiplier when the engine does not match the regime.
    pub regime_mismatch_penalty: f64,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            trend_enabled: true,
            mean_reversion_enabled: true,
            require_breakout: false,
            volume_spike_k: 2.0,
            macd_confirm_lookback: 3,
            stop_atr_multiple: 1.8,
            first_target_atr_multiple: 1.0,
            final_target_atr_multiple: 3.0,
            trailing_atr_multiple: 1.0,
            partial_close_fraction: 0.5,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            rsi_neutral_low: 45.0,
            rsi_neutral_high: 55.0,
            band_touch_tolerance: 0.002,
            level_proximity: 0.005,
            require_volume_decline: true,
            regime_mismatch_penalty: 0.6,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = env::var("TRADEGUARD_CONFIG").ok();
        Self::load(path.as_deref())
    }

    /// Load configuration, layering `path` (if any) and environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TRADEGUARD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.risk.validate()?;

        let engine = &self.engine;
        if !(0.0..=1.0).contains(&engine.min_probability) {
            return Err(Error::Config {
                message: format!("min_probability must be in [0, 1], got {}", engine.min_probability),
            });
        }
        if engine.min_expected_r < 0.0 {
            return Err(Error::Config {
                message: format!("min_expected_r must be non-negative, got {}", engine.min_expected_r),
            });
        }
        if engine.confirmation_timeframe < engine.trading_timeframe {
            return Err(Error::Config {
                message: format!(
                    "confirmation timeframe {} is faster than trading timeframe {}",
                    engine.confirmation_timeframe, engine.trading_timeframe
                ),
            });
        }
        if engine.evaluation_interval_secs == 0 {
            return Err(Error::Config {
                message: "evaluation_interval_secs must be positive".to_string(),
            });
        }
        if engine.starting_capital <= Decimal::ZERO {
            return Err(Error::Config {
                message: "starting_capital must be positive".to_string(),
            });
        }

        let strategy = &self.strategy;
        if strategy.rsi_oversold >= strategy.rsi_overbought {
            return Err(Error::Config {
                message: "rsi_oversold must be below rsi_overbought".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&strategy.regime_mismatch_penalty) {
            return Err(Error::Config {
                message: "regime_mismatch_penalty must be in [0, 1]".to_string(),
            });
        }

        Ok(())
    }

    /// Correlation group of `symbol`; ungrouped symbols are their own group.
    pub fn correlation_group(&self, symbol: &str) -> String {
        correlation_group_of(&self.correlation_groups, symbol)
    }
}

/// Name of the group containing `symbol`, or the uppercased symbol itself.
pub fn correlation_group_of(groups: &[CorrelationGroup], symbol: &str) -> String {
    groups
        .iter()
        .find(|g| g.symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol)))
        .map(|g| g.name.clone())
        .unwrap_or_else(|| symbol.to_uppercase())
}
