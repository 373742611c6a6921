//! tradeguard: risk-and-execution control core for regime-aware trading
//!
//! This is the root crate that provides benchmark and end-to-end test access to
//! the internal modules. For actual functionality, use the individual crates directly:
//!
//! - `market-core`: Domain types, error kinds, configuration
//! - `signal-engine`: Indicators, regime classification, strategies, learned-score gate
//! - `risk-manager`: Position sizing, limits, circuit breaker, exit rules, order validation
//! - `trading-engine`: Order execution, position bookkeeping, daily P&L
//! - `api-server`: Account actor, action boundary, HTTP API, live pipeline

// Re-export for benchmarks
pub use api_server as api;
pub use market_core as core;
pub use risk_manager as risk;
pub use signal_engine as signals;
pub use trading_engine as trading;
