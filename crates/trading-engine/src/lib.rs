//! Trading Engine
//!
//! Order execution, position bookkeeping and the daily P&L ledger.

pub mod executor;
pub mod pnl_ledger;
pub mod position_manager;

pub use executor::{ExecutionClient, ExecutionMetrics, ExecutorConfig, OrderExecutor, PaperExecutor};
pub use pnl_ledger::DailyPnlLedger;
pub use position_manager::{ClosedTrade, PositionManager, PositionManagerStats};
