//! Daily P&L aggregate.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One row per account per day. Frozen once the day rolls over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnl {
    pub date: NaiveDate,
    pub starting_balance: Decimal,
    pub ending_balance: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_trades: u32,
    pub winning_trades: u32,
    /// Peak open risk observed during the day.
    pub risk_used: Decimal,
    /// Largest peak-to-trough equity decline during the day.
    pub max_drawdown: Decimal,
    /// Intraday equity high used for `max_drawdown`.
    pub peak_equity: Decimal,
    pub frozen: bool,
}

impl DailyPnl {
    pub fn new(date: NaiveDate, starting_balance: Decimal) -> Self {
        Self {
            date,
            starting_balance,
            ending_balance: starting_balance,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            total_trades: 0,
            winning_trades: 0,
            risk_used: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            peak_equity: starting_balance,
            frozen: false,
        }
    }

    /// Realized plus unrealized.
    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    pub fn win_rate(&self) -> Option<Decimal> {
        if self.total_trades == 0 {
            None
        } else {
            Some(Decimal::from(self.winning_trades) / Decimal::from(self.total_trades))
        }
    }
}
