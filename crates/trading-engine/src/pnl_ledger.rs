//! Daily P&L ledger.
//!
//! Only the current day's row is mutable; a date change freezes it.
//! Unrealized P&L of positions held over midnight is rebased, so each row
//! only carries the move made during its own day.

use chrono::NaiveDate;
use market_core::types::DailyPnl;
use rust_decimal::Decimal;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DailyPnlLedger {
    current: DailyPnl,
    history: Vec<DailyPnl>,
    /// Open-book unrealized P&L at the last day boundary.
    carried_unrealized: Decimal,
    /// Open-book unrealized P&L at the last mark.
    marked_unrealized: Decimal,
}

impl DailyPnlLedger {
    pub fn new(date: NaiveDate, starting_balance: Decimal) -> Self {
        Self {
            current: DailyPnl::new(date, starting_balance),
            history: Vec::new(),
            carried_unrealized: Decimal::ZERO,
            marked_unrealized: Decimal::ZERO,
        }
    }

    pub fn today(&self) -> &DailyPnl {
        &self.current
    }

    /// Frozen rows, oldest first.
    pub fn history(&self) -> &[DailyPnl] {
        &self.history
    }

    /// Roll to `date` if it is after the current row's date. Returns the frozen
    /// row when a roll-over happened.
    pub fn roll_over(&mut self, date: NaiveDate) -> Option<&DailyPnl> {
        if date <= self.current.date {
            return None;
        }

        let opening = self.current.ending_balance;
        let mut closed = std::mem::replace(&mut self.current, DailyPnl::new(date, opening));
        closed.frozen = true;
        self.carried_unrealized = self.marked_unrealized;
        self.current.peak_equity = self.equity();

        info!(
            date = %closed.date,
            realized = %closed.realized_pnl,
            trades = closed.total_trades,
            max_drawdown = %closed.max_drawdown,
            "Daily P&L frozen"
        );

        self.history.push(closed);
        self.history.last()
    }

    /// Book realized P&L from a full or partial exit.
    pub fn record_realized(&mut self, pnl: Decimal) {
        self.current.realized_pnl += pnl;
        self.current.ending_balance = self.current.starting_balance + self.current.realized_pnl;
        self.refresh_drawdown();
    }

    /// Count a fully closed position by its total P&L.
    pub fn record_trade(&mut self, position_pnl: Decimal) {
        self.current.total_trades += 1;
        if position_pnl > Decimal::ZERO {
            self.current.winning_trades += 1;
        }
    }

    /// Book entry fees, which are realized immediately.
    pub fn record_fees(&mut self, fees: Decimal) {
        self.record_realized(-fees);
    }

    /// Refresh mark-to-market figures from the open book's total unrealized P&L.
    pub fn mark(&mut self, unrealized_pnl: Decimal, open_risk: Decimal) {
        self.marked_unrealized = unrealized_pnl;
        self.current.unrealized_pnl = self.day_unrealized(unrealized_pnl);
        self.current.risk_used = self.current.risk_used.max(open_risk);
        self.refresh_drawdown();
    }

    /// The part of the open book's `unrealized_pnl` made since the day began.
    pub fn day_unrealized(&self, unrealized_pnl: Decimal) -> Decimal {
        unrealized_pnl - self.carried_unrealized
    }

    /// Starting balance plus realized P&L and the open book's unrealized P&L.
    pub fn equity(&self) -> Decimal {
        self.current.starting_balance + self.current.realized_pnl + self.marked_unrealized
    }

    fn refresh_drawdown(&mut self) {
        let equity = self.equity();
        let day = &mut self.current;
        if equity > day.peak_equity {
            day.peak_equity = equity;
        }
        day.max_drawdown = day.max_drawdown.max(day.peak_equity - equity);
    }
}
