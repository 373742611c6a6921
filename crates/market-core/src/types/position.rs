//! Position tracking types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExecutionReport, ExitPlan, OrderRequest, OrderSide, StrategyType};

/// Lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A position opened from an accepted, filled order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub order_id: Uuid,
    pub symbol: String,
    pub strategy_type: StrategyType,
    pub side: OrderSide,
    pub entry_price: Decimal,
    /// Remaining open quantity.
    pub quantity: Decimal,
    pub initial_quantity: Decimal,
    pub stop_loss: Decimal,
    /// First take-profit level.
    pub take_profit: Decimal,
    pub exit_plan: ExitPlan,
    pub status: PositionStatus,
    /// Loss at the current stop for the remaining quantity.
    pub risk_amount: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub fees_paid: Decimal,
    /// Whether the first take-profit tier has been taken.
    pub first_target_hit: bool,
    /// Best price seen since entry (highest for longs, lowest for shorts).
    pub watermark: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Build an open position from a successful execution report.
    pub fn from_fill(
        order: &OrderRequest,
        report: &ExecutionReport,
        strategy_type: StrategyType,
        exit_plan: ExitPlan,
    ) -> Self {
        let entry_price = report.average_price;
        let quantity = report.filled_quantity;
        let stop_loss = exit_plan.stop_loss;
        Self {
            id: Uuid::new_v4(),
            signal_id: order.signal_id,
            order_id: order.id,
            symbol: order.symbol.clone(),
            strategy_type,
            side: order.side,
            entry_price,
            quantity,
            initial_quantity: quantity,
            stop_loss,
            take_profit: exit_plan.take_profit_1,
            exit_plan,
            status: PositionStatus::Open,
            risk_amount: (entry_price - stop_loss).abs() * quantity,
            mark_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: -report.fees_paid,
            fees_paid: report.fees_paid,
            first_target_hit: false,
            watermark: entry_price,
            opened_at: report.executed_at,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Notional at the current mark.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.mark_price
    }

    /// P&L of `quantity` units exited at `price`.
    fn pnl_at(&self, price: Decimal, quantity: Decimal) -> Decimal {
        self.side.sign() * (price - self.entry_price) * quantity
    }

    /// Mark the position to `price`.
    pub fn update_price(&mut self, price: Decimal) {
        if !self.is_open() {
            return;
        }
        self.mark_price = price;
        self.unrealized_pnl = self.pnl_at(price, self.quantity);
        let improved = match self.side {
            OrderSide::Buy => price > self.watermark,
            OrderSide::Sell => price < self.watermark,
        };
        if improved {
            self.watermark = price;
        }
    }

    /// Move the stop; risk is recomputed for the remaining quantity.
    pub fn move_stop(&mut self, stop_loss: Decimal) {
        self.stop_loss = stop_loss;
        self.risk_amount = (self.entry_price - stop_loss).abs() * self.quantity;
    }

    /// Close part of the position. Returns the realized P&L of the slice.
    pub fn close_partial(
        &mut self,
        quantity: Decimal,
        price: Decimal,
    ) -> std::result::Result<Decimal, String> {
        if !self.is_open() {
            return Err(format!("Position {} is already closed", self.id));
        }
        if quantity <= Decimal::ZERO || quantity >= self.quantity {
            return Err(format!(
                "Partial close quantity {} must be in (0, {})",
                quantity, self.quantity
            ));
        }
        let pnl = self.pnl_at(price, quantity);
        self.realized_pnl += pnl;
        self.quantity -= quantity;
        self.risk_amount = (self.entry_price - self.stop_loss).abs() * self.quantity;
        self.update_price(price);
        Ok(pnl)
    }

    /// Close the remaining quantity. Valid exactly once.
    pub fn close(
        &mut self,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> std::result::Result<Decimal, String> {
        if !self.is_open() {
            return Err(format!("Position {} is already closed", self.id));
        }
        let pnl = self.pnl_at(price, self.quantity);
        self.realized_pnl += pnl;
        self.mark_price = price;
        self.unrealized_pnl = Decimal::ZERO;
        self.risk_amount = Decimal::ZERO;
        self.status = PositionStatus::Closed;
        self.closed_at = Some(at);
        Ok(pnl)
    }
}
