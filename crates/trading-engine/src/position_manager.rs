//! Position bookkeeping for filled orders.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use market_core::types::{ExecutionReport, ExitPlan, OrderRequest, Position, StrategyType};
use market_core::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// A realized exit, full or partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position_id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub quantity: Decimal,
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
    /// Whether the position is now fully closed.
    pub final_exit: bool,
    /// Total realized P&L of the position when `final_exit`.
    pub position_pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Tracks every position opened from an accepted order.
pub struct PositionManager {
    /// Positions keyed by position ID, open and closed.
    positions: DashMap<Uuid, Position>,
    /// Signal ID to position ID; a signal yields at most one position.
    by_signal: DashMap<Uuid, Uuid>,
    total_realized_pnl: Arc<RwLock<Decimal>>,
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionManager {
    pub fn new() -> Self {
        Self {
            positions: DashMap::new(),
            by_signal: DashMap::new(),
            total_realized_pnl: Arc::new(RwLock::new(Decimal::ZERO)),
        }
    }

    /// Open a position from a successful fill.
    pub fn open_from_fill(
        &self,
        order: &OrderRequest,
        report: &ExecutionReport,
        strategy_type: StrategyType,
        exit_plan: ExitPlan,
    ) -> Result<Position> {
        if !report.is_success() || report.filled_quantity <= Decimal::ZERO {
            return Err(Error::InvalidInputs(format!(
                "order {} has no fill to open a position from",
                order.id
            )));
        }
        if report.order_id != order.id {
            return Err(Error::InvalidInputs(format!(
                "report for {} does not match order {}",
                report.order_id, order.id
            )));
        }
        if self.by_signal.contains_key(&order.signal_id) {
            return Err(Error::DuplicateSignal {
                symbol: order.symbol.clone(),
                strategy: strategy_type.to_string(),
            });
        }

        let position = Position::from_fill(order, report, strategy_type, exit_plan);
        info!(
            position_id = %position.id,
            signal_id = %position.signal_id,
            symbol = %position.symbol,
            side = ?position.side,
            quantity = %position.quantity,
            entry = %position.entry_price,
            stop = %position.stop_loss,
            "Position opened"
        );

        self.by_signal.insert(order.signal_id, position.id);
        self.positions.insert(position.id, position.clone());
        Ok(position)
    }

    pub fn get_position(&self, id: Uuid) -> Option<Position> {
        self.positions.get(&id).map(|p| p.clone())
    }

    pub fn position_for_signal(&self, signal_id: Uuid) -> Option<Position> {
        self.by_signal
            .get(&signal_id)
            .and_then(|id| self.get_position(*id))
    }

    pub fn all_positions(&self) -> Vec<Position> {
        self.positions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.positions.iter().filter(|e| e.value().is_open()).count()
    }

    pub fn open_positions_for_symbol(&self, symbol: &str) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|e| e.value().is_open() && e.value().symbol == symbol)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Mark every open position on `symbol` to `price`. Returns the IDs touched.
    pub fn update_price(&self, symbol: &str, price: Decimal) -> Vec<Uuid> {
        let mut touched = Vec::new();
        for mut entry in self.positions.iter_mut() {
            let position = entry.value_mut();
            if position.is_open() && position.symbol == symbol {
                position.update_price(price);
                touched.push(position.id);
            }
        }
        debug!(symbol = %symbol, price = %price, positions = touched.len(), "Marked positions");
        touched
    }

    /// Apply `f` to an open position.
    pub fn update_position(&self, id: Uuid, f: impl FnOnce(&mut Position)) -> bool {
        match self.positions.get_mut(&id) {
            Some(mut entry) if entry.is_open() => {
                f(entry.value_mut());
                true
            }
            _ => false,
        }
    }

    pub fn move_stop(&self, id: Uuid, stop_loss: Decimal) -> bool {
        self.update_position(id, |p| {
            info!(position_id = %p.id, from = %p.stop_loss, to = %stop_loss, "Stop moved");
            p.move_stop(stop_loss);
        })
    }

    /// Close `quantity` of a position at `price`.
    pub async fn close_partial(&self, id: Uuid, quantity: Decimal, price: Decimal) -> Result<ClosedTrade> {
        let trade = {
            let mut entry = self
                .positions
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("position {}", id)))?;
            let pnl = entry
                .close_partial(quantity, price)
                .map_err(Error::InvalidInputs)?;
            ClosedTrade {
                position_id: id,
                signal_id: entry.signal_id,
                symbol: entry.symbol.clone(),
                quantity,
                exit_price: price,
                realized_pnl: pnl,
                final_exit: false,
                position_pnl: entry.realized_pnl,
                closed_at: Utc::now(),
            }
        };

        *self.total_realized_pnl.write().await += trade.realized_pnl;
        info!(
            position_id = %id,
            quantity = %quantity,
            price = %price,
            pnl = %trade.realized_pnl,
            "Position partially closed"
        );
        Ok(trade)
    }

    /// Close the remainder of a position. A position closes exactly once.
    pub async fn close_position(&self, id: Uuid, price: Decimal) -> Result<ClosedTrade> {
        let now = Utc::now();
        let trade = {
            let mut entry = self
                .positions
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("position {}", id)))?;
            let quantity = entry.quantity;
            let pnl = entry.close(price, now).map_err(Error::InvalidInputs)?;
            ClosedTrade {
                position_id: id,
                signal_id: entry.signal_id,
                symbol: entry.symbol.clone(),
                quantity,
                exit_price: price,
                realized_pnl: pnl,
                final_exit: true,
                position_pnl: entry.realized_pnl,
                closed_at: now,
            }
        };

        *self.total_realized_pnl.write().await += trade.realized_pnl;
        info!(
            position_id = %id,
            price = %price,
            pnl = %trade.position_pnl,
            "Position closed"
        );
        Ok(trade)
    }

    /// Notional of open positions at their marks.
    pub fn total_exposure(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.value().notional())
            .sum()
    }

    /// Open notional per symbol.
    pub fn exposure_by_symbol(&self) -> HashMap<String, Decimal> {
        let mut out: HashMap<String, Decimal> = HashMap::new();
        for entry in self.positions.iter().filter(|e| e.value().is_open()) {
            *out.entry(entry.symbol.clone()).or_default() += entry.notional();
        }
        out
    }

    /// Sum of risk to stop over open positions.
    pub fn open_risk(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.value().risk_amount)
            .sum()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.value().unrealized_pnl)
            .sum()
    }

    /// Largest single open notional.
    pub fn largest_position(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.value().notional())
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn stats(&self) -> PositionManagerStats {
        let positions = self.all_positions();
        let open: Vec<_> = positions.iter().filter(|p| p.is_open()).collect();

        PositionManagerStats {
            total_positions: positions.len(),
            open_positions: open.len(),
            total_exposure: open.iter().map(|p| p.notional()).sum(),
            open_risk: open.iter().map(|p| p.risk_amount).sum(),
            total_unrealized_pnl: open.iter().map(|p| p.unrealized_pnl).sum(),
            total_realized_pnl: *self.total_realized_pnl.read().await,
            trend_positions: open
                .iter()
                .filter(|p| p.strategy_type == StrategyType::TrendFollowing)
                .count(),
            mean_reversion_positions: open
                .iter()
                .filter(|p| p.strategy_type == StrategyType::MeanReversion)
                .count(),
        }
    }
}

/// Summary statistics for the position manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionManagerStats {
    pub total_positions: usize,
    pub open_positions: usize,
    pub total_exposure: Decimal,
    pub open_risk: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub trend_positions: usize,
    pub mean_reversion_positions: usize,
}
