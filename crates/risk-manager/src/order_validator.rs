//! Final accept/reject gate for concrete order requests.

use chrono::{DateTime, Utc};
use market_core::types::{
    LimitType, OrderRequest, OrderSide, RiskAction, RiskEvent, RiskEventType, RiskSettings, Severity,
    Signal, ValidatedOrder,
};
use market_core::{Error, Result};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::events::RiskEventLog;

/// The open signal an order claims to realize, as the account knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalBinding {
    pub symbol: String,
    pub side: OrderSide,
    /// Signal price; the size ceiling is computed at this price.
    pub price: Decimal,
    /// An accepted order for the same signal is still awaiting its fill.
    pub has_pending_order: bool,
}

impl SignalBinding {
    /// `None` for signals that cannot be traded (hold, or no exit plan).
    pub fn from_signal(signal: &Signal, has_pending_order: bool) -> Option<Self> {
        if !signal.is_actionable() {
            return None;
        }
        Some(Self {
            symbol: signal.symbol.clone(),
            side: signal.side.order_side()?,
            price: signal.price,
            has_pending_order,
        })
    }
}

/// Account state the validator checks an order against.
pub struct ValidationContext<'a> {
    pub settings: &'a RiskSettings,
    pub breaker: &'a CircuitBreaker,
    /// `None` when the order's signal is not open on the account.
    pub signal: Option<&'a SignalBinding>,
    /// Open positions plus accepted orders awaiting a fill.
    pub open_positions: usize,
    pub capital: Decimal,
    /// Capital not tied up in open positions or accepted orders.
    pub available_balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderValidator {
    /// Maximum fees+slippage as a fraction of the first take-profit reward.
    max_cost_fraction: Decimal,
}

impl Default for OrderValidator {
    fn default() -> Self {
        Self::new(Decimal::new(25, 2))
    }
}

impl OrderValidator {
    pub fn new(max_cost_fraction: Decimal) -> Self {
        Self { max_cost_fraction }
    }

    pub fn max_cost_fraction(&self) -> Decimal {
        self.max_cost_fraction
    }

    /// Accept `order` unchanged or reject it. Limit breaches are recorded.
    pub fn validate(
        &self,
        order: OrderRequest,
        ctx: &ValidationContext<'_>,
        now: DateTime<Utc>,
        events: &mut RiskEventLog,
    ) -> Result<ValidatedOrder> {
        match self.check(&order, ctx) {
            Ok(()) => {
                info!(
                    order_id = %order.id,
                    symbol = %order.symbol,
                    quantity = %order.quantity,
                    notional = %order.notional(),
                    "Order accepted"
                );
                Ok(ValidatedOrder {
                    order,
                    validated_at: now,
                })
            }
            Err(e) => {
                warn!(order_id = %order.id, symbol = %order.symbol, error = %e, "Order rejected");
                if matches!(e, Error::LimitBreach { .. }) {
                    events.record(RiskEvent::new(
                        RiskEventType::OrderRejected,
                        Severity::Warning,
                        format!("Order {} for {}: {}", order.id, order.symbol, e),
                        "order_validator",
                        vec![RiskAction::RejectOrder],
                        now,
                    ));
                }
                Err(e)
            }
        }
    }

    fn check(&self, order: &OrderRequest, ctx: &ValidationContext<'_>) -> Result<()> {
        ctx.breaker.ensure_open(order.sizing.breaker_epoch)?;

        check_shape(order)?;

        let signal = check_binding(order, ctx.signal)?;

        let settings = ctx.settings;
        if ctx.open_positions >= settings.max_positions {
            return Err(Error::LimitBreach {
                limit: LimitType::PositionCount,
                message: format!(
                    "{} open positions, maximum is {}",
                    ctx.open_positions, settings.max_positions
                ),
            });
        }
        let max_size = order
            .sizing
            .max_size
            .min(settings.max_position_size * ctx.capital / signal.price);
        if order.quantity > max_size {
            return Err(Error::LimitBreach {
                limit: LimitType::PositionSize,
                message: format!("quantity {} exceeds sized maximum {}", order.quantity, max_size),
            });
        }
        let max_notional = settings.max_position_size * ctx.capital;
        if order.notional() > max_notional {
            return Err(Error::LimitBreach {
                limit: LimitType::PositionSize,
                message: format!(
                    "notional {} exceeds {} ({} of capital {})",
                    order.notional(),
                    max_notional,
                    settings.max_position_size,
                    ctx.capital
                ),
            });
        }

        let costs = order.estimated_costs();
        let reward = order.first_target_reward();
        if costs > self.max_cost_fraction * reward {
            return Err(Error::ExcessiveCost {
                costs,
                reward,
                max_fraction: self.max_cost_fraction,
            });
        }

        let required = order.notional() + order.estimated_fees;
        if ctx.available_balance < required {
            return Err(Error::InsufficientBalance {
                required,
                available: ctx.available_balance,
            });
        }

        Ok(())
    }
}

/// Quantity and prices must be positive, with the stop and target on opposite sides of entry.
fn check_shape(order: &OrderRequest) -> Result<()> {
    if order.quantity <= Decimal::ZERO || order.price <= Decimal::ZERO {
        return Err(Error::InvalidInputs(format!(
            "quantity {} and price {} must be positive",
            order.quantity, order.price
        )));
    }
    if order.estimated_fees < Decimal::ZERO || order.estimated_slippage < Decimal::ZERO {
        return Err(Error::InvalidInputs("cost estimates must be non-negative".to_string()));
    }
    let levels_ok = match order.side {
        OrderSide::Buy => order.stop_loss < order.price && order.take_profit > order.price,
        OrderSide::Sell => order.stop_loss > order.price && order.take_profit < order.price,
    };
    if !levels_ok {
        return Err(Error::InvalidInputs(format!(
            "stop {} and take-profit {} are inconsistent with a {:?} at {}",
            order.stop_loss, order.take_profit, order.side, order.price
        )));
    }
    if order.sizing.symbol != order.symbol {
        return Err(Error::InvalidInputs(format!(
            "sizing for {} attached to a {} order",
            order.sizing.symbol, order.symbol
        )));
    }
    Ok(())
}

/// The order must realize an open signal, on its symbol and side, once.
fn check_binding<'a>(order: &OrderRequest, signal: Option<&'a SignalBinding>) -> Result<&'a SignalBinding> {
    let signal =
        signal.ok_or_else(|| Error::NotFound(format!("actionable open signal {}", order.signal_id)))?;
    if signal.symbol != order.symbol || signal.side != order.side {
        return Err(Error::InvalidInputs(format!(
            "{:?} {} order does not match signal {} ({:?} {})",
            order.side, order.symbol, order.signal_id, signal.side, signal.symbol
        )));
    }
    if signal.has_pending_order {
        return Err(Error::InvalidInputs(format!(
            "signal {} already has an accepted order awaiting its fill",
            order.signal_id
        )));
    }
    Ok(signal)
}
