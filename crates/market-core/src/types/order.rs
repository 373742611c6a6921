//! Order types for the validation and execution boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SizingResult;

/// Side of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Current status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order submitted to the execution collaborator.
    Pending,
    /// Order partially filled.
    PartiallyFilled,
    /// Order fully filled.
    Filled,
    /// Order cancelled.
    Cancelled,
    /// Order rejected by the venue.
    Rejected,
}

/// A concrete order request submitted for validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: Uuid,
    /// Signal this order realizes.
    pub signal_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Expected entry price.
    pub price: Decimal,
    pub stop_loss: Decimal,
    /// First take-profit level.
    pub take_profit: Decimal,
    pub estimated_fees: Decimal,
    pub estimated_slippage: Decimal,
    /// Sizing snapshot the request was built from.
    pub sizing: SizingResult,
    pub created_at: DateTime<Utc>,
}

impl OrderRequest {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }

    pub fn estimated_costs(&self) -> Decimal {
        self.estimated_fees + self.estimated_slippage
    }

    /// Reward at the first take-profit for the full quantity.
    pub fn first_target_reward(&self) -> Decimal {
        (self.take_profit - self.price).abs() * self.quantity
    }

    /// Amount lost if the stop is hit.
    pub fn risk_amount(&self) -> Decimal {
        (self.price - self.stop_loss).abs() * self.quantity
    }
}

/// An order that passed every validation gate, unchanged from its request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedOrder {
    pub order: OrderRequest,
    pub validated_at: DateTime<Utc>,
}

/// Report returned by the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: Uuid,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub requested_quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_price: Decimal,
    pub fees_paid: Decimal,
    pub executed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl ExecutionReport {
    pub fn filled(
        order: &OrderRequest,
        filled_quantity: Decimal,
        average_price: Decimal,
        fees_paid: Decimal,
    ) -> Self {
        let status = if filled_quantity >= order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        Self {
            order_id: order.id,
            exchange_order_id: None,
            symbol: order.symbol.clone(),
            side: order.side,
            status,
            requested_quantity: order.quantity,
            filled_quantity,
            average_price,
            fees_paid,
            executed_at: Utc::now(),
            error_message: None,
        }
    }

    pub fn rejected(order: &OrderRequest, error: String) -> Self {
        Self {
            order_id: order.id,
            exchange_order_id: None,
            symbol: order.symbol.clone(),
            side: order.side,
            status: OrderStatus::Rejected,
            requested_quantity: order.quantity,
            filled_quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            executed_at: Utc::now(),
            error_message: Some(error),
        }
    }

    pub fn with_exchange_id(mut self, id: String) -> Self {
        self.exchange_order_id = Some(id);
        self
    }

    pub fn total_value(&self) -> Decimal {
        self.filled_quantity * self.average_price
    }

    pub fn is_success(&self) -> bool {
        self.status == OrderStatus::Filled || self.status == OrderStatus::PartiallyFilled
    }
}
