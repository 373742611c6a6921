//! Order execution through an external collaborator.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use market_core::types::{ExecutionReport, OrderSide, OrderStatus, ValidatedOrder};
use market_core::{Error, Result};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Venue that accepts finalized orders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Submit a finalized order and report its fill or rejection.
    async fn submit(&self, order: &ValidatedOrder) -> anyhow::Result<ExecutionReport>;

    /// Cancel a resting order. Returns false if the venue no longer knows it.
    async fn cancel(&self, order_id: Uuid) -> anyhow::Result<bool>;
}

/// Metrics for order execution performance.
#[derive(Debug, Default, Clone)]
pub struct ExecutionMetrics {
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_rejected: u64,
    pub orders_timed_out: u64,
    pub total_volume: Decimal,
    pub total_fees: Decimal,
    pub avg_latency_us: u64,
}

/// Configuration for the order executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on one `submit` round trip.
    pub timeout: Duration,
    /// Capacity of the execution report channel.
    pub report_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            report_buffer: 1000,
        }
    }
}

/// Sends validated orders to an [`ExecutionClient`] with a deadline and keeps
/// execution metrics.
pub struct OrderExecutor {
    client: Arc<dyn ExecutionClient>,
    config: ExecutorConfig,
    /// Orders submitted and not yet reported.
    pending_orders: DashMap<Uuid, OrderStatus>,
    report_tx: mpsc::Sender<ExecutionReport>,
    /// Receiver for execution reports (taken once).
    report_rx: Option<mpsc::Receiver<ExecutionReport>>,
    metrics: RwLock<ExecutionMetrics>,
}

impl OrderExecutor {
    pub fn new(client: Arc<dyn ExecutionClient>, config: ExecutorConfig) -> Self {
        let (report_tx, report_rx) = mpsc::channel(config.report_buffer.max(1));
        Self {
            client,
            config,
            pending_orders: DashMap::new(),
            report_tx,
            report_rx: Some(report_rx),
            metrics: RwLock::new(ExecutionMetrics::default()),
        }
    }

    /// Take the execution report receiver (can only be called once).
    pub fn take_report_receiver(&mut self) -> Option<mpsc::Receiver<ExecutionReport>> {
        self.report_rx.take()
    }

    /// Execute a validated order.
    ///
    /// A venue that does not answer within the configured timeout yields
    /// `ExecutionTimeout`; the order is left pending so it can be cancelled.
    pub async fn execute(&self, order: &ValidatedOrder) -> Result<ExecutionReport> {
        let start = Instant::now();
        let request = &order.order;

        self.pending_orders.insert(request.id, OrderStatus::Pending);
        info!(
            order_id = %request.id,
            symbol = %request.symbol,
            side = ?request.side,
            quantity = %request.quantity,
            price = %request.price,
            "Executing order"
        );

        let outcome = timeout(self.config.timeout, self.client.submit(order)).await;
        let report = match outcome {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                self.pending_orders.remove(&request.id);
                self.record(|m| {
                    m.orders_submitted += 1;
                    m.orders_rejected += 1;
                });
                warn!(order_id = %request.id, error = %e, "Execution collaborator failed");
                return Err(Error::Execution {
                    message: e.to_string(),
                });
            }
            Err(_) => {
                let timeout_ms = self.config.timeout.as_millis() as u64;
                self.record(|m| {
                    m.orders_submitted += 1;
                    m.orders_timed_out += 1;
                });
                warn!(order_id = %request.id, timeout_ms, "Execution timed out");
                return Err(Error::ExecutionTimeout { timeout_ms });
            }
        };

        let latency_us = start.elapsed().as_micros() as u64;
        self.record(|m| {
            m.orders_submitted += 1;
            if report.is_success() {
                m.orders_filled += 1;
                m.total_volume += report.total_value();
                m.total_fees += report.fees_paid;
            } else {
                m.orders_rejected += 1;
            }
            m.avg_latency_us =
                (m.avg_latency_us * (m.orders_submitted - 1) + latency_us) / m.orders_submitted;
        });

        self.pending_orders.remove(&request.id);
        self.send_report(report.clone());

        debug!(
            order_id = %request.id,
            status = ?report.status,
            latency_us,
            "Order execution complete"
        );

        Ok(report)
    }

    /// Cancel a pending order.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<bool> {
        if self.pending_orders.remove(&order_id).is_none() {
            warn!(order_id = %order_id, "Order not found for cancellation");
            return Ok(false);
        }
        match timeout(self.config.timeout, self.client.cancel(order_id)).await {
            Ok(Ok(cancelled)) => {
                info!(order_id = %order_id, cancelled, "Order cancelled");
                Ok(cancelled)
            }
            Ok(Err(e)) => Err(Error::Execution {
                message: e.to_string(),
            }),
            Err(_) => Err(Error::ExecutionTimeout {
                timeout_ms: self.config.timeout.as_millis() as u64,
            }),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending_orders.len()
    }

    /// Get current execution metrics.
    pub fn metrics(&self) -> ExecutionMetrics {
        self.metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn record(&self, f: impl FnOnce(&mut ExecutionMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut metrics);
    }

    fn send_report(&self, report: ExecutionReport) {
        if self.report_tx.try_send(report).is_err() {
            debug!("No receiver for execution report");
        }
    }
}

/// Paper venue: fills the full quantity at the order price moved against the
/// taker by the slippage rate, charging `fee_rate` on notional.
#[derive(Debug, Clone)]
pub struct PaperExecutor {
    pub fee_rate: Decimal,
    pub slippage_rate: Decimal,
}

impl PaperExecutor {
    pub fn new(fee_rate: Decimal, slippage_rate: Decimal) -> Self {
        Self {
            fee_rate,
            slippage_rate,
        }
    }
}

#[async_trait]
impl ExecutionClient for PaperExecutor {
    async fn submit(&self, order: &ValidatedOrder) -> anyhow::Result<ExecutionReport> {
        let request = &order.order;
        if request.quantity <= Decimal::ZERO || request.price <= Decimal::ZERO {
            return Ok(ExecutionReport::rejected(
                request,
                "Quantity and price must be positive".to_string(),
            ));
        }

        let slip = request.price * self.slippage_rate;
        let price = match request.side {
            OrderSide::Buy => request.price + slip,
            OrderSide::Sell => request.price - slip,
        };
        let fees = request.quantity * price * self.fee_rate;

        info!(
            order_id = %request.id,
            price = %price,
            filled = %request.quantity,
            fees = %fees,
            "[PAPER] Simulated order fill"
        );

        Ok(ExecutionReport::filled(request, request.quantity, price, fees)
            .with_exchange_id(format!("paper-{}", request.id)))
    }

    async fn cancel(&self, _order_id: Uuid) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::validated_order;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_fill_applies_slippage_and_fees() {
        let executor = OrderExecutor::new(
            Arc::new(PaperExecutor::new(dec!(0.001), dec!(0.0005))),
            ExecutorConfig::default(),
        );
        let order = validated_order(OrderSide::Buy, dec!(2), dec!(100));

        let report = executor.execute(&order).await.unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.average_price, dec!(100.05));
        assert_eq!(report.fees_paid, dec!(0.2001));

        let metrics = executor.metrics();
        assert_eq!(metrics.orders_submitted, 1);
        assert_eq!(metrics.orders_filled, 1);
        assert_eq!(executor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_report_channel_receives_fill() {
        let mut executor = OrderExecutor::new(
            Arc::new(PaperExecutor::new(dec!(0), dec!(0))),
            ExecutorConfig::default(),
        );
        let mut rx = executor.take_report_receiver().unwrap();
        let order = validated_order(OrderSide::Sell, dec!(1), dec!(50));
        executor.execute(&order).await.unwrap();

        let report = rx.recv().await.unwrap();
        assert_eq!(report.order_id, order.order.id);
        assert!(executor.take_report_receiver().is_none());
    }

    #[tokio::test]
    async fn test_client_error_maps_to_execution_error() {
        let mut client = MockExecutionClient::new();
        client
            .expect_submit()
            .returning(|_| Err(anyhow::anyhow!("venue down")));

        let executor = OrderExecutor::new(Arc::new(client), ExecutorConfig::default());
        let result = executor.execute(&validated_order(OrderSide::Buy, dec!(1), dec!(10))).await;
        assert!(matches!(result, Err(Error::Execution { .. })));
        assert_eq!(executor.metrics().orders_rejected, 1);
    }

    struct HangingClient;

    #[async_trait]
    impl ExecutionClient for HangingClient {
        async fn submit(&self, _order: &ValidatedOrder) -> anyhow::Result<ExecutionReport> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::bail!("unreachable")
        }

        async fn cancel(&self, _order_id: Uuid) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_slow_venue_times_out() {
        let executor = OrderExecutor::new(
            Arc::new(HangingClient),
            ExecutorConfig {
                timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let order = validated_order(OrderSide::Buy, dec!(1), dec!(10));
        let result = executor.execute(&order).await;
        assert!(matches!(result, Err(Error::ExecutionTimeout { timeout_ms: 20 })));
        assert_eq!(executor.metrics().orders_timed_out, 1);

        // still pending, so it can be cancelled
        assert!(executor.cancel_order(order.order.id).await.unwrap());
        assert!(!executor.cancel_order(order.order.id).await.unwrap());
    }
}
