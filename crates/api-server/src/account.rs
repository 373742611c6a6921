//! Per-account risk actor.
//!
//! One task owns every piece of mutable risk state for an account: settings,
//! breaker, limit statuses, regime state, open signals, positions and the
//! daily ledger. Callers talk to it through [`AccountHandle`], so sizing,
//! validation and settings changes are serialized.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use market_core::config::{AppConfig, EngineSettings};
use market_core::types::{
    DailyPnl, ExecutionReport, ExitPlan, FeatureVector, IndicatorSet, LimitType,
    MlDecision, OrderRequest, Position, Regime, RegimeChange, RegimeState, RiskAction, RiskEvent,
    RiskEventType, RiskLimitStatus, RiskSettings, Severity, Signal, SizingResult, StrategyType,
    ValidatedOrder,
};
use market_core::{Error, Result};
use risk_manager::exit_rules;
use risk_manager::{
    is_low_liquidity, BreakerState, BreakerStatus, CircuitBreaker, CircuitBreakerConfig,
    ExposureSnapshot, MonitorUpdate, OrderValidator, PositionSizer, RiskEventLog, RiskMonitor,
    SignalBinding, SizerConfig, SizingRequest, TradeStats, TripReason, ValidationContext,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use signal_engine::{FeatureExtractor, RegimeClassifier, RegimeTracker, SignalGenerator};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use trading_engine::{ClosedTrade, DailyPnlLedger, PositionManager};
use uuid::Uuid;

const COMMAND_BUFFER: usize = 256;
const MAX_DECISIONS: usize = 1_000;

/// A generated signal with the features it will be scored on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalCandidate {
    pub signal: Signal,
    pub features: FeatureVector,
}

/// Result of feeding completed bars through regime and strategy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub symbol: String,
    pub regime: RegimeState,
    /// Base regime strategies are matched against, after the dwell debounce.
    pub execution_regime: Regime,
    pub regime_changes: Vec<RegimeChange>,
    pub signals: Vec<SignalCandidate>,
    /// Signals dropped because their engine already had one open.
    pub duplicates: usize,
}

/// Inputs for `calculate_position_size`. Either `signal_id` names an open
/// signal, or `symbol`, `price` and `stop_loss` are given explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizingParams {
    #[serde(default)]
    pub signal_id: Option<Uuid>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub atr_pct: Option<Decimal>,
    #[serde(default)]
    pub trade_stats: Option<TradeStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: Decimal,
    pub positions_marked: usize,
    pub exits: Vec<ClosedTrade>,
    pub breaker_state: BreakerState,
}

/// Snapshot returned by `get_risk_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStatus {
    pub can_trade: bool,
    pub breaker: BreakerStatus,
    pub limits: Vec<RiskLimitStatus>,
    pub settings: RiskSettings,
    pub daily_pnl: DailyPnl,
    pub equity: Decimal,
    pub open_positions: Vec<Position>,
    pub open_signals: usize,
    pub unresolved_events: usize,
}

/// An accepted order awaiting its fill, with what is needed to book it.
#[derive(Debug, Clone)]
struct PendingOrder {
    validated: ValidatedOrder,
    strategy_type: StrategyType,
    exit_plan: ExitPlan,
}

/// All mutable risk state of one account.
pub struct Account {
    settings: RiskSettings,
    engine: EngineSettings,
    breaker: CircuitBreaker,
    monitor: RiskMonitor,
    sizer: PositionSizer,
    validator: OrderValidator,
    positions: Arc<PositionManager>,
    ledger: DailyPnlLedger,
    events: RiskEventLog,
    classifier: RegimeClassifier,
    regimes: RegimeTracker,
    generator: SignalGenerator,
    features: FeatureExtractor,
    /// Open signals by ID, kept until resolved.
    signals: HashMap<Uuid, Signal>,
    /// Accepted orders awaiting a fill report.
    pending_orders: HashMap<Uuid, PendingOrder>,
    decisions: VecDeque<MlDecision>,
    last_rsi: HashMap<String, f64>,
}

impl Account {
    /// Build an account from validated configuration. Invalid settings are fatal.
    pub fn new(config: &AppConfig, now: DateTime<Utc>) -> Result<Self> {
        config.validate()?;

        let settings = config.risk.clone();
        let engine = config.engine.clone();
        let capital = engine.starting_capital;

        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig {
                enabled: settings.circuit_breaker_enabled,
                drawdown_threshold: settings.circuit_breaker_threshold,
                pause_hours: engine.daily_loss_pause_hours,
            },
            capital,
            now,
        );
        let sizer = PositionSizer::new(SizerConfig {
            high_volatility_factor: engine.high_volatility_size_factor,
            low_liquidity_factor: engine.low_liquidity_size_factor,
            target_volatility: engine.target_volatility,
        });

        info!(
            capital = %capital,
            max_daily_loss = %settings.max_daily_loss,
            sizing = settings.position_sizing_method.as_str(),
            max_positions = settings.max_positions,
            "Account initialized"
        );

        Ok(Self {
            monitor: RiskMonitor::new(settings.clone(), config.correlation_groups.clone()),
            validator: OrderValidator::new(engine.max_cost_fraction),
            regimes: RegimeTracker::new(Duration::minutes(engine.regime_min_dwell_minutes)),
            generator: SignalGenerator::new(&config.strategy),
            ledger: DailyPnlLedger::new(now.date_naive(), capital),
            positions: Arc::new(PositionManager::new()),
            events: RiskEventLog::new(),
            classifier: RegimeClassifier::default(),
            features: FeatureExtractor::new(),
            signals: HashMap::new(),
            pending_orders: HashMap::new(),
            decisions: VecDeque::new(),
            last_rsi: HashMap::new(),
            settings,
            engine,
            breaker,
            sizer,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn positions(&self) -> Arc<PositionManager> {
        self.positions.clone()
    }

    pub fn events(&self) -> &RiskEventLog {
        &self.events
    }

    pub fn decisions(&self) -> &VecDeque<MlDecision> {
        &self.decisions
    }

    pub fn open_signal(&self, id: Uuid) -> Option<&Signal> {
        self.signals.get(&id)
    }

    /// Cash balance: starting balance plus realized P&L for the day.
    pub fn capital(&self) -> Decimal {
        self.ledger.today().ending_balance
    }

    /// Feed consecutive indicator sets for one symbol. Earlier sets only
    /// advance state; signals come from the last one.
    pub async fn evaluate(
        &mut self,
        sets: &[IndicatorSet],
        orderbook_imbalance: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Evaluation> {
        let Some((latest, history)) = sets.split_last() else {
            return Err(Error::InvalidInputs("no indicator sets to evaluate".to_string()));
        };
        if sets.iter().any(|s| s.symbol != latest.symbol) {
            return Err(Error::InvalidInputs("indicator sets span several symbols".to_string()));
        }

        let mut regime_changes = Vec::new();
        for set in history {
            self.observe_regime(set, &mut regime_changes);
            self.features.observe(set);
            self.generator.prime(set);
        }
        let regime = self.observe_regime(latest, &mut regime_changes);
        self.last_rsi.insert(latest.symbol.clone(), latest.rsi);

        let atr_pct = latest.atr_pct();
        if atr_pct >= self.engine.volatility_spike_atr_pct {
            let description = format!(
                "{} ATR/price {:.4} at or above spike threshold {:.4}",
                latest.symbol, atr_pct, self.engine.volatility_spike_atr_pct
            );
            self.trigger(TripReason::VolatilitySpike, description, "indicator_engine", now)
                .await;
        }

        let execution_regime = self
            .regimes
            .execution_regime(&latest.symbol)
            .unwrap_or(regime.base_regime);

        let features = self.features.extract(latest, &regime, orderbook_imbalance);
        let mut signals = Vec::new();
        let mut duplicates = 0;

        if self.breaker.can_trade() {
            for result in self.generator.evaluate(latest, execution_regime) {
                match result {
                    Ok(signal) => {
                        self.signals.insert(signal.id, signal.clone());
                        signals.push(SignalCandidate {
                            signal,
                            features: features.clone(),
                        });
                    }
                    Err(Error::DuplicateSignal { symbol, strategy }) => {
                        debug!(symbol = %symbol, strategy = %strategy, "Duplicate signal ignored");
                        duplicates += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        } else {
            self.generator.prime(latest);
            debug!(
                symbol = %latest.symbol,
                breaker = %self.breaker.state(),
                "Breaker not active; no signals emitted"
            );
        }

        Ok(Evaluation {
            symbol: latest.symbol.clone(),
            regime,
            execution_regime,
            regime_changes,
            signals,
            duplicates,
        })
    }

    fn observe_regime(&mut self, set: &IndicatorSet, changes: &mut Vec<RegimeChange>) -> RegimeState {
        let state = self.classifier.classify(set);
        if let Some(change) = self.regimes.observe(state.clone()) {
            changes.push(change);
        }
        state
    }

    /// Keep a gate decision; rejected signals are resolved.
    pub fn record_decision(&mut self, decision: MlDecision) {
        if !decision.executed {
            self.resolve_signal(decision.signal_ref, &decision.reason);
        }
        if self.decisions.len() == MAX_DECISIONS {
            self.decisions.pop_front();
        }
        self.decisions.push_back(decision);
    }

    pub fn resolve_signal(&mut self, signal_id: Uuid, reason: &str) -> bool {
        let known = self.signals.remove(&signal_id).is_some();
        let was_open = self.generator.resolve(signal_id);
        if known || was_open {
            info!(signal_id = %signal_id, reason = %reason, "Signal resolved");
        }
        known || was_open
    }

    /// Size an order from an open signal or explicit inputs.
    pub fn size_position(&self, params: &SizingParams, now: DateTime<Utc>) -> Result<SizingResult> {
        let (symbol, price, stop_distance, confidence, atr_pct) = match params.signal_id {
            Some(id) => {
                let signal = self
                    .signals
                    .get(&id)
                    .ok_or_else(|| Error::NotFound(format!("open signal {}", id)))?;
                let stop_distance = signal.stop_distance().ok_or_else(|| {
                    Error::InvalidInputs(format!("signal {} has no exit plan", id))
                })?;
                (
                    signal.symbol.clone(),
                    signal.price,
                    stop_distance,
                    signal.confidence,
                    Decimal::from_f64_retain(signal.indicators.atr_pct()),
                )
            }
            None => {
                let symbol = params
                    .symbol
                    .clone()
                    .ok_or_else(|| Error::InvalidInputs("symbol or signal_id is required".to_string()))?;
                let price = params
                    .price
                    .ok_or_else(|| Error::InvalidInputs("price is required".to_string()))?;
                let stop_loss = params
                    .stop_loss
                    .ok_or_else(|| Error::InvalidInputs("stop_loss is required".to_string()))?;
                (
                    symbol,
                    price,
                    (price - stop_loss).abs(),
                    params.confidence.unwrap_or(50.0),
                    params.atr_pct,
                )
            }
        };

        let snapshot = self.sizing_snapshot();
        let high_volatility = self
            .regimes
            .current(&symbol)
            .map(|r| r.is_high_volatility())
            .unwrap_or(false);

        let request = SizingRequest {
            remaining_risk_budget: self.monitor.remaining_risk_budget(&snapshot),
            remaining_symbol_budget: self.monitor.remaining_symbol_budget(&snapshot, &symbol),
            symbol,
            capital: snapshot.capital,
            price,
            stop_distance,
            atr_pct: params.atr_pct.or(atr_pct),
            trade_stats: params.trade_stats.or_else(|| self.trade_stats()),
            confidence,
            high_volatility,
            low_liquidity: is_low_liquidity(now),
            breaker_epoch: self.breaker.epoch(),
        };
        self.sizer.calculate(&self.settings, &request, now)
    }

    /// Win rate and average win/loss over closed positions.
    fn trade_stats(&self) -> Option<TradeStats> {
        let closed: Vec<Decimal> = self
            .positions
            .all_positions()
            .into_iter()
            .filter(|p| !p.is_open())
            .map(|p| p.realized_pnl)
            .collect();
        let wins: Vec<Decimal> = closed.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = closed.iter().copied().filter(|p| *p < Decimal::ZERO).collect();
        if wins.is_empty() || losses.is_empty() {
            return None;
        }
        let avg = |v: &[Decimal]| v.iter().copied().sum::<Decimal>() / Decimal::from(v.len());
        Some(TradeStats {
            win_rate: Decimal::from(wins.len()) / Decimal::from(closed.len()),
            avg_win: avg(&wins),
            avg_loss: avg(&losses).abs(),
        })
    }

    /// Run the final gate on `order`, which must realize one of this
    /// account's open signals. Rejections resolve the order's signal unless
    /// another order for it is already awaiting a fill.
    pub fn validate_order(&mut self, order: OrderRequest, now: DateTime<Utc>) -> Result<ValidatedOrder> {
        let signal_id = order.signal_id;
        let has_pending_order = self
            .pending_orders
            .values()
            .any(|p| p.validated.order.signal_id == signal_id);
        let signal = self.signals.get(&signal_id);
        let binding = signal.and_then(|s| SignalBinding::from_signal(s, has_pending_order));
        let booking = signal.and_then(|s| Some((s.strategy_type, s.exit_plan.clone()?)));

        let capital = self.capital();
        let available_balance = capital - self.positions.total_exposure() - self.pending_commitment();
        let ctx = ValidationContext {
            settings: &self.settings,
            breaker: &self.breaker,
            signal: binding.as_ref(),
            open_positions: self.positions.open_count() + self.pending_orders.len(),
            capital,
            available_balance,
        };

        match self.validator.validate(order, &ctx, now, &mut self.events) {
            Ok(validated) => {
                let Some((strategy_type, exit_plan)) = booking else {
                    return Err(Error::NotFound(format!("open signal {}", signal_id)));
                };
                self.pending_orders.insert(
                    validated.order.id,
                    PendingOrder {
                        validated: validated.clone(),
                        strategy_type,
                        exit_plan,
                    },
                );
                Ok(validated)
            }
            Err(e) => {
                if !has_pending_order {
                    self.resolve_signal(signal_id, e.code());
                }
                Err(e)
            }
        }
    }

    /// Notional plus fees tied up in accepted orders awaiting a fill.
    fn pending_commitment(&self) -> Decimal {
        self.pending_orders
            .values()
            .map(|p| p.validated.order.notional() + p.validated.order.estimated_fees)
            .sum()
    }

    /// Size, build and validate the order for an open signal in one step.
    pub fn prepare_order(&mut self, signal_id: Uuid, now: DateTime<Utc>) -> Result<ValidatedOrder> {
        let signal = self
            .signals
            .get(&signal_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("open signal {}", signal_id)))?;

        let built = self.build_order(&signal, now);
        match built {
            Ok(order) => self.validate_order(order, now),
            Err(e) => {
                self.resolve_signal(signal_id, e.code());
                Err(e)
            }
        }
    }

    fn build_order(&self, signal: &Signal, now: DateTime<Utc>) -> Result<OrderRequest> {
        let side = signal
            .side
            .order_side()
            .ok_or_else(|| Error::InvalidInputs("hold signals are not actionable".to_string()))?;
        let plan = signal
            .exit_plan
            .as_ref()
            .ok_or_else(|| Error::InvalidInputs(format!("signal {} has no exit plan", signal.id)))?;

        let params = SizingParams {
            signal_id: Some(signal.id),
            ..Default::default()
        };
        let sizing = self.size_position(&params, now)?;
        if sizing.recommended_size <= Decimal::ZERO {
            return Err(Error::InvalidInputs(format!(
                "{} sized to zero; no budget left",
                signal.symbol
            )));
        }

        let quantity = sizing.recommended_size;
        let notional = quantity * signal.price;
        Ok(OrderRequest {
            id: Uuid::new_v4(),
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            side,
            quantity,
            price: signal.price,
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit_1,
            estimated_fees: (notional * self.engine.fee_rate).round_dp(8),
            estimated_slippage: (notional * self.engine.slippage_rate).round_dp(8),
            sizing,
            created_at: now,
        })
    }

    /// Book an execution report for a previously accepted order.
    pub async fn record_fill(&mut self, report: ExecutionReport, now: DateTime<Utc>) -> Result<Option<Position>> {
        let not_found = || Error::NotFound(format!("accepted order {}", report.order_id));
        let accepted = &self
            .pending_orders
            .get(&report.order_id)
            .ok_or_else(not_found)?
            .validated
            .order;
        if accepted.symbol != report.symbol || accepted.side != report.side {
            return Err(Error::InvalidInputs(format!(
                "{:?} {} report does not match order {} ({:?} {})",
                report.side, report.symbol, accepted.id, accepted.side, accepted.symbol
            )));
        }
        let pending = self.pending_orders.remove(&report.order_id).ok_or_else(not_found)?;
        let order = pending.validated.order;

        if !report.is_success() || report.filled_quantity <= Decimal::ZERO {
            warn!(
                order_id = %order.id,
                status = ?report.status,
                error = ?report.error_message,
                "Order not filled"
            );
            self.resolve_signal(order.signal_id, "order not filled");
            return Ok(None);
        }

        let position = self.positions.open_from_fill(
            &order,
            &report,
            pending.strategy_type,
            pending.exit_plan,
        )?;
        self.ledger.record_fees(report.fees_paid);
        self.refresh(now).await;
        Ok(Some(position))
    }

    /// The execution collaborator failed or timed out for an accepted order.
    pub fn order_failed(&mut self, order_id: Uuid, reason: &str) {
        if let Some(pending) = self.pending_orders.remove(&order_id) {
            warn!(order_id = %order_id, reason = %reason, "Accepted order failed");
            self.resolve_signal(pending.validated.order.signal_id, reason);
        }
    }

    /// Mark positions on `symbol` and run exit rules.
    pub async fn update_price(
        &mut self,
        symbol: &str,
        price: Decimal,
        rsi: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<PriceUpdate> {
        if price <= Decimal::ZERO {
            return Err(Error::InvalidInputs(format!("price must be positive, got {}", price)));
        }
        if let Some(rsi) = rsi {
            self.last_rsi.insert(symbol.to_string(), rsi);
        }
        let rsi = self.last_rsi.get(symbol).copied();

        let touched = self.positions.update_price(symbol, price);
        let mut exits = Vec::new();
        for id in &touched {
            let Some(position) = self.positions.get_position(*id) else {
                continue;
            };
            let decision = exit_rules::evaluate(&position, price, rsi);
            if let Some(trade) = exit_rules::apply(&self.positions, &position, &decision).await? {
                self.book_exit(&trade);
                exits.push(trade);
            }
        }

        self.refresh(now).await;

        Ok(PriceUpdate {
            symbol: symbol.to_string(),
            price,
            positions_marked: touched.len(),
            exits,
            breaker_state: self.breaker.state(),
        })
    }

    fn book_exit(&mut self, trade: &ClosedTrade) {
        self.ledger.record_realized(trade.realized_pnl);
        if trade.final_exit {
            self.ledger.record_trade(trade.position_pnl);
            self.resolve_signal(trade.signal_id, "position closed");
        }
    }

    /// Day roll-over, limit refresh and pause expiry.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        if self.ledger.roll_over(now.date_naive()).is_some() {
            self.breaker.reset_daily();
        }
        self.refresh(now).await;
        self.breaker.tick(now, self.monitor.has_critical(), &mut self.events);
    }

    pub async fn emergency_stop(
        &mut self,
        reason: TripReason,
        description: String,
        operator: &str,
        now: DateTime<Utc>,
    ) -> BreakerStatus {
        self.trigger(reason, description, operator, now).await;
        self.breaker.status().clone()
    }

    pub fn reset_breaker(&mut self, operator: &str, now: DateTime<Utc>) -> Result<BreakerStatus> {
        self.evaluate_limits(now);
        self.breaker
            .reset(operator, self.monitor.has_critical(), now, &mut self.events)?;
        Ok(self.breaker.status().clone())
    }

    /// Replace the risk settings. Invalid settings leave everything unchanged.
    pub async fn update_settings(&mut self, settings: RiskSettings, now: DateTime<Utc>) -> Result<RiskSettings> {
        settings.validate()?;

        self.breaker
            .set_enabled(settings.circuit_breaker_enabled, now, &mut self.events);
        self.breaker
            .update_config(settings.circuit_breaker_threshold, self.engine.daily_loss_pause_hours);
        self.monitor.update_settings(settings.clone());
        self.settings = settings.clone();

        self.events.record(RiskEvent::new(
            RiskEventType::SettingsUpdated,
            Severity::Info,
            format!(
                "Risk settings updated: max_daily_loss {}, max_position_size {}, sizing {}",
                settings.max_daily_loss,
                settings.max_position_size,
                settings.position_sizing_method.as_str()
            ),
            "configuration",
            Vec::new(),
            now,
        ));

        self.refresh(now).await;
        Ok(settings)
    }

    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            can_trade: self.breaker.can_trade(),
            breaker: self.breaker.status().clone(),
            limits: self.monitor.statuses(),
            settings: self.settings.clone(),
            daily_pnl: self.ledger.today().clone(),
            equity: self.ledger.equity(),
            open_positions: self.positions.open_positions(),
            open_signals: self.signals.len(),
            unresolved_events: self.events.unresolved().count(),
        }
    }

    fn snapshot(&self) -> ExposureSnapshot {
        let mut snapshot = ExposureSnapshot::from_positions(
            self.capital(),
            self.ledger.today().realized_pnl,
            &self.positions,
        );
        // positions held over midnight count only today's move
        snapshot.unrealized_pnl = self.ledger.day_unrealized(snapshot.unrealized_pnl);
        snapshot
    }

    /// Exposure with accepted orders counted as if already filled.
    fn sizing_snapshot(&self) -> ExposureSnapshot {
        let mut snapshot = self.snapshot();
        for pending in self.pending_orders.values() {
            let order = &pending.validated.order;
            snapshot.reserve(&order.symbol, order.notional(), order.risk_amount());
        }
        snapshot
    }

    fn evaluate_limits(&mut self, now: DateTime<Utc>) -> MonitorUpdate {
        self.ledger
            .mark(self.positions.unrealized_pnl(), self.positions.open_risk());
        let snapshot = self.snapshot();
        self.monitor.evaluate(snapshot, now, &mut self.events)
    }

    /// Recompute limits and apply breaker consequences.
    async fn refresh(&mut self, now: DateTime<Utc>) {
        let update = self.evaluate_limits(now);

        if update.daily_loss_breached {
            let daily_pnl = self.ledger.today().total_pnl();
            self.breaker.pause_for_daily_loss(
                daily_pnl,
                self.settings.max_daily_loss,
                now,
                &mut self.events,
            );
        }

        let over_budget = update
            .statuses
            .iter()
            .find(|s| s.limit_type == LimitType::PortfolioRisk && s.utilization_percentage > Decimal::ONE_HUNDRED);
        if let Some(status) = over_budget {
            let description = format!(
                "Open risk at {}% of portfolio risk limit",
                status.utilization_percentage.round_dp(2)
            );
            self.trigger(TripReason::CriticalLimit, description, "risk_monitor", now)
                .await;
        }

        if self
            .breaker
            .update_equity(self.ledger.equity(), now, &mut self.events)
        {
            self.flatten(now).await;
        }
    }

    async fn trigger(&mut self, reason: TripReason, description: String, by: &str, now: DateTime<Utc>) {
        if self
            .breaker
            .trigger(reason, description, by, now, &mut self.events)
        {
            self.flatten(now).await;
        }
    }

    /// Close every open position at its mark.
    async fn flatten(&mut self, now: DateTime<Utc>) {
        let open = self.positions.open_positions();
        if open.is_empty() {
            return;
        }
        for position in open {
            match self
                .positions
                .close_position(position.id, position.mark_price)
                .await
            {
                Ok(trade) => self.book_exit(&trade),
                Err(e) => warn!(position_id = %position.id, error = %e, "Failed to close position on halt"),
            }
        }
        self.events.record(RiskEvent::new(
            RiskEventType::PositionsFlattened,
            Severity::Warning,
            "Open positions closed at mark after halt",
            "circuit_breaker",
            vec![RiskAction::ClosePositions],
            now,
        ));
        self.evaluate_limits(now);
    }
}

/// Message accepted by the account actor.
pub enum Command {
    Evaluate {
        sets: Vec<IndicatorSet>,
        orderbook_imbalance: Option<f64>,
        reply: oneshot::Sender<Result<Evaluation>>,
    },
    RecordDecision {
        decision: MlDecision,
        reply: oneshot::Sender<()>,
    },
    ResolveSignal {
        signal_id: Uuid,
        reason: String,
        reply: oneshot::Sender<bool>,
    },
    SizePosition {
        params: SizingParams,
        reply: oneshot::Sender<Result<SizingResult>>,
    },
    ValidateOrder {
        order: Box<OrderRequest>,
        reply: oneshot::Sender<Result<ValidatedOrder>>,
    },
    PrepareOrder {
        signal_id: Uuid,
        reply: oneshot::Sender<Result<ValidatedOrder>>,
    },
    RecordFill {
        report: ExecutionReport,
        reply: oneshot::Sender<Result<Option<Position>>>,
    },
    OrderFailed {
        order_id: Uuid,
        reason: String,
        reply: oneshot::Sender<()>,
    },
    UpdatePrice {
        symbol: String,
        price: Decimal,
        rsi: Option<f64>,
        reply: oneshot::Sender<Result<PriceUpdate>>,
    },
    Status {
        reply: oneshot::Sender<RiskStatus>,
    },
    UpdateSettings {
        settings: RiskSettings,
        reply: oneshot::Sender<Result<RiskSettings>>,
    },
    EmergencyStop {
        reason: TripReason,
        description: String,
        operator: String,
        reply: oneshot::Sender<BreakerStatus>,
    },
    ResetBreaker {
        operator: String,
        reply: oneshot::Sender<Result<BreakerStatus>>,
    },
    Tick {
        at: DateTime<Utc>,
        reply: oneshot::Sender<()>,
    },
    Events {
        limit: usize,
        reply: oneshot::Sender<Vec<RiskEvent>>,
    },
    Limits {
        reply: oneshot::Sender<Vec<RiskLimitStatus>>,
    },
    SubscribeEvents {
        reply: oneshot::Sender<broadcast::Receiver<RiskEvent>>,
    },
}

impl Account {
    async fn handle(&mut self, command: Command) {
        let now = Utc::now();
        // A dropped reply receiver means the caller gave up; nothing to do.
        match command {
            Command::Evaluate {
                sets,
                orderbook_imbalance,
                reply,
            } => {
                let _ = reply.send(self.evaluate(&sets, orderbook_imbalance, now).await);
            }
            Command::RecordDecision { decision, reply } => {
                self.record_decision(decision);
                let _ = reply.send(());
            }
            Command::ResolveSignal {
                signal_id,
                reason,
                reply,
            } => {
                let _ = reply.send(self.resolve_signal(signal_id, &reason));
            }
            Command::SizePosition { params, reply } => {
                let _ = reply.send(self.size_position(&params, now));
            }
            Command::ValidateOrder { order, reply } => {
                let _ = reply.send(self.validate_order(*order, now));
            }
            Command::PrepareOrder { signal_id, reply } => {
                let _ = reply.send(self.prepare_order(signal_id, now));
            }
            Command::RecordFill { report, reply } => {
                let _ = reply.send(self.record_fill(report, now).await);
            }
            Command::OrderFailed {
                order_id,
                reason,
                reply,
            } => {
                self.order_failed(order_id, &reason);
                let _ = reply.send(());
            }
            Command::UpdatePrice {
                symbol,
                price,
                rsi,
                reply,
            } => {
                let _ = reply.send(self.update_price(&symbol, price, rsi, now).await);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::UpdateSettings { settings, reply } => {
                let _ = reply.send(self.update_settings(settings, now).await);
            }
            Command::EmergencyStop {
                reason,
                description,
                operator,
                reply,
            } => {
                let _ = reply.send(self.emergency_stop(reason, description, &operator, now).await);
            }
            Command::ResetBreaker { operator, reply } => {
                let _ = reply.send(self.reset_breaker(&operator, now));
            }
            Command::Tick { at, reply } => {
                self.tick(at).await;
                let _ = reply.send(());
            }
            Command::Events { limit, reply } => {
                let _ = reply.send(self.events.recent(limit));
            }
            Command::Limits { reply } => {
                let _ = reply.send(self.monitor.statuses());
            }
            Command::SubscribeEvents { reply } => {
                let _ = reply.send(self.events.subscribe());
            }
        }
    }
}

/// Cloneable handle to a running account actor.
#[derive(Clone)]
pub struct AccountHandle {
    tx: mpsc::Sender<Command>,
    breaker: watch::Receiver<BreakerStatus>,
}

impl AccountHandle {
    /// Spawn the actor task that owns `account`.
    pub fn spawn(mut account: Account) -> Self {
        let (tx, mut rx) = mpsc::channel(COMMAND_BUFFER);
        let breaker = account.breaker.subscribe();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                account.handle(command).await;
            }
            info!("Account actor stopped");
        });

        Self { tx, breaker }
    }

    /// Breaker transitions, observable without a round trip to the actor.
    pub fn breaker(&self) -> watch::Receiver<BreakerStatus> {
        self.breaker.clone()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::StaleData("account actor is not running".to_string()))?;
        rx.await
            .map_err(|_| Error::StaleData("account actor dropped the request".to_string()))
    }

    pub async fn evaluate(&self, sets: Vec<IndicatorSet>, orderbook_imbalance: Option<f64>) -> Result<Evaluation> {
        self.request(|reply| Command::Evaluate {
            sets,
            orderbook_imbalance,
            reply,
        })
        .await?
    }

    pub async fn record_decision(&self, decision: MlDecision) -> Result<()> {
        self.request(|reply| Command::RecordDecision { decision, reply })
            .await
    }

    pub async fn resolve_signal(&self, signal_id: Uuid, reason: impl Into<String>) -> Result<bool> {
        let reason = reason.into();
        self.request(|reply| Command::ResolveSignal {
            signal_id,
            reason,
            reply,
        })
        .await
    }

    pub async fn size_position(&self, params: SizingParams) -> Result<SizingResult> {
        self.request(|reply| Command::SizePosition { params, reply })
            .await?
    }

    pub async fn validate_order(&self, order: OrderRequest) -> Result<ValidatedOrder> {
        self.request(|reply| Command::ValidateOrder {
            order: Box::new(order),
            reply,
        })
        .await?
    }

    pub async fn prepare_order(&self, signal_id: Uuid) -> Result<ValidatedOrder> {
        self.request(|reply| Command::PrepareOrder { signal_id, reply })
            .await?
    }

    pub async fn record_fill(&self, report: ExecutionReport) -> Result<Option<Position>> {
        self.request(|reply| Command::RecordFill { report, reply })
            .await?
    }

    pub async fn order_failed(&self, order_id: Uuid, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.request(|reply| Command::OrderFailed {
            order_id,
            reason,
            reply,
        })
        .await
    }

    pub async fn update_price(&self, symbol: impl Into<String>, price: Decimal, rsi: Option<f64>) -> Result<PriceUpdate> {
        let symbol = symbol.into();
        self.request(|reply| Command::UpdatePrice {
            symbol,
            price,
            rsi,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<RiskStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn update_settings(&self, settings: RiskSettings) -> Result<RiskSettings> {
        self.request(|reply| Command::UpdateSettings { settings, reply })
            .await?
    }

    pub async fn emergency_stop(
        &self,
        reason: TripReason,
        description: impl Into<String>,
        operator: impl Into<String>,
    ) -> Result<BreakerStatus> {
        let description = description.into();
        let operator = operator.into();
        self.request(|reply| Command::EmergencyStop {
            reason,
            description,
            operator,
            reply,
        })
        .await
    }

    pub async fn reset_breaker(&self, operator: impl Into<String>) -> Result<BreakerStatus> {
        let operator = operator.into();
        self.request(|reply| Command::ResetBreaker { operator, reply })
            .await?
    }

    pub async fn tick(&self) -> Result<()> {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.request(|reply| Command::Tick { at, reply }).await
    }

    pub async fn events(&self, limit: usize) -> Result<Vec<RiskEvent>> {
        self.request(|reply| Command::Events { limit, reply }).await
    }

    pub async fn limits(&self) -> Result<Vec<RiskLimitStatus>> {
        self.request(|reply| Command::Limits { reply }).await
    }

    pub async fn subscribe_events(&self) -> Result<broadcast::Receiver<RiskEvent>> {
        self.request(|reply| Command::SubscribeEvents { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::types::{OrderSide, SignalSide, SizingMethod};
    use rust_decimal_macros::dec;

    fn indicators(symbol: &str, close: f64) -> IndicatorSet {
        IndicatorSet {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            close,
            high: close + 1.0,
            low: close - 1.0,
            volume: 1_000.0,
            adx: 30.0,
            plus_di: 25.0,
            minus_di: 15.0,
            atr: 2.0,
            rsi: 55.0,
            ema_fast: close,
            ema_slow: close - 1.0,
            ema_50: close - 2.0,
            ema_200: close - 5.0,
            sma_mid: close - 2.0,
            sma_long: close - 5.0,
            bb_upper: close + 4.0,
            bb_middle: close,
            bb_lower: close - 4.0,
            bb_width: 0.08,
            bb_width_median: 0.08,
            bb_percent_b: 0.5,
            macd_line: 0.5,
            macd_signal: 0.3,
            macd_histogram: 0.2,
            volume_mean: 1_000.0,
            volume_stddev: 100.0,
            support: close - 10.0,
            resistance: close + 10.0,
        }
    }

    fn open_signal(account: &mut Account, symbol: &str) -> Uuid {
        let signal = Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            strategy_type: StrategyType::TrendFollowing,
            side: SignalSide::Buy,
            confidence: 70.0,
            price: dec!(100),
            indicators: indicators(symbol, 100.0),
            exit_plan: Some(ExitPlan {
                stop_loss: dec!(95),
                take_profit_1: dec!(105),
                take_profit_2: dec!(115),
                trailing_distance: None,
                partial_close_fraction: dec!(0.5),
                target_price: None,
                rsi_exit_band: None,
            }),
            timestamp: Utc::now(),
        };
        let id = signal.id;
        account.signals.insert(id, signal);
        id
    }

    async fn filled_account() -> (Account, Position) {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let signal_id = open_signal(&mut account, "ETHUSDT");
        let validated = account.prepare_order(signal_id, Utc::now()).unwrap();
        let report = ExecutionReport::filled(&validated.order, validated.order.quantity, dec!(100), dec!(1));
        let position = account.record_fill(report, Utc::now()).await.unwrap().unwrap();
        (account, position)
    }

    #[tokio::test]
    async fn test_prepare_and_fill_opens_position() {
        let (account, position) = filled_account().await;

        // 10_000 × 1% / 5 = 20 units, capped at 10% of capital / price = 10
        assert_eq!(position.quantity, dec!(10));
        assert_eq!(position.stop_loss, dec!(95));
        assert_eq!(account.positions().open_count(), 1);
        assert_eq!(account.capital(), dec!(9999));
        assert!(account.breaker().can_trade());
    }

    #[tokio::test]
    async fn test_record_fill_for_unknown_order() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let signal_id = open_signal(&mut account, "ETHUSDT");
        let validated = account.prepare_order(signal_id, Utc::now()).unwrap();

        let mut report = ExecutionReport::filled(&validated.order, dec!(1), dec!(100), dec!(0));
        report.order_id = Uuid::new_v4();
        assert!(matches!(account.record_fill(report, Utc::now()).await, Err(Error::NotFound(_))));
    }

    fn order_for(signal_id: Uuid, symbol: &str, quantity: Decimal) -> OrderRequest {
        let now = Utc::now();
        OrderRequest {
            id: Uuid::new_v4(),
            signal_id,
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            quantity,
            price: dec!(100),
            stop_loss: dec!(95),
            take_profit: dec!(105),
            estimated_fees: Decimal::ZERO,
            estimated_slippage: Decimal::ZERO,
            sizing: SizingResult {
                symbol: symbol.to_string(),
                method: SizingMethod::FixedPercentage,
                recommended_size: quantity,
                max_size: dec!(1000000),
                risk_score: dec!(1),
                confidence_level: dec!(70),
                computed_at: now,
                breaker_epoch: 0,
            },
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_order_for_unknown_signal_rejected() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let signal_id = open_signal(&mut account, "ETHUSDT");

        let forged = order_for(Uuid::new_v4(), "DOGEUSDT", dec!(5));
        assert!(matches!(account.validate_order(forged, Utc::now()), Err(Error::NotFound(_))));

        let wrong_symbol = order_for(signal_id, "DOGEUSDT", dec!(5));
        assert!(matches!(
            account.validate_order(wrong_symbol, Utc::now()),
            Err(Error::InvalidInputs(_))
        ));

        assert!(account.pending_orders.is_empty());
        assert!(account.events().is_empty());
    }

    #[tokio::test]
    async fn test_inflated_sizing_capped_server_side() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let signal_id = open_signal(&mut account, "ETHUSDT");

        // 10% of 10_000 at the signal price of 100 allows 10 units
        let inflated = order_for(signal_id, "ETHUSDT", dec!(11));
        assert!(matches!(
            account.validate_order(inflated, Utc::now()),
            Err(Error::LimitBreach { limit: LimitType::PositionSize, .. })
        ));
        assert!(account.pending_orders.is_empty());
    }

    #[tokio::test]
    async fn test_one_accepted_order_per_signal() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let signal_id = open_signal(&mut account, "ETHUSDT");

        let first = account.prepare_order(signal_id, Utc::now()).unwrap();
        assert!(matches!(
            account.prepare_order(signal_id, Utc::now()),
            Err(Error::InvalidInputs(_))
        ));
        assert!(account.open_signal(signal_id).is_some());
        assert_eq!(account.pending_orders.len(), 1);

        let report = ExecutionReport::filled(&first.order, first.order.quantity, dec!(100), dec!(0));
        assert!(account.record_fill(report, Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fill_booked_after_signal_resolved() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let signal_id = open_signal(&mut account, "ETHUSDT");
        let validated = account.prepare_order(signal_id, Utc::now()).unwrap();

        assert!(account.resolve_signal(signal_id, "operator"));
        let report = ExecutionReport::filled(&validated.order, validated.order.quantity, dec!(100), dec!(0));
        let position = account.record_fill(report, Utc::now()).await.unwrap().unwrap();
        assert_eq!(position.strategy_type, StrategyType::TrendFollowing);
        assert_eq!(account.positions().open_count(), 1);
        assert!(account.pending_orders.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_report_keeps_order_pending() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let signal_id = open_signal(&mut account, "ETHUSDT");
        let validated = account.prepare_order(signal_id, Utc::now()).unwrap();

        let mut report = ExecutionReport::filled(&validated.order, validated.order.quantity, dec!(100), dec!(0));
        report.symbol = "BTCUSDT".to_string();
        assert!(matches!(
            account.record_fill(report, Utc::now()).await,
            Err(Error::InvalidInputs(_))
        ));
        assert_eq!(account.pending_orders.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_orders_reserve_balance() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let settings = RiskSettings {
            max_position_size: dec!(0.6),
            max_symbol_exposure: dec!(1),
            ..Default::default()
        };
        account.update_settings(settings, Utc::now()).await.unwrap();

        let first = open_signal(&mut account, "ETHUSDT");
        let second = open_signal(&mut account, "BTCUSDT");
        account
            .validate_order(order_for(first, "ETHUSDT", dec!(60)), Utc::now())
            .unwrap();

        // 6_000 already committed out of 10_000
        match account.validate_order(order_for(second, "BTCUSDT", dec!(60)), Utc::now()) {
            Err(Error::InsufficientBalance { available, .. }) => assert_eq!(available, dec!(4000)),
            other => panic!("expected InsufficientBalance, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pending_orders_consume_symbol_budget() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let signals: Vec<Uuid> = (0..3).map(|_| open_signal(&mut account, "ETHUSDT")).collect();

        // 20% symbol ceiling on 10_000 leaves room for two orders of 1_000
        account.prepare_order(signals[0], Utc::now()).unwrap();
        account.prepare_order(signals[1], Utc::now()).unwrap();
        assert!(matches!(
            account.prepare_order(signals[2], Utc::now()),
            Err(Error::InvalidInputs(_))
        ));
        assert!(account.open_signal(signals[2]).is_none());
    }

    #[tokio::test]
    async fn test_decision_history_is_bounded() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        for _ in 0..MAX_DECISIONS + 5 {
            account.record_decision(MlDecision {
                signal_ref: Uuid::new_v4(),
                probability: 0.7,
                expected_r: 2.0,
                executed: true,
                reason: "accepted".to_string(),
                decided_at: Utc::now(),
            });
        }
        assert_eq!(account.decisions().len(), MAX_DECISIONS);
    }

    #[tokio::test]
    async fn test_overnight_loss_not_counted_twice() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let settings = RiskSettings {
            max_daily_loss: dec!(40),
            circuit_breaker_threshold: dec!(0.5),
            ..Default::default()
        };
        account.update_settings(settings, Utc::now()).await.unwrap();

        let signal_id = open_signal(&mut account, "ETHUSDT");
        let validated = account.prepare_order(signal_id, Utc::now()).unwrap();
        let report = ExecutionReport::filled(&validated.order, validated.order.quantity, dec!(100), dec!(0));
        account.record_fill(report, Utc::now()).await.unwrap();

        // 10 units down 3 each: -30 against a 40 limit
        account.update_price("ETHUSDT", dec!(97), None, Utc::now()).await.unwrap();
        assert!(account.breaker().can_trade());

        account.tick(Utc::now() + Duration::days(1)).await;
        assert_eq!(account.status().daily_pnl.total_pnl(), Decimal::ZERO);

        // another -15 today is well inside the limit on its own
        account.update_price("ETHUSDT", dec!(95.5), None, Utc::now()).await.unwrap();
        assert_eq!(account.status().daily_pnl.total_pnl(), dec!(-15));
        assert!(account.breaker().can_trade());
    }

    #[tokio::test]
    async fn test_first_target_takes_partial() {
        let (mut account, position) = filled_account().await;

        let update = account
            .update_price("ETHUSDT", dec!(105), None, Utc::now())
            .await
            .unwrap();
        assert_eq!(update.positions_marked, 1);
        assert_eq!(update.exits.len(), 1);
        assert_eq!(update.exits[0].quantity, dec!(5));
        assert!(!update.exits[0].final_exit);

        let remaining = account.positions().get_position(position.id).unwrap();
        assert_eq!(remaining.quantity, dec!(5));
        assert_eq!(remaining.stop_loss, dec!(100));
        assert!(remaining.first_target_hit);
    }

    #[tokio::test]
    async fn test_emergency_stop_flattens_and_blocks_orders() {
        let (mut account, _) = filled_account().await;

        let status = account
            .emergency_stop(TripReason::ManualEmergencyStop, "operator halt".to_string(), "ops", Utc::now())
            .await;
        assert_eq!(status.state, BreakerState::Triggered);
        assert_eq!(account.positions().open_count(), 0);
        assert!(account.events().has_unresolved(RiskEventType::PositionsFlattened));

        let signal_id = open_signal(&mut account, "BTCUSDT");
        assert!(matches!(
            account.prepare_order(signal_id, Utc::now()),
            Err(Error::CircuitOpen { .. })
        ));
        assert!(account.open_signal(signal_id).is_none());

        let status = account.reset_breaker("ops", Utc::now()).unwrap();
        assert_eq!(status.state, BreakerState::Active);
    }

    #[tokio::test]
    async fn test_daily_loss_pauses_without_closing() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let settings = RiskSettings {
            max_daily_loss: dec!(20),
            circuit_breaker_threshold: dec!(0.5),
            ..Default::default()
        };
        account.update_settings(settings, Utc::now()).await.unwrap();
        assert!(account.events().has_unresolved(RiskEventType::SettingsUpdated));

        let signal_id = open_signal(&mut account, "ETHUSDT");
        let validated = account.prepare_order(signal_id, Utc::now()).unwrap();
        let report = ExecutionReport::filled(&validated.order, validated.order.quantity, dec!(100), dec!(1));
        account.record_fill(report, Utc::now()).await.unwrap();

        // -1 fees and -30 unrealized against a 20 limit
        account
            .update_price("ETHUSDT", dec!(97), None, Utc::now())
            .await
            .unwrap();
        assert_eq!(account.breaker().state(), BreakerState::Paused);
        assert_eq!(account.positions().open_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_settings_leave_state_unchanged() {
        let mut account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let settings = RiskSettings {
            max_positions: 0,
            ..Default::default()
        };
        assert!(account.update_settings(settings, Utc::now()).await.is_err());
        assert_eq!(account.status().settings, RiskSettings::default());
        assert!(account.events().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_sizing_small_account() {
        let mut config = AppConfig::default();
        config.engine.starting_capital = dec!(100);
        config.risk.risk_per_trade = dec!(0.005);
        let account = Account::new(&config, Utc::now()).unwrap();

        let params = SizingParams {
            symbol: Some("ETHUSDT".to_string()),
            price: Some(dec!(100)),
            stop_loss: Some(dec!(50)),
            ..Default::default()
        };
        let sizing = account.size_position(&params, Utc::now()).unwrap();
        let expected = if is_low_liquidity(Utc::now()) { dec!(0.005) } else { dec!(0.01) };
        assert_eq!(sizing.recommended_size, expected);
    }

    #[tokio::test]
    async fn test_handle_serializes_commands() {
        let account = Account::new(&AppConfig::default(), Utc::now()).unwrap();
        let handle = AccountHandle::spawn(account);
        let mut breaker = handle.breaker();

        let status = handle.status().await.unwrap();
        assert!(status.can_trade);
        assert!(status.open_positions.is_empty());

        handle
            .emergency_stop(TripReason::ManualEmergencyStop, "halt", "ops")
            .await
            .unwrap();
        breaker.changed().await.unwrap();
        assert_eq!(breaker.borrow().state, BreakerState::Triggered);

        let events = handle.events(10).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == RiskEventType::ManualEmergencyStop));

        let status = handle.reset_breaker("ops").await.unwrap();
        assert_eq!(status.state, BreakerState::Active);
    }
}
