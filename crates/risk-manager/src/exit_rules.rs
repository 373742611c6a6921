//! Exit rules for open positions: stops, tiered take-profit and trailing.
//!
//! Trend trades close `partial_close_fraction` at the first target and move
//! the stop to breakeven. The remainder exits at the final target or on a
//! trailing stop ratcheted off the best price seen. Mean-reversion trades
//! close fully at the target price or once RSI is back in the neutral band.

use market_core::types::{OrderSide, Position};
use market_core::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use trading_engine::{ClosedTrade, PositionManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    BreakevenStop,
    TrailingStop,
    FinalTarget,
    TargetReached,
    RsiNeutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitDecision {
    Hold,
    /// Ratchet the stop without closing anything.
    MoveStop { stop_loss: Decimal },
    /// First target hit: close a slice and move the stop.
    TakePartial {
        quantity: Decimal,
        price: Decimal,
        new_stop: Decimal,
    },
    Close { price: Decimal, reason: ExitReason },
}

/// Whether `price` is at or beyond `level` in the profit direction.
fn reached(side: OrderSide, price: Decimal, level: Decimal) -> bool {
    match side {
        OrderSide::Buy => price >= level,
        OrderSide::Sell => price <= level,
    }
}

fn stop_hit(side: OrderSide, price: Decimal, stop: Decimal) -> bool {
    match side {
        OrderSide::Buy => price <= stop,
        OrderSide::Sell => price >= stop,
    }
}

/// Decide what to do with `position` at `price`. `rsi` is the latest RSI of
/// the symbol, when known.
///
/// The position's watermark must already reflect `price`.
pub fn evaluate(position: &Position, price: Decimal, rsi: Option<f64>) -> ExitDecision {
    if !position.is_open() {
        return ExitDecision::Hold;
    }

    let side = position.side;
    let plan = &position.exit_plan;

    if stop_hit(side, price, position.stop_loss) {
        let reason = if !position.first_target_hit {
            ExitReason::StopLoss
        } else if position.stop_loss == position.entry_price {
            ExitReason::BreakevenStop
        } else {
            ExitReason::TrailingStop
        };
        return ExitDecision::Close { price, reason };
    }

    if let Some(target) = plan.target_price {
        if reached(side, price, target) {
            return ExitDecision::Close {
                price,
                reason: ExitReason::TargetReached,
            };
        }
        if let (Some((low, high)), Some(rsi)) = (plan.rsi_exit_band, rsi) {
            if (low..=high).contains(&rsi) {
                return ExitDecision::Close {
                    price,
                    reason: ExitReason::RsiNeutral,
                };
            }
        }
        return ExitDecision::Hold;
    }

    if reached(side, price, plan.take_profit_2) {
        return ExitDecision::Close {
            price,
            reason: ExitReason::FinalTarget,
        };
    }

    if !position.first_target_hit {
        if reached(side, price, plan.take_profit_1) {
            let quantity = (position.initial_quantity * plan.partial_close_fraction).round_dp(8);
            if quantity <= Decimal::ZERO || quantity >= position.quantity {
                return ExitDecision::Close {
                    price,
                    reason: ExitReason::FinalTarget,
                };
            }
            return ExitDecision::TakePartial {
                quantity,
                price,
                new_stop: position.entry_price,
            };
        }
        return ExitDecision::Hold;
    }

    if let Some(trail) = plan.trailing_distance {
        let candidate = position.watermark - side.sign() * trail;
        let tighter = match side {
            OrderSide::Buy => candidate > position.stop_loss,
            OrderSide::Sell => candidate < position.stop_loss,
        };
        if tighter {
            return ExitDecision::MoveStop {
                stop_loss: candidate,
            };
        }
    }

    ExitDecision::Hold
}

/// Carry out `decision` on the position manager. Returns the realized exit, if any.
pub async fn apply(
    positions: &PositionManager,
    position: &Position,
    decision: &ExitDecision,
) -> Result<Option<ClosedTrade>> {
    match decision {
        ExitDecision::Hold => Ok(None),
        ExitDecision::MoveStop { stop_loss } => {
            positions.move_stop(position.id, *stop_loss);
            Ok(None)
        }
        ExitDecision::TakePartial {
            quantity,
            price,
            new_stop,
        } => {
            let trade = positions.close_partial(position.id, *quantity, *price).await?;
            positions.update_position(position.id, |p| {
                p.first_target_hit = true;
                p.move_stop(*new_stop);
            });
            info!(
                position_id = %position.id,
                quantity = %quantity,
                price = %price,
                stop = %new_stop,
                "First target taken, stop to breakeven"
            );
            Ok(Some(trade))
        }
        ExitDecision::Close { price, reason } => {
            let trade = positions.close_position(position.id, *price).await?;
            info!(position_id = %position.id, reason = ?reason, price = %price, "Exit rule closed position");
            Ok(Some(trade))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use market_core::types::{
        ExecutionReport, ExitPlan, OrderRequest, SizingMethod, SizingResult, StrategyType,
    };
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn trend_plan(side: OrderSide) -> ExitPlan {
        let dir = side.sign();
        ExitPlan {
            stop_loss: dec!(100) - dir * dec!(18),
            take_profit_1: dec!(100) + dir * dec!(10),
            take_profit_2: dec!(100) + dir * dec!(30),
            trailing_distance: Some(dec!(10)),
            partial_close_fraction: dec!(0.5),
            target_price: None,
            rsi_exit_band: None,
        }
    }

    fn reversion_plan() -> ExitPlan {
        ExitPlan {
            stop_loss: dec!(82),
            take_profit_1: dec!(106),
            take_profit_2: dec!(106),
            trailing_distance: None,
            partial_close_fraction: Decimal::ONE,
            target_price: Some(dec!(106)),
            rsi_exit_band: Some((45.0, 55.0)),
        }
    }

    fn fill(side: OrderSide, plan: &ExitPlan) -> (OrderRequest, ExecutionReport) {
        let order = OrderRequest {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            side,
            quantity: dec!(2),
            price: dec!(100),
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit_1,
            estimated_fees: Decimal::ZERO,
            estimated_slippage: Decimal::ZERO,
            sizing: SizingResult {
                symbol: "BTCUSDT".to_string(),
                method: SizingMethod::FixedPercentage,
                recommended_size: dec!(2),
                max_size: dec!(10),
                risk_score: dec!(1),
                confidence_level: dec!(70),
                computed_at: Utc::now(),
                breaker_epoch: 0,
            },
            created_at: Utc::now(),
        };
        let report = ExecutionReport::filled(&order, dec!(2), dec!(100), Decimal::ZERO);
        (order, report)
    }

    fn position(side: OrderSide, plan: ExitPlan, strategy: StrategyType) -> Position {
        let (order, report) = fill(side, &plan);
        Position::from_fill(&order, &report, strategy, plan)
    }

    fn marked(mut p: Position, price: Decimal) -> Position {
        p.update_price(price);
        p
    }

    #[test]
    fn test_initial_stop() {
        let p = position(OrderSide::Buy, trend_plan(OrderSide::Buy), StrategyType::TrendFollowing);
        assert_eq!(
            evaluate(&marked(p, dec!(82)), dec!(82), None),
            ExitDecision::Close {
                price: dec!(82),
                reason: ExitReason::StopLoss
            }
        );
    }

    #[test]
    fn test_first_target_takes_half() {
        let p = position(OrderSide::Buy, trend_plan(OrderSide::Buy), StrategyType::TrendFollowing);
        assert_eq!(evaluate(&marked(p.clone(), dec!(105)), dec!(105), None), ExitDecision::Hold);
        assert_eq!(
            evaluate(&marked(p, dec!(110)), dec!(110), None),
            ExitDecision::TakePartial {
                quantity: dec!(1),
                price: dec!(110),
                new_stop: dec!(100)
            }
        );
    }

    #[test]
    fn test_short_mirrors_long() {
        let p = position(OrderSide::Sell, trend_plan(OrderSide::Sell), StrategyType::TrendFollowing);
        assert!(matches!(
            evaluate(&marked(p.clone(), dec!(90)), dec!(90), None),
            ExitDecision::TakePartial { .. }
        ));
        assert_eq!(
            evaluate(&marked(p, dec!(118)), dec!(118), None),
            ExitDecision::Close {
                price: dec!(118),
                reason: ExitReason::StopLoss
            }
        );
    }

    #[test]
    fn test_trailing_ratchets_after_first_target() {
        let mut p = position(OrderSide::Buy, trend_plan(OrderSide::Buy), StrategyType::TrendFollowing);
        p.first_target_hit = true;
        p.move_stop(dec!(100));

        // watermark 115 → stop 105
        let p = marked(p, dec!(115));
        assert_eq!(
            evaluate(&p, dec!(115), None),
            ExitDecision::MoveStop {
                stop_loss: dec!(105)
            }
        );

        let mut p = p;
        p.move_stop(dec!(105));
        // pullback does not loosen the stop
        let p = marked(p, dec!(108));
        assert_eq!(evaluate(&p, dec!(108), None), ExitDecision::Hold);
        assert_eq!(
            evaluate(&marked(p, dec!(104)), dec!(104), None),
            ExitDecision::Close {
                price: dec!(104),
                reason: ExitReason::TrailingStop
            }
        );
    }

    #[test]
    fn test_breakeven_stop_reason() {
        let mut p = position(OrderSide::Buy, trend_plan(OrderSide::Buy), StrategyType::TrendFollowing);
        p.first_target_hit = true;
        p.move_stop(dec!(100));
        assert_eq!(
            evaluate(&marked(p, dec!(99)), dec!(99), None),
            ExitDecision::Close {
                price: dec!(99),
                reason: ExitReason::BreakevenStop
            }
        );
    }

    #[test]
    fn test_final_target() {
        let p = position(OrderSide::Buy, trend_plan(OrderSide::Buy), StrategyType::TrendFollowing);
        assert_eq!(
            evaluate(&marked(p, dec!(131)), dec!(131), None),
            ExitDecision::Close {
                price: dec!(131),
                reason: ExitReason::FinalTarget
            }
        );
    }

    #[test]
    fn test_mean_reversion_exits() {
        let p = position(OrderSide::Buy, reversion_plan(), StrategyType::MeanReversion);
        assert_eq!(evaluate(&marked(p.clone(), dec!(103)), dec!(103), Some(40.0)), ExitDecision::Hold);
        assert_eq!(
            evaluate(&marked(p.clone(), dec!(103)), dec!(103), Some(48.0)),
            ExitDecision::Close {
                price: dec!(103),
                reason: ExitReason::RsiNeutral
            }
        );
        assert_eq!(
            evaluate(&marked(p, dec!(106)), dec!(106), Some(40.0)),
            ExitDecision::Close {
                price: dec!(106),
                reason: ExitReason::TargetReached
            }
        );
    }

    #[tokio::test]
    async fn test_apply_partial_then_close() {
        let manager = PositionManager::new();
        let plan = trend_plan(OrderSide::Buy);
        let (order, report) = fill(OrderSide::Buy, &plan);
        let opened = manager
            .open_from_fill(&order, &report, StrategyType::TrendFollowing, plan)
            .unwrap();

        manager.update_price("BTCUSDT", dec!(110));
        let current = manager.get_position(opened.id).unwrap();
        let decision = evaluate(&current, dec!(110), None);
        let trade = apply(&manager, &current, &decision).await.unwrap().unwrap();
        assert!(!trade.final_exit);
        assert_eq!(trade.realized_pnl, dec!(10));

        let current = manager.get_position(opened.id).unwrap();
        assert!(current.first_target_hit);
        assert_eq!(current.stop_loss, dec!(100));
        assert_eq!(current.quantity, dec!(1));

        manager.update_price("BTCUSDT", dec!(100));
        let current = manager.get_position(opened.id).unwrap();
        let decision = evaluate(&current, dec!(100), None);
        let trade = apply(&manager, &current, &decision).await.unwrap().unwrap();
        assert!(trade.final_exit);
        assert_eq!(trade.position_pnl, dec!(10));
    }
}
