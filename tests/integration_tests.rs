//! Integration tests for component interactions.
//!
//! These tests verify that the major components work together correctly.

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use market_core::config::AppConfig;
use market_core::types::{
    ExecutionReport, ExitPlan, IndicatorSet, LimitType, OrderRequest, OrderSide, Regime,
    RiskSettings, Signal, SizingMethod, SizingResult, StrategyType,
};
use market_core::Error;

fn indicator_set(symbol: &str) -> IndicatorSet {
    IndicatorSet {
        symbol: symbol.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap(),
        close: 100.0,
        high: 100.5,
        low: 99.5,
        volume: 1_000.0,
        adx: 15.0,
        plus_di: 20.0,
        minus_di: 20.0,
        atr: 1.0,
        rsi: 50.0,
        ema_fast: 100.0,
        ema_slow: 100.0,
        ema_50: 100.0,
        ema_200: 100.0,
        sma_mid: 100.0,
        sma_long: 100.0,
        bb_upper: 102.0,
        bb_middle: 100.0,
        bb_lower: 98.0,
        bb_width: 0.04,
        bb_width_median: 0.05,
        bb_percent_b: 0.5,
        macd_line: 0.0,
        macd_signal: 0.0,
        macd_histogram: 0.0,
        volume_mean: 1_000.0,
        volume_stddev: 100.0,
        support: 97.0,
        resistance: 103.0,
    }
}

fn order(quantity: Decimal, price: Decimal, max_size: Decimal) -> OrderRequest {
    OrderRequest {
        id: Uuid::new_v4(),
        signal_id: Uuid::new_v4(),
        symbol: "ETHUSDT".to_string(),
        side: OrderSide::Buy,
        quantity,
        price,
        stop_loss: price - dec!(5),
        take_profit: price + dec!(5),
        estimated_fees: Decimal::ZERO,
        estimated_slippage: Decimal::ZERO,
        sizing: SizingResult {
            symbol: "ETHUSDT".to_string(),
            method: SizingMethod::FixedPercentage,
            recommended_size: quantity,
            max_size,
            risk_score: dec!(1),
            confidence_level: dec!(70),
            computed_at: Utc::now(),
            breaker_epoch: 0,
        },
        created_at: Utc::now(),
    }
}

/// An order realizing `signal` at its price and exit levels.
fn order_for(signal: &Signal, quantity: Decimal) -> OrderRequest {
    let mut request = order(quantity, signal.price, dec!(20));
    request.signal_id = signal.id;
    request.symbol = signal.symbol.clone();
    request.sizing.symbol = signal.symbol.clone();
    if let Some(plan) = &signal.exit_plan {
        request.stop_loss = plan.stop_loss;
        request.take_profit = plan.take_profit_1;
    }
    request
}

/// Feed a ranging bar and then an oversold touch of the lower band, so the
/// account opens a mean-reversion buy on `symbol`.
async fn open_signal(state: &api_server::AppState, symbol: &str) -> Signal {
    let before = indicator_set(symbol);
    let mut after = before.clone();
    after.timestamp = before.timestamp + Duration::minutes(15);
    after.rsi = 24.0;
    after.close = 98.1;
    after.low = 97.9;
    after.volume = 800.0;
    after.support = 97.8;

    let evaluation = state.account.evaluate(vec![before, after], None).await.unwrap();
    evaluation
        .signals
        .into_iter()
        .map(|candidate| candidate.signal)
        .find(|signal| signal.strategy_type == StrategyType::MeanReversion)
        .unwrap()
}

fn exit_plan() -> ExitPlan {
    ExitPlan {
        stop_loss: dec!(95),
        take_profit_1: dec!(105),
        take_profit_2: dec!(115),
        trailing_distance: Some(dec!(5)),
        partial_close_fraction: dec!(0.5),
        target_price: None,
        rsi_exit_band: None,
    }
}

/// ADX 25 with a 0.8% EMA gap is trending; 2.5% ATR/price overlays high volatility.
#[test]
fn test_regime_scenarios() {
    use signal_engine::RegimeClassifier;

    let classifier = RegimeClassifier::default();

    let mut trending = indicator_set("BTCUSDT");
    trending.adx = 25.0;
    trending.ema_50 = 100.8;
    let state = classifier.classify(&trending);
    assert_eq!(state.regime, Regime::Trending);
    assert_eq!(classifier.classify(&trending), state);

    let mut volatile = indicator_set("BTCUSDT");
    volatile.atr = 2.5;
    let state = classifier.classify(&volatile);
    assert_eq!(state.regime, Regime::HighVolatility);
    assert_eq!(state.base_regime, Regime::Ranging);
}

/// Capital 100, 0.5% risk per trade, $50 stop: 0.01 units.
#[test]
fn test_small_account_sizing() {
    use api_server::{Account, SizingParams};

    let mut config = AppConfig::default();
    config.engine.starting_capital = dec!(100);
    config.risk.risk_per_trade = dec!(0.005);

    // Monday
    let now = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
    let account = Account::new(&config, now).unwrap();
    let result = account
        .size_position(
            &SizingParams {
                symbol: Some("BTCUSDT".to_string()),
                price: Some(dec!(100)),
                stop_loss: Some(dec!(50)),
                ..Default::default()
            },
            now,
        )
        .unwrap();

    assert_eq!(result.recommended_size, dec!(0.01));
    assert_eq!(result.method, SizingMethod::FixedPercentage);
}

/// Daily P&L of -2.10 against a 2.00 limit pauses trading; the pause lifts
/// at the 12 hour mark only once nothing is critical.
#[test]
fn test_daily_loss_pause_lifecycle() {
    use risk_manager::{
        BreakerState, CircuitBreaker, CircuitBreakerConfig, ExposureSnapshot, OrderValidator,
        RiskEventLog, RiskMonitor, ValidationContext,
    };
    use trading_engine::PositionManager;

    let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
    let capital = dec!(10000);
    let settings = RiskSettings {
        max_daily_loss: dec!(2.00),
        ..Default::default()
    };

    let positions = PositionManager::new();
    let mut monitor = RiskMonitor::new(settings.clone(), Vec::new());
    let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::default(), capital, now);
    let mut events = RiskEventLog::new();

    let entry = order(dec!(1), dec!(100), dec!(10));
    let report = ExecutionReport::filled(&entry, dec!(1), dec!(100), Decimal::ZERO);
    positions
        .open_from_fill(&entry, &report, StrategyType::MeanReversion, exit_plan())
        .unwrap();
    positions.update_price("ETHUSDT", dec!(97.90));

    let update = monitor.evaluate(
        ExposureSnapshot::from_positions(capital, Decimal::ZERO, &positions),
        now,
        &mut events,
    );
    assert!(update.daily_loss_breached);
    assert!(update.newly_critical.contains(&LimitType::DailyLoss));

    assert!(breaker.pause_for_daily_loss(dec!(-2.10), settings.max_daily_loss, now, &mut events));
    assert_eq!(breaker.state(), BreakerState::Paused);
    assert!(events
        .recent(10)
        .iter()
        .any(|e| e.event_type.as_str() == "daily_loss_limit"));

    // Paused: the validator refuses new orders
    let ctx = ValidationContext {
        settings: &settings,
        breaker: &breaker,
        signal: None,
        open_positions: 1,
        capital,
        available_balance: capital - dec!(100),
    };
    let rejected = OrderValidator::default().validate(order(dec!(1), dec!(100), dec!(10)), &ctx, now, &mut events);
    assert!(matches!(rejected, Err(Error::CircuitOpen { .. })));

    // Pause elapsed but the daily loss is still critical
    let later = now + Duration::hours(12);
    assert!(!breaker.tick(later, monitor.has_critical(), &mut events));
    assert_eq!(breaker.state(), BreakerState::Paused);

    // Price recovers, the limit clears, the pause lifts
    positions.update_price("ETHUSDT", dec!(100));
    monitor.evaluate(
        ExposureSnapshot::from_positions(capital, Decimal::ZERO, &positions),
        later,
        &mut events,
    );
    assert!(!monitor.has_critical());
    assert!(breaker.tick(later, monitor.has_critical(), &mut events));
    assert_eq!(breaker.state(), BreakerState::Active);
}

/// An order worth nearly 12% of the portfolio against a 10% ceiling is a limit breach.
#[tokio::test]
async fn test_oversized_order_is_limit_breach() {
    use api_server::AppState;

    let state = AppState::new(AppConfig::default(), None).unwrap();
    let signal = open_signal(&state, "ETHUSDT").await;
    let oversized = order_for(&signal, dec!(12));

    let result = state.account.validate_order(oversized).await;
    match result {
        Err(Error::LimitBreach { limit, .. }) => assert_eq!(limit, LimitType::PositionSize),
        other => panic!("expected LimitBreach, got {:?}", other),
    }

    let events = state.account.events(10).await.unwrap();
    assert_eq!(events[0].event_type.as_str(), "order_rejected");
}

/// Once triggered, nothing validates until an explicit reset.
#[tokio::test]
async fn test_emergency_stop_blocks_orders_until_reset() {
    use api_server::AppState;
    use risk_manager::{BreakerState, TripReason};

    let state = AppState::new(AppConfig::default(), None).unwrap();
    let mut breaker = state.account.breaker();
    let signal = open_signal(&state, "ETHUSDT").await;

    let status = state
        .account
        .emergency_stop(TripReason::ManualEmergencyStop, "operator halt", "desk")
        .await
        .unwrap();
    assert_eq!(status.state, BreakerState::Triggered);
    assert_eq!(status.epoch, 1);

    breaker.changed().await.unwrap();
    assert_eq!(breaker.borrow().state, BreakerState::Triggered);

    // sized before the halt (epoch 0) and after it
    for epoch in [0, 1] {
        let mut request = order_for(&signal, dec!(1));
        request.sizing.breaker_epoch = epoch;
        let result = state.account.validate_order(request).await;
        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
    }

    let status = state.account.reset_breaker("desk").await.unwrap();
    assert_eq!(status.state, BreakerState::Active);

    // a sizing snapshot from before the halt is still stale
    let stale = order_for(&signal, dec!(1));
    assert!(matches!(
        state.account.validate_order(stale).await,
        Err(Error::CircuitOpen { .. })
    ));

    // rejections resolved the first signal; the market offers a new one
    let signal = open_signal(&state, "ETHUSDT").await;
    let mut fresh = order_for(&signal, dec!(1));
    fresh.sizing.breaker_epoch = 1;
    assert!(state.account.validate_order(fresh).await.is_ok());
}

/// Invalid settings are rejected whole; valid ones take effect at once.
#[tokio::test]
async fn test_settings_update_is_all_or_nothing() {
    use api_server::{dispatch, Action, AppState};

    let state = AppState::new(AppConfig::default(), None).unwrap();

    let invalid = RiskSettings {
        max_position_size: dec!(1.5),
        max_daily_loss: dec!(50),
        ..Default::default()
    };
    let response = dispatch(&state, Action::UpdateRiskSettings { settings: invalid }).await;
    assert!(!response.success);

    let status = state.account.status().await.unwrap();
    assert_eq!(status.settings, RiskSettings::default());

    let valid = RiskSettings {
        max_positions: 1,
        ..Default::default()
    };
    let response = dispatch(&state, Action::UpdateRiskSettings { settings: valid }).await;
    assert!(response.success);

    // first order takes the only slot, the second breaches the count
    let eth = open_signal(&state, "ETHUSDT").await;
    let sol = open_signal(&state, "SOLUSDT").await;
    state.account.validate_order(order_for(&eth, dec!(1))).await.unwrap();
    match state.account.validate_order(order_for(&sol, dec!(1))).await {
        Err(Error::LimitBreach { limit, .. }) => assert_eq!(limit, LimitType::PositionCount),
        other => panic!("expected PositionCount breach, got {:?}", other),
    }
}

/// The action boundary served over HTTP.
#[tokio::test]
async fn test_http_action_flow() {
    use api_server::{create_router, AppState};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    let router = create_router(Arc::new(AppState::new(AppConfig::default(), None).unwrap()));

    let post = |body: &'static str| {
        Request::builder()
            .method("POST")
            .uri("/api/v1/actions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    };

    let response = router
        .clone()
        .oneshot(post(r#"{"action":"emergency_stop","operator":"desk"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(post(
            r#"{"action":"calculate_position_size","symbol":"ETHUSDT","price":"100","stop_loss":"105"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    // sizing is advisory; only validation is gated by the breaker
    assert_eq!(body["success"], true);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/risk/events?limit=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let events: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(events[0]["event_type"], "manual_emergency_stop");
}
