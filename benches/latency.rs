//! Latency benchmarks for the per-bar and per-order hot paths.
//!
//! Run with: `cargo bench --bench latency`

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use market_core::types::{
    MarketBar, OrderRequest, OrderSide, RiskSettings, SizingMethod, SizingResult, Timeframe,
};
use risk_manager::{
    CircuitBreaker, CircuitBreakerConfig, OrderValidator, PositionSizer, RiskEventLog,
    SignalBinding, SizingRequest, ValidationContext,
};
use signal_engine::{IndicatorEngine, RegimeClassifier, WARMUP_BARS};

/// Deterministic bars: drift plus a slow oscillation.
fn generate_bars(symbol: &str, count: usize) -> Vec<MarketBar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let t = i as f64;
            let close = 100.0 + 0.02 * t + 3.0 * (t / 7.0).sin();
            MarketBar {
                symbol: symbol.to_string(),
                timeframe: Timeframe::M15,
                open: close - 0.3,
                high: close + 0.9,
                low: close - 0.9,
                close,
                volume: 1_000.0 + 200.0 * (t / 9.0).sin(),
                timestamp: start + Duration::minutes(15 * i as i64),
            }
        })
        .collect()
}

fn order(quantity: Decimal) -> OrderRequest {
    OrderRequest {
        id: Uuid::new_v4(),
        signal_id: Uuid::new_v4(),
        symbol: "BTCUSDT".to_string(),
        side: OrderSide::Buy,
        quantity,
        price: dec!(100),
        stop_loss: dec!(95),
        take_profit: dec!(110),
        estimated_fees: dec!(0.5),
        estimated_slippage: dec!(0.25),
        sizing: SizingResult {
            symbol: "BTCUSDT".to_string(),
            method: SizingMethod::FixedPercentage,
            recommended_size: quantity,
            max_size: dec!(10),
            risk_score: dec!(0.5),
            confidence_level: dec!(70),
            computed_at: Utc::now(),
            breaker_epoch: 0,
        },
        created_at: Utc::now(),
    }
}

/// Benchmark one incremental indicator update on a warm engine.
fn bench_indicator_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("indicator_update");

    let bars = generate_bars("BTCUSDT", WARMUP_BARS + 1_000);
    let (warmup, rest) = bars.split_at(WARMUP_BARS);

    group.throughput(Throughput::Elements(1));
    group.bench_function("warm_engine", |b| {
        b.iter_batched(
            || {
                let mut engine = IndicatorEngine::new("BTCUSDT", Timeframe::M15);
                for bar in warmup {
                    let _ = engine.update(bar);
                }
                engine
            },
            |mut engine| {
                for bar in rest.iter().take(1) {
                    black_box(engine.update(black_box(bar)).ok());
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

/// Benchmark regime classification of a single indicator set.
fn bench_regime_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("regime_classify");

    let bars = generate_bars("BTCUSDT", WARMUP_BARS + 10);
    let mut engine = IndicatorEngine::new("BTCUSDT", Timeframe::M15);
    let mut latest = None;
    for bar in &bars {
        if let Ok(set) = engine.update(bar) {
            latest = Some(set);
        }
    }
    let set = latest.expect("engine warmed up");
    let classifier = RegimeClassifier::default();

    group.throughput(Throughput::Elements(1));
    group.bench_function("classify", |b| {
        b.iter(|| black_box(classifier.classify(black_box(&set))))
    });

    group.finish();
}

/// Benchmark position sizing for each method.
fn bench_position_sizing(c: &mut Criterion) {
    let mut group = c.benchmark_group("position_sizing");

    let sizer = PositionSizer::default();
    let now = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
    let request = SizingRequest {
        symbol: "BTCUSDT".to_string(),
        capital: dec!(10000),
        price: dec!(100),
        stop_distance: dec!(5),
        atr_pct: Some(dec!(0.02)),
        trade_stats: None,
        confidence: 70.0,
        high_volatility: false,
        low_liquidity: false,
        remaining_risk_budget: dec!(600),
        remaining_symbol_budget: dec!(2000),
        breaker_epoch: 0,
    };

    for method in [
        SizingMethod::FixedPercentage,
        SizingMethod::VolatilityAdjusted,
        SizingMethod::RiskParity,
    ] {
        let settings = RiskSettings {
            position_sizing_method: method,
            ..Default::default()
        };
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("calculate", method.as_str()),
            &settings,
            |b, settings| {
                b.iter(|| black_box(sizer.calculate(settings, black_box(&request), now).ok()))
            },
        );
    }

    group.finish();
}

/// Benchmark the final order gate, accepted and rejected.
fn bench_order_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_validation");

    let now = Utc::now();
    let settings = RiskSettings::default();
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::default(), dec!(10000), now);
    let validator = OrderValidator::default();
    let signal = SignalBinding {
        symbol: "BTCUSDT".to_string(),
        side: OrderSide::Buy,
        price: dec!(100),
        has_pending_order: false,
    };
    let ctx = ValidationContext {
        settings: &settings,
        breaker: &breaker,
        signal: Some(&signal),
        open_positions: 1,
        capital: dec!(10000),
        available_balance: dec!(10000),
    };

    for (name, quantity) in [("accepted", dec!(5)), ("oversized", dec!(50))] {
        let request = order(quantity);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("validate", name), &request, |b, request| {
            let mut events = RiskEventLog::new();
            b.iter(|| black_box(validator.validate(request.clone(), &ctx, now, &mut events).ok()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_indicator_update,
    bench_regime_classify,
    bench_position_sizing,
    bench_order_validation,
);

criterion_main!(benches);
