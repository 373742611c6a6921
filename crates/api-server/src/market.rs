//! Per-symbol indicator engines.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use market_core::types::{IndicatorSet, MarketBar, Timeframe};
use market_core::{Error, Result};
use signal_engine::IndicatorEngine;
use tracing::{debug, warn};

/// Indicator engines keyed by symbol, all on one timeframe.
pub struct MarketRegistry {
    timeframe: Timeframe,
    engines: DashMap<String, IndicatorEngine>,
}

impl MarketRegistry {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            engines: DashMap::new(),
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn symbols(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.key().clone()).collect()
    }

    pub fn bars_seen(&self, symbol: &str) -> usize {
        self.engines.get(symbol).map(|e| e.bars_seen()).unwrap_or(0)
    }

    pub fn last_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.engines.get(symbol).and_then(|e| e.last_timestamp())
    }

    pub fn latest(&self, symbol: &str) -> Option<IndicatorSet> {
        self.engines.get(symbol).and_then(|e| e.latest().cloned())
    }

    /// Feed new completed bars for `symbol`, oldest first. Bars already seen
    /// and bars still forming at `now` are skipped. Returns one set per bar
    /// once the engine is warm.
    pub fn ingest(&self, symbol: &str, bars: &[MarketBar], now: DateTime<Utc>) -> Result<Vec<IndicatorSet>> {
        let mut engine = self
            .engines
            .entry(symbol.to_string())
            .or_insert_with(|| IndicatorEngine::new(symbol, self.timeframe));

        let mut sets = Vec::new();
        let mut skipped = 0usize;
        for bar in bars {
            if bar.timeframe != self.timeframe {
                return Err(Error::InvalidInputs(format!(
                    "{} bar for {} on a {} registry",
                    bar.timeframe, symbol, self.timeframe
                )));
            }
            let seen = engine.last_timestamp().is_some_and(|last| bar.timestamp <= last);
            if seen || !bar.is_complete(now) {
                skipped += 1;
                continue;
            }
            match engine.update(bar) {
                Ok(set) => sets.push(set),
                Err(Error::InsufficientHistory { have, need, .. }) => {
                    debug!(symbol = %symbol, have, need, "Indicator engine warming up");
                }
                Err(e) => {
                    warn!(symbol = %symbol, timestamp = %bar.timestamp, error = %e, "Bar rejected");
                    return Err(e);
                }
            }
        }

        if skipped > 0 {
            debug!(symbol = %symbol, skipped, "Skipped seen or incomplete bars");
        }
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use signal_engine::WARMUP_BARS;

    fn bars(symbol: &str, count: usize) -> Vec<MarketBar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let t = i as f64;
                let close = 200.0 + 0.05 * t + 2.0 * (t / 6.0).sin();
                MarketBar {
                    symbol: symbol.to_string(),
                    timeframe: Timeframe::M15,
                    open: close - 0.2,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 500.0 + 50.0 * (t / 4.0).cos(),
                    timestamp: start + Duration::minutes(15 * i as i64),
                }
            })
            .collect()
    }

    #[test]
    fn test_warmup_then_one_set_per_bar() {
        let registry = MarketRegistry::new(Timeframe::M15);
        let all = bars("SOLUSDT", WARMUP_BARS + 5);
        let now = all[all.len() - 1].close_time();

        let sets = registry.ingest("SOLUSDT", &all, now).unwrap();
        assert_eq!(sets.len(), 6);
        assert_eq!(registry.symbols(), vec!["SOLUSDT".to_string()]);
        assert_eq!(registry.latest("SOLUSDT").unwrap().timestamp, all[all.len() - 1].timestamp);
    }

    #[test]
    fn test_repeated_and_forming_bars_are_skipped() {
        let registry = MarketRegistry::new(Timeframe::M15);
        let all = bars("SOLUSDT", WARMUP_BARS + 2);
        let last = &all[all.len() - 1];

        // last bar still forming
        let sets = registry.ingest("SOLUSDT", &all, last.timestamp).unwrap();
        assert_eq!(sets.len(), 2);

        let sets = registry.ingest("SOLUSDT", &all, last.close_time()).unwrap();
        assert_eq!(sets.len(), 1);

        let sets = registry.ingest("SOLUSDT", &all, last.close_time()).unwrap();
        assert!(sets.is_empty());
    }

    #[test]
    fn test_wrong_timeframe_rejected() {
        let registry = MarketRegistry::new(Timeframe::H4);
        let all = bars("SOLUSDT", 3);
        assert!(registry.ingest("SOLUSDT", &all, Utc::now()).is_err());
    }
}
