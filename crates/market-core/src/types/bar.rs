//! OHLCV bar and timeframe types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bar timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
}

impl Timeframe {
    /// Length of one bar.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }

    /// Whether `ts` sits exactly on a bar boundary of this timeframe.
    pub fn is_boundary(&self, ts: DateTime<Utc>) -> bool {
        let secs = self.duration().num_seconds();
        ts.timestamp().rem_euclid(secs) == 0
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single OHLCV bar. `timestamp` is the bar open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarketBar {
    /// Time at which the bar is complete.
    pub fn close_time(&self) -> DateTime<Utc> {
        self.timestamp + self.timeframe.duration()
    }

    /// A bar is actionable only after its close time has passed.
    pub fn is_complete(&self, now: DateTime<Utc>) -> bool {
        now >= self.close_time()
    }

    /// True range against the previous close (or the bar's own range for the first bar).
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let range = self.high - self.low;
        match prev_close {
            Some(pc) => range
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(ts: DateTime<Utc>, timeframe: Timeframe) -> MarketBar {
        MarketBar {
            symbol: "BTCUSDT".to_string(),
            timeframe,
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close: 105.0,
            volume: 1000.0,
            timestamp: ts,
        }
    }

    #[test]
    fn test_bar_completion() {
        let open = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let b = bar(open, Timeframe::M15);
        assert!(!b.is_complete(open + Duration::minutes(14)));
        assert!(b.is_complete(open + Duration::minutes(15)));
    }

    #[test]
    fn test_timeframe_boundaries() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        assert!(Timeframe::H4.is_boundary(ts));
        assert!(!Timeframe::H4.is_boundary(ts + Duration::hours(1)));
        assert!(Timeframe::H1.is_boundary(ts + Duration::hours(1)));
        assert!(!Timeframe::M15.is_boundary(ts + Duration::minutes(7)));
    }

    #[test]
    fn test_true_range_uses_gap() {
        let b = bar(Utc::now(), Timeframe::H1);
        assert_eq!(b.true_range(None), 15.0);
        assert_eq!(b.true_range(Some(120.0)), 25.0);
        assert_eq!(b.true_range(Some(100.0)), 15.0);
    }

    #[test]
    fn test_timeframe_serde_names() {
        let json = serde_json::to_string(&Timeframe::M15).unwrap();
        assert_eq!(json, "\"15m\"");
        let tf: Timeframe = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(tf, Timeframe::H4);
    }
}
