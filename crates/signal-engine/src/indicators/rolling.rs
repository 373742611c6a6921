//! Fixed-window streaming primitives.
//!
//! Each primitive consumes one value per bar and yields `None` until its
//! window is warm.

use std::collections::VecDeque;

/// Exponential moving average seeded with the SMA of the first `period` values.
///
/// k = 2/(n+1); EMA[i] = x[i]*k + EMA[i-1]*(1-k).
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    k: f64,
    count: usize,
    seed_sum: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            k: 2.0 / (period as f64 + 1.0),
            count: 0,
            seed_sum: 0.0,
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.count += 1;
        match self.value {
            Some(prev) => {
                self.value = Some(x * self.k + prev * (1.0 - self.k));
            }
            None => {
                self.seed_sum += x;
                if self.count == self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Simple moving average over a fixed window.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
        }
    }

    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.window.push_back(x);
        self.sum += x;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.window.len() == self.period {
            Some(self.sum / self.period as f64)
        } else {
            None
        }
    }
}

/// Wilder's running average: mean of the first `period` values, then
/// avg = (prev * (n-1) + x) / n.
#[derive(Debug, Clone)]
pub struct WilderAverage {
    period: usize,
    count: usize,
    seed_sum: f64,
    value: Option<f64>,
}

impl WilderAverage {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            count: 0,
            seed_sum: 0.0,
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.count += 1;
        let n = self.period as f64;
        match self.value {
            Some(prev) => self.value = Some((prev * (n - 1.0) + x) / n),
            None => {
                self.seed_sum += x;
                if self.count == self.period {
                    self.value = Some(self.seed_sum / n);
                }
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Rolling mean and population standard deviation.
#[derive(Debug, Clone)]
pub struct RollingStats {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl RollingStats {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    /// Returns (mean, stddev) once the window is full.
    pub fn update(&mut self, x: f64) -> Option<(f64, f64)> {
        self.window.push_back(x);
        self.sum += x;
        self.sum_sq += x * x;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<(f64, f64)> {
        if self.window.len() < self.period {
            return None;
        }
        let n = self.period as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        Some((mean, variance.sqrt()))
    }
}

/// Rolling extremes (lowest and highest) over a fixed window.
#[derive(Debug, Clone)]
pub struct RollingExtremes {
    period: usize,
    lows: VecDeque<f64>,
    highs: VecDeque<f64>,
}

impl RollingExtremes {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            lows: VecDeque::with_capacity(period + 1),
            highs: VecDeque::with_capacity(period + 1),
        }
    }

    /// Returns (lowest low, highest high) once the window is full.
    pub fn update(&mut self, low: f64, high: f64) -> Option<(f64, f64)> {
        self.lows.push_back(low);
        self.highs.push_back(high);
        if self.lows.len() > self.period {
            self.lows.pop_front();
            self.highs.pop_front();
        }
        if self.lows.len() < self.period {
            return None;
        }
        let lowest = self.lows.iter().copied().fold(f64::INFINITY, f64::min);
        let highest = self.highs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((lowest, highest))
    }
}

/// Trailing median over a fixed window.
#[derive(Debug, Clone)]
pub struct RollingMedian {
    period: usize,
    window: VecDeque<f64>,
}

impl RollingMedian {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.window.push_back(x);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        Some(median(&mut sorted))
    }
}

/// Median of a non-empty slice (average of the middle pair for even lengths).
pub fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
