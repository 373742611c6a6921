//! Streaming ADX / DMI (Wilder).

use super::rolling::WilderAverage;

/// Output of one ADX update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdxValue {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// +DM/-DM and TR are Wilder-smoothed from the second bar on; DX feeds a
/// second Wilder average whose first value is the mean of the first `period` DX.
#[derive(Debug, Clone)]
pub struct Adx {
    tr: WilderAverage,
    plus_dm: WilderAverage,
    minus_dm: WilderAverage,
    dx: WilderAverage,
    prev: Option<(f64, f64, f64)>,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            tr: WilderAverage::new(period),
            plus_dm: WilderAverage::new(period),
            minus_dm: WilderAverage::new(period),
            dx: WilderAverage::new(period),
            prev: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<AdxValue> {
        let Some((prev_high, prev_low, prev_close)) = self.prev.replace((high, low, close)) else {
            return None;
        };

        let (plus_dm, minus_dm) = directional_movement(high, low, prev_high, prev_low);
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        let tr_avg = self.tr.update(tr);
        let plus_avg = self.plus_dm.update(plus_dm);
        let minus_avg = self.minus_dm.update(minus_dm);

        let (Some(tr_avg), Some(plus_avg), Some(minus_avg)) = (tr_avg, plus_avg, minus_avg) else {
            return None;
        };

        let (plus_di, minus_di, dx) = di_and_dx(tr_avg, plus_avg, minus_avg);
        self.dx.update(dx).map(|adx| AdxValue {
            adx,
            plus_di,
            minus_di,
        })
    }
}

/// (+DM, -DM) for one bar.
pub(crate) fn directional_movement(high: f64, low: f64, prev_high: f64, prev_low: f64) -> (f64, f64) {
    let up = high - prev_high;
    let down = prev_low - low;
    let plus = if up > down && up > 0.0 { up } else { 0.0 };
    let minus = if down > up && down > 0.0 { down } else { 0.0 };
    (plus, minus)
}

/// (+DI, -DI, DX) from smoothed TR and DM.
pub(crate) fn di_and_dx(tr_avg: f64, plus_avg: f64, minus_avg: f64) -> (f64, f64, f64) {
    if tr_avg <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let plus_di = 100.0 * plus_avg / tr_avg;
    let minus_di = 100.0 * minus_avg / tr_avg;
    let sum = plus_di + minus_di;
    let dx = if sum > 0.0 {
        100.0 * (plus_di - minus_di).abs() / sum
    } else {
        0.0
    };
    (plus_di, minus_di, dx)
}
