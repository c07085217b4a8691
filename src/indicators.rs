//! Volatility primitives
//!
//! True range and Wilder-smoothed Average True Range, both as a streaming
//! state object (one update per bar) and as batch helpers over candle slices.

use crate::Candle;

/// True range of a bar given the previous close
///
/// Without a previous close only the bar's own range counts. A bar with
/// `high < low` contributes zero rather than a negative range.
pub fn true_range_single(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    let hl = (high - low).max(0.0);
    match prev_close {
        None => hl,
        Some(pc) => hl.max((high - pc).abs()).max((low - pc).abs()),
    }
}

/// Calculate True Range for every candle
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(candles.len());
    let mut prev_close = None;

    for candle in candles {
        tr.push(true_range_single(candle.high, candle.low, prev_close));
        prev_close = Some(candle.close);
    }

    tr
}

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        if period == 0 || i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Wilder smoothing seeded with the simple average of the first `period` values
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());
    if period == 0 {
        return vec![None; values.len()];
    }

    let seed = sma(values, period);
    let n = period as f64;
    let mut prev: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        let next = match prev {
            None if i + 1 == period => seed[i],
            None => None,
            Some(p) => Some((p * (n - 1.0) + value) / n),
        };
        prev = next;
        result.push(next);
    }

    result
}

/// Calculate Average True Range (ATR) with Wilder smoothing
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    wilder_smooth(&true_range(candles), period)
}

/// Rolling smoothed true-range estimate
///
/// The first `period` true ranges are averaged; while fewer have been seen the
/// running mean is kept as a provisional estimate. From then on the value is
/// updated with Wilder's rule `(prev * (n - 1) + tr) / n`.
#[derive(Debug, Clone)]
pub struct TrueRangeState {
    period: usize,
    count: usize,
    seed_sum: f64,
    value: f64,
    prev_close: Option<f64>,
}

impl TrueRangeState {
    /// `period` must be at least 1; callers validate it through `SuperTrendConfig`.
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            count: 0,
            seed_sum: 0.0,
            value: 0.0,
            prev_close: None,
        }
    }

    /// Feed one bar and return the current estimate
    pub fn update(&mut self, high: f64, low: f64, close: f64) -> f64 {
        let tr = true_range_single(high, low, self.prev_close);
        self.prev_close = Some(close);
        self.count += 1;

        if self.count <= self.period {
            self.seed_sum += tr;
            self.value = self.seed_sum / self.count as f64;
        } else {
            let n = self.period as f64;
            self.value = (self.value * (n - 1.0) + tr) / n;
        }

        self.value
    }

    /// Current estimate, provisional until `is_ready`
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Seeded with a full period of true ranges
    pub fn is_ready(&self) -> bool {
        self.count >= self.period
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn prev_close(&self) -> Option<f64> {
        self.prev_close
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.seed_sum = 0.0;
        self.value = 0.0;
        self.prev_close = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(data: &[(f64, f64, f64)]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        data.iter()
            .enumerate()
            .map(|(i, &(high, low, close))| Candle {
                datetime: start + Duration::minutes(i as i64),
                open: close,
                high,
                low,
                close,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(2.0));
        assert_eq!(result[3], Some(3.0));
        assert_eq!(result[4], Some(4.0));
    }

    #[test]
    fn test_true_range_first_bar_uses_range_only() {
        let tr = true_range(&candles(&[(105.0, 95.0, 100.0), (112.0, 108.0, 110.0)]));
        assert_eq!(tr[0], 10.0);
        // gap up: |112 - 100| dominates the bar's own 4.0 range
        assert_eq!(tr[1], 12.0);
    }

    #[test]
    fn test_inverted_bar_never_negative() {
        assert_eq!(true_range_single(95.0, 105.0, None), 0.0);
    }

    #[test]
    fn test_wilder_smoothing() {
        let values = vec![2.0, 4.0, 6.0, 10.0];
        let result = wilder_smooth(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(4.0));
        // (4 * 2 + 10) / 3
        assert_relative_eq!(result[3].unwrap(), 6.0);
    }

    #[test]
    fn test_streaming_matches_batch() {
        let data = candles(&[
            (101.0, 99.0, 100.0),
            (103.0, 100.0, 102.0),
            (104.0, 98.0, 99.0),
            (100.0, 97.0, 98.0),
            (105.0, 98.0, 104.0),
            (106.0, 103.0, 105.0),
        ]);
        let batch = atr(&data, 3);
        let mut state = TrueRangeState::new(3);

        for (candle, expected) in data.iter().zip(batch) {
            let value = state.update(candle.high, candle.low, candle.close);
            if let Some(expected) = expected {
                assert!(state.is_ready());
                assert_relative_eq!(value, expected, epsilon = 1e-12);
            } else {
                assert!(!state.is_ready());
            }
        }
    }

    #[test]
    fn test_provisional_value_is_running_mean() {
        let mut state = TrueRangeState::new(10);
        state.update(102.0, 98.0, 100.0);
        state.update(101.0, 99.0, 100.0);
        assert_eq!(state.value(), 3.0);
        assert!(!state.is_ready());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut state = TrueRangeState::new(2);
        state.update(102.0, 98.0, 100.0);
        state.update(102.0, 98.0, 100.0);
        assert!(state.is_ready());

        state.reset();
        assert!(!state.is_ready());
        assert_eq!(state.count(), 0);
        assert_eq!(state.prev_close(), None);
        assert_eq!(state.value(), 0.0);
    }
}
