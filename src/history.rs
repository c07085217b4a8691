//! Indicator history tracking
//!
//! Wraps a [`SuperTrend`] and keeps a bounded record of recent bars, levels and
//! trend flips for reporting.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::config::ConfigError;
use crate::supertrend::{IndicatorOutput, SuperTrend, SuperTrendConfig};
use crate::{Candle, Trend};

/// One processed bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub datetime: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub level: Option<f64>,
    pub trend: Option<Trend>,
}

/// Trend flip observed while ready
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRecord {
    pub datetime: DateTime<Utc>,
    pub trend: Trend,
    pub price: f64,
    pub level: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RangeStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReturnStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Summary statistics over the retained history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total_bars: usize,
    pub total_signals: usize,
    pub buy_signals: usize,
    pub sell_signals: usize,
    pub price_range: RangeStats,
    pub level_range: RangeStats,
    pub returns: ReturnStats,
}

fn range_stats(values: &[f64]) -> RangeStats {
    if values.is_empty() {
        return RangeStats::default();
    }
    RangeStats {
        min: Statistics::min(values),
        max: Statistics::max(values),
        mean: values.mean(),
    }
}

/// Supertrend indicator with bounded history
#[derive(Debug, Clone)]
pub struct SuperTrendHistory {
    indicator: SuperTrend,
    max_history: usize,
    points: VecDeque<HistoryPoint>,
    signals: VecDeque<SignalRecord>,
}

impl SuperTrendHistory {
    pub fn new(config: SuperTrendConfig, max_history: usize) -> Result<Self, ConfigError> {
        if max_history == 0 {
            return Err(ConfigError::OutOfRange {
                field: "strategy.history_len",
                expected: ">= 1",
                value: 0.0,
            });
        }
        Ok(Self {
            indicator: SuperTrend::new(config)?,
            max_history,
            points: VecDeque::with_capacity(max_history.min(4096)),
            signals: VecDeque::new(),
        })
    }

    /// Feed one bar through the indicator and record it
    pub fn update(&mut self, candle: &Candle) -> IndicatorOutput {
        let output = self.indicator.update(candle);
        let reading = output.reading();

        push_bounded(
            &mut self.points,
            HistoryPoint {
                datetime: candle.datetime,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                level: reading.map(|r| r.level),
                trend: reading.and_then(|r| r.trend),
            },
            self.max_history,
        );

        if let Some(reading) = reading {
            if let Some(trend) = reading.flipped {
                push_bounded(
                    &mut self.signals,
                    SignalRecord {
                        datetime: candle.datetime,
                        trend,
                        price: candle.close,
                        level: reading.level,
                    },
                    self.max_history,
                );
            }
        }

        output
    }

    pub fn indicator(&self) -> &SuperTrend {
        &self.indicator
    }

    pub fn points(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.points.iter()
    }

    /// Most recent `count` trend flips, oldest first
    pub fn recent_signals(&self, count: usize) -> Vec<SignalRecord> {
        let skip = self.signals.len().saturating_sub(count);
        self.signals.iter().skip(skip).cloned().collect()
    }

    pub fn reset(&mut self) {
        self.indicator.reset();
        self.points.clear();
        self.signals.clear();
    }

    pub fn stats(&self) -> HistoryStats {
        if self.points.len() < 2 {
            return HistoryStats {
                total_bars: self.points.len(),
                ..Default::default()
            };
        }

        let closes: Vec<f64> = self.points.iter().map(|p| p.close).collect();
        let levels: Vec<f64> = self.points.iter().filter_map(|p| p.level).collect();
        let returns: Vec<f64> = closes
            .iter()
            .tuple_windows()
            .map(|(prev, curr)| (curr - prev) / prev)
            .collect();

        let buy_signals = self
            .signals
            .iter()
            .filter(|s| s.trend == Trend::Up)
            .count();

        HistoryStats {
            total_bars: self.points.len(),
            total_signals: self.signals.len(),
            buy_signals,
            sell_signals: self.signals.len() - buy_signals,
            price_range: range_stats(&closes),
            level_range: range_stats(&levels),
            returns: ReturnStats {
                mean: returns.as_slice().mean(),
                std: returns.as_slice().population_std_dev(),
                min: Statistics::min(returns.as_slice()),
                max: Statistics::max(returns.as_slice()),
            },
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn bar(i: i64, high: f64, low: f64, close: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            datetime: start + Duration::minutes(i),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = SuperTrendHistory::new(SuperTrendConfig::new(2, 1.0), 3).unwrap();
        for i in 0..10 {
            history.update(&bar(i, 101.0, 99.0, 100.0));
        }
        assert_eq!(history.points().count(), 3);
    }

    #[test]
    fn test_zero_history_rejected() {
        assert!(SuperTrendHistory::new(SuperTrendConfig::default(), 0).is_err());
    }

    #[test]
    fn test_signals_recorded() {
        let mut history = SuperTrendHistory::new(SuperTrendConfig::new(2, 1.0), 100).unwrap();
        history.update(&bar(0, 101.0, 99.0, 100.0));
        history.update(&bar(1, 101.0, 99.0, 100.0));
        history.update(&bar(2, 106.0, 104.0, 105.0));
        history.update(&bar(3, 96.0, 90.0, 91.0));

        let signals = history.recent_signals(10);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].trend, Trend::Up);
        assert_eq!(signals[1].trend, Trend::Down);
        assert_eq!(history.recent_signals(1)[0].trend, Trend::Down);

        let stats = history.stats();
        assert_eq!(stats.total_bars, 4);
        assert_eq!(stats.buy_signals, 1);
        assert_eq!(stats.sell_signals, 1);
        assert_eq!(stats.price_range.min, 91.0);
        assert_eq!(stats.price_range.max, 105.0);
    }

    #[test]
    fn test_return_stats() {
        let mut history = SuperTrendHistory::new(SuperTrendConfig::new(1, 1.0), 100).unwrap();
        history.update(&bar(0, 100.0, 100.0, 100.0));
        history.update(&bar(1, 110.0, 110.0, 110.0));
        history.update(&bar(2, 99.0, 99.0, 99.0));

        let stats = history.stats();
        assert_relative_eq!(stats.returns.max, 0.1, epsilon = 1e-12);
        assert_relative_eq!(stats.returns.min, -0.1, epsilon = 1e-12);
        assert_relative_eq!(stats.returns.mean, 0.0, epsilon = 1e-12);
        assert_relative_eq!(stats.returns.std, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut history = SuperTrendHistory::new(SuperTrendConfig::new(1, 1.0), 100).unwrap();
        history.update(&bar(0, 101.0, 99.0, 100.0));
        history.reset();
        assert_eq!(history.points().count(), 0);
        assert_eq!(history.stats(), HistoryStats::default());
    }
}
