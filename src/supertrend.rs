//! Supertrend volatility-band trend indicator
//!
//! Bands sit `multiplier × ATR` above and below the bar midpoint. The band on
//! the active side of the trend only ever tightens; the trend flips when the
//! close crosses the previous bar's active band, and the freshly computed band
//! of the new side becomes active.
//!
//! ```text
//! mid   = (high + low) / 2
//! upper = mid + multiplier * atr
//! lower = mid - multiplier * atr
//!
//! Up:   lower = max(prev_lower, lower)   flip Down when close < prev_lower
//! Down: upper = min(prev_upper, upper)   flip Up   when close > prev_upper
//! ```
//!
//! A close exactly on the band does not flip the trend.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::indicators::TrueRangeState;
use crate::{Candle, Trend};

/// Indicator parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuperTrendConfig {
    /// ATR smoothing period (default: 10)
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    /// Band width as ATR multiple (default: 3.0)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_atr_period() -> usize {
    10
}
fn default_multiplier() -> f64 {
    3.0
}

impl Default for SuperTrendConfig {
    fn default() -> Self {
        Self {
            atr_period: default_atr_period(),
            multiplier: default_multiplier(),
        }
    }
}

impl SuperTrendConfig {
    pub fn new(atr_period: usize, multiplier: f64) -> Self {
        Self {
            atr_period,
            multiplier,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.atr_period < 1 {
            return Err(ConfigError::OutOfRange {
                field: "supertrend.atr_period",
                expected: ">= 1",
                value: self.atr_period as f64,
            });
        }
        if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "supertrend.multiplier",
                expected: "> 0",
                value: self.multiplier,
            });
        }
        Ok(())
    }
}

/// Upper and lower band levels for one bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendBand {
    pub upper: f64,
    pub lower: f64,
}

impl TrendBand {
    pub fn midpoint(&self) -> f64 {
        (self.upper + self.lower) / 2.0
    }
}

/// Indicator state after a bar, once warmed up
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuperTrendReading {
    /// `None` until price first breaks out of the band
    pub trend: Option<Trend>,
    /// Active band: lower when trending up, upper when trending down,
    /// band midpoint while undetermined
    pub level: f64,
    pub band: TrendBand,
    pub atr: f64,
    /// New trend if it changed on this bar
    pub flipped: Option<Trend>,
}

/// Result of feeding one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorOutput {
    NotReady { bars_seen: usize, required: usize },
    Ready(SuperTrendReading),
}

impl IndicatorOutput {
    pub fn reading(&self) -> Option<&SuperTrendReading> {
        match self {
            IndicatorOutput::Ready(reading) => Some(reading),
            IndicatorOutput::NotReady { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, IndicatorOutput::Ready(_))
    }
}

/// Streaming Supertrend indicator, one instance per symbol
#[derive(Debug, Clone)]
pub struct SuperTrend {
    config: SuperTrendConfig,
    atr: TrueRangeState,
    band: Option<TrendBand>,
    trend: Option<Trend>,
    prev_trend: Option<Trend>,
    last: Option<SuperTrendReading>,
}

impl SuperTrend {
    pub fn new(config: SuperTrendConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            atr: TrueRangeState::new(config.atr_period),
            band: None,
            trend: None,
            prev_trend: None,
            last: None,
        })
    }

    pub fn config(&self) -> &SuperTrendConfig {
        &self.config
    }

    /// Feed one bar
    pub fn update(&mut self, candle: &Candle) -> IndicatorOutput {
        self.step(candle.high, candle.low, candle.close, candle.hl2())
    }

    /// Feed one bar given as high/low/close
    pub fn update_hlc(&mut self, high: f64, low: f64, close: f64) -> IndicatorOutput {
        self.step(high, low, close, (high + low) / 2.0)
    }

    fn step(&mut self, high: f64, low: f64, close: f64, mid: f64) -> IndicatorOutput {
        let atr = self.atr.update(high, low, close);
        let offset = self.config.multiplier * atr;
        let candidate = TrendBand {
            upper: mid + offset,
            lower: mid - offset,
        };

        self.prev_trend = self.trend;

        let band = match self.band {
            None => candidate,
            Some(prev) => {
                let next_trend = match self.trend {
                    Some(Trend::Up) if close < prev.lower => Some(Trend::Down),
                    Some(Trend::Down) if close > prev.upper => Some(Trend::Up),
                    None if close > prev.upper => Some(Trend::Up),
                    None if close < prev.lower => Some(Trend::Down),
                    current => current,
                };
                let flipped = next_trend != self.trend;
                self.trend = next_trend;

                match next_trend {
                    Some(Trend::Up) if !flipped => TrendBand {
                        upper: candidate.upper,
                        lower: prev.lower.max(candidate.lower),
                    },
                    Some(Trend::Down) if !flipped => TrendBand {
                        upper: prev.upper.min(candidate.upper),
                        lower: candidate.lower,
                    },
                    _ => candidate,
                }
            }
        };
        self.band = Some(band);

        if !self.atr.is_ready() {
            self.last = None;
            return IndicatorOutput::NotReady {
                bars_seen: self.atr.count(),
                required: self.config.atr_period,
            };
        }

        let level = match self.trend {
            Some(Trend::Up) => band.lower,
            Some(Trend::Down) => band.upper,
            None => band.midpoint(),
        };
        let flipped = if self.trend != self.prev_trend {
            self.trend
        } else {
            None
        };

        let reading = SuperTrendReading {
            trend: self.trend,
            level,
            band,
            atr,
            flipped,
        };
        self.last = Some(reading);
        IndicatorOutput::Ready(reading)
    }

    pub fn is_ready(&self) -> bool {
        self.atr.is_ready()
    }

    pub fn bars_seen(&self) -> usize {
        self.atr.count()
    }

    /// Last ready reading
    pub fn reading(&self) -> Option<&SuperTrendReading> {
        self.last.as_ref()
    }

    /// Current trend, reported only once warmed up
    pub fn trend(&self) -> Option<Trend> {
        self.last.and_then(|r| r.trend)
    }

    /// Active band level, reported only once warmed up
    pub fn level(&self) -> Option<f64> {
        self.last.map(|r| r.level)
    }

    /// Volatility estimate, reported only once warmed up
    pub fn atr(&self) -> Option<f64> {
        self.last.map(|r| r.atr)
    }

    /// Trend turned up on the last bar
    pub fn is_buy_signal(&self) -> bool {
        matches!(self.last, Some(r) if r.flipped == Some(Trend::Up))
    }

    /// Trend turned down on the last bar
    pub fn is_sell_signal(&self) -> bool {
        matches!(self.last, Some(r) if r.flipped == Some(Trend::Down))
    }

    pub fn reset(&mut self) {
        self.atr.reset();
        self.band = None;
        self.trend = None;
        self.prev_trend = None;
        self.last = None;
    }

    pub fn summary(&self) -> SuperTrendSummary {
        SuperTrendSummary {
            atr_period: self.config.atr_period,
            multiplier: self.config.multiplier,
            is_ready: self.is_ready(),
            bars_seen: self.bars_seen(),
            trend: self.trend(),
            level: self.level(),
            atr: self.atr(),
            buy_signal: self.is_buy_signal(),
            sell_signal: self.is_sell_signal(),
        }
    }
}

/// Parameters and current state of an indicator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuperTrendSummary {
    pub atr_period: usize,
    pub multiplier: f64,
    pub is_ready: bool,
    pub bars_seen: usize,
    pub trend: Option<Trend>,
    pub level: Option<f64>,
    pub atr: Option<f64>,
    pub buy_signal: bool,
    pub sell_signal: bool,
}

impl std::fmt::Display for SuperTrendSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SuperTrend(period={}, multiplier={}",
            self.atr_period, self.multiplier
        )?;
        match (self.trend, self.level) {
            (Some(trend), Some(level)) => write!(f, ", trend={}, level={:.2})", trend, level),
            (None, Some(level)) => write!(f, ", trend=-, level={:.2})", level),
            _ => write!(f, ", warming up {}/{})", self.bars_seen, self.atr_period),
        }
    }
}

/// Run the indicator over a slice of candles
pub fn supertrend(
    candles: &[Candle],
    config: SuperTrendConfig,
) -> Result<Vec<Option<SuperTrendReading>>, ConfigError> {
    let mut indicator = SuperTrend::new(config)?;
    Ok(candles
        .iter()
        .map(|c| indicator.update(c).reading().copied())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn indicator(period: usize, multiplier: f64) -> SuperTrend {
        SuperTrend::new(SuperTrendConfig::new(period, multiplier)).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(SuperTrend::new(SuperTrendConfig::new(0, 3.0)).is_err());
        assert!(SuperTrend::new(SuperTrendConfig::new(10, 0.0)).is_err());
        assert!(SuperTrend::new(SuperTrendConfig::new(10, -1.0)).is_err());
        assert!(SuperTrend::new(SuperTrendConfig::new(10, f64::NAN)).is_err());
    }

    #[test]
    fn test_ready_exactly_at_nth_bar() {
        let mut st = indicator(5, 2.0);
        for i in 1..5 {
            let out = st.update_hlc(101.0, 99.0, 100.0);
            assert_eq!(
                out,
                IndicatorOutput::NotReady {
                    bars_seen: i,
                    required: 5
                }
            );
        }
        assert!(st.update_hlc(101.0, 99.0, 100.0).is_ready());
    }

    #[test]
    fn test_period_one_ready_on_first_bar() {
        let mut st = indicator(1, 1.0);
        let out = st.update_hlc(102.0, 98.0, 100.0);
        let reading = out.reading().unwrap();
        assert_eq!(reading.atr, 4.0);
        assert_eq!(reading.trend, None);
        assert_eq!(reading.level, 100.0);
    }

    #[test]
    fn test_flat_bars_then_breakout() {
        let mut st = indicator(10, 3.0);
        let mut last = None;
        for _ in 0..10 {
            last = Some(st.update_hlc(100.0, 100.0, 100.0));
        }
        let reading = *last.unwrap().reading().unwrap();
        assert_eq!(reading.atr, 0.0);
        assert_eq!(reading.level, 100.0);
        assert_eq!(reading.trend, None);
        assert_eq!(reading.flipped, None);

        let out = st.update_hlc(111.0, 109.0, 110.0);
        let reading = out.reading().unwrap();
        // TR = |111 - 100| = 11, ATR = (0 * 9 + 11) / 10
        assert_relative_eq!(reading.atr, 1.1, epsilon = 1e-12);
        assert_eq!(reading.trend, Some(Trend::Up));
        assert_eq!(reading.flipped, Some(Trend::Up));
        assert_relative_eq!(reading.level, 110.0 - 3.0 * 1.1, epsilon = 1e-9);
        assert!(st.is_buy_signal());
        assert!(!st.is_sell_signal());
    }

    #[test]
    fn test_close_on_band_does_not_flip() {
        let mut st = indicator(1, 1.0);
        // bands 99 / 101
        st.update_hlc(101.0, 99.0, 100.0);
        // close exactly on previous upper band
        let out = st.update_hlc(101.0, 101.0, 101.0);
        assert_eq!(out.reading().unwrap().trend, None);
    }

    #[test]
    fn test_lower_band_only_tightens_in_uptrend() {
        let mut st = indicator(2, 1.0);
        st.update_hlc(101.0, 99.0, 100.0);
        st.update_hlc(101.0, 99.0, 100.0);
        st.update_hlc(106.0, 104.0, 105.0);
        let before = st.level().unwrap();
        assert_eq!(st.trend(), Some(Trend::Up));

        // lower midpoint with wider range would loosen the band
        let out = st.update_hlc(108.0, 100.0, 104.0);
        let reading = out.reading().unwrap();
        assert_eq!(reading.trend, Some(Trend::Up));
        assert!(reading.level >= before);
    }

    #[test]
    fn test_flip_down_adopts_fresh_upper_band() {
        let mut st = indicator(2, 1.0);
        st.update_hlc(101.0, 99.0, 100.0);
        st.update_hlc(101.0, 99.0, 100.0);
        st.update_hlc(106.0, 104.0, 105.0);
        let lower = st.level().unwrap();

        let out = st.update_hlc(96.0, 90.0, 91.0);
        let reading = out.reading().unwrap();
        assert!(91.0 < lower);
        assert_eq!(reading.flipped, Some(Trend::Down));
        assert_eq!(reading.level, reading.band.upper);
        assert_relative_eq!(reading.level, 93.0 + reading.atr, epsilon = 1e-12);
        assert!(st.is_sell_signal());
    }

    #[test]
    fn test_warmup_flip_not_reported() {
        let mut st = indicator(3, 1.0);
        st.update_hlc(101.0, 99.0, 100.0);
        // breakout during warmup establishes the trend silently
        assert!(!st.update_hlc(111.0, 109.0, 110.0).is_ready());
        let out = st.update_hlc(112.0, 110.0, 111.0);
        let reading = out.reading().unwrap();
        assert_eq!(reading.trend, Some(Trend::Up));
        assert_eq!(reading.flipped, None);
    }

    #[test]
    fn test_reset() {
        let mut st = indicator(2, 1.0);
        st.update_hlc(101.0, 99.0, 100.0);
        st.update_hlc(111.0, 109.0, 110.0);
        assert!(st.is_ready());

        st.reset();
        assert!(!st.is_ready());
        assert_eq!(st.bars_seen(), 0);
        assert_eq!(st.trend(), None);
        assert_eq!(st.level(), None);
    }

    #[test]
    fn test_summary_display() {
        let mut st = indicator(2, 3.0);
        assert_eq!(
            st.summary().to_string(),
            "SuperTrend(period=2, multiplier=3, warming up 0/2)"
        );
        st.update_hlc(100.0, 100.0, 100.0);
        st.update_hlc(100.0, 100.0, 100.0);
        assert_eq!(
            st.summary().to_string(),
            "SuperTrend(period=2, multiplier=3, trend=-, level=100.00)"
        );
    }
}
