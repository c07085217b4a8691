//! Supertrend Trader
//!
//! Streaming Supertrend volatility-band trend indicator with a signal-driven
//! position sizer and per-day risk gate. Order intents are produced for an
//! external execution system; a replay driver runs recorded bars through the
//! same path and scores them, and a grid optimizer ranks parameter sets.

pub mod config;
pub mod data;
pub mod history;
pub mod indicators;
pub mod metrics;
pub mod optimizer;
pub mod replay;
pub mod risk;
pub mod strategy;
pub mod supertrend;
pub mod types;

pub use config::{Config, ConfigError};
pub use metrics::{EquityPoint, PerformanceMetrics, TradeRecord};
pub use optimizer::{OptimizationResult, ParameterGrid, ParameterSet, SortMetric};
pub use risk::{RiskConfig, RiskManager, SignalDecision, SuppressionReason};
pub use strategy::{AccountSnapshot, BarOutcome, SuperTrendStrategy};
pub use supertrend::{IndicatorOutput, SuperTrend, SuperTrendConfig, SuperTrendReading};
pub use types::*;
