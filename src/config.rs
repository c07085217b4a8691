//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files. Strategy parameters
//! can be overridden by name through environment variables, and the whole
//! configuration is validated once before any bar is processed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::optimizer::ParameterGrid;
use crate::risk::RiskConfig;
use crate::supertrend::SuperTrendConfig;
use crate::Symbol;

/// Fatal configuration problems, reported at startup
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },

    #[error("invalid value for {name}: '{value}'")]
    InvalidOverride { name: &'static str, value: String },
}

/// Named parameters that can be overridden from the environment
pub const PARAM_ATR_PERIOD: &str = "SUPERTREND_ATR_PERIOD";
pub const PARAM_MULTIPLIER: &str = "SUPERTREND_MULTIPLIER";
pub const PARAM_RISK_PERCENT: &str = "SUPERTREND_RISK_PERCENT";
pub const PARAM_MAX_POSITION_SIZE: &str = "SUPERTREND_MAX_POSITION_SIZE";
pub const PARAM_MAX_DAILY_TRADES: &str = "SUPERTREND_MAX_DAILY_TRADES";
pub const PARAM_MIN_TRADE_INTERVAL: &str = "SUPERTREND_MIN_TRADE_INTERVAL";
pub const PARAM_DAILY_LOSS_LIMIT: &str = "SUPERTREND_DAILY_LOSS_LIMIT";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supertrend: SuperTrendConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    /// Parameter grid for the optimizer
    #[serde(default)]
    pub optimize: ParameterGrid,
}

impl Config {
    /// Load configuration from JSON file, apply environment overrides and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file {}", path.as_ref().display())
        })?;
        let mut config = Self::from_json_str(&contents)?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a JSON string without validation
    pub fn from_json_str(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse config JSON")
    }

    /// Override parameters from `SUPERTREND_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Override parameters by name, `lookup` returns the raw value if set
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_param(&lookup, PARAM_ATR_PERIOD)? {
            self.supertrend.atr_period = v;
        }
        if let Some(v) = parse_param(&lookup, PARAM_MULTIPLIER)? {
            self.supertrend.multiplier = v;
        }
        if let Some(v) = parse_param(&lookup, PARAM_RISK_PERCENT)? {
            self.risk.risk_per_trade = v;
        }
        if let Some(v) = parse_param(&lookup, PARAM_MAX_POSITION_SIZE)? {
            self.risk.max_position_pct = v;
        }
        if let Some(v) = parse_param(&lookup, PARAM_MAX_DAILY_TRADES)? {
            self.risk.max_daily_trades = v;
        }
        if let Some(v) = parse_param(&lookup, PARAM_MIN_TRADE_INTERVAL)? {
            self.risk.min_signal_interval_minutes = v;
        }
        if let Some(v) = parse_param(&lookup, PARAM_DAILY_LOSS_LIMIT)? {
            self.risk.daily_loss_limit = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.supertrend.validate()?;
        self.risk.validate()?;
        self.strategy.validate()?;
        self.replay.validate()?;
        Ok(())
    }
}

fn parse_param<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidOverride { name, value: raw }),
    }
}

/// Strategy behaviour around the indicator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Open short positions on downward flips (default: false, long only)
    #[serde(default)]
    pub allow_short: bool,

    /// Close-to-close move that is logged as a data anomaly (default: 0.05)
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,

    /// Bars and signals retained for reporting (default: 1000)
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

fn default_anomaly_threshold() -> f64 {
    0.05
}
fn default_history_len() -> usize {
    1000
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            allow_short: false,
            anomaly_threshold: default_anomaly_threshold(),
            history_len: default_history_len(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.anomaly_threshold.is_finite() && self.anomaly_threshold > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "strategy.anomaly_threshold",
                expected: "> 0",
                value: self.anomaly_threshold,
            });
        }
        if self.history_len < 1 {
            return Err(ConfigError::OutOfRange {
                field: "strategy.history_len",
                expected: ">= 1",
                value: 0.0,
            });
        }
        Ok(())
    }
}

/// Where bar files are read from and reports are written to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    /// Bar resolution used in file names, `{SYMBOL}_{timeframe}.csv`
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub symbols: Vec<String>,
}

fn default_data_dir() -> String {
    "data".to_string()
}
fn default_results_dir() -> String {
    "results".to_string()
}
fn default_timeframe() -> String {
    "1m".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            timeframe: default_timeframe(),
            symbols: Vec::new(),
        }
    }
}

impl DataConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }
}

/// Replay harness settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Starting equity in the same currency as the bar prices
    #[serde(default = "default_initial_equity")]
    pub initial_equity: f64,

    /// Bars per year used to annualise volatility and Sharpe (default: minute bars)
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,

    /// Annual risk-free rate subtracted in the Sharpe ratio (default: 0.02)
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
}

fn default_initial_equity() -> f64 {
    100_000.0
}
fn default_periods_per_year() -> f64 {
    252.0 * 24.0 * 60.0
}
fn default_risk_free_rate() -> f64 {
    0.02
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            initial_equity: default_initial_equity(),
            periods_per_year: default_periods_per_year(),
            risk_free_rate: default_risk_free_rate(),
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.initial_equity.is_finite() && self.initial_equity > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "replay.initial_equity",
                expected: "> 0",
                value: self.initial_equity,
            });
        }
        if !(self.periods_per_year.is_finite() && self.periods_per_year > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "replay.periods_per_year",
                expected: "> 0",
                value: self.periods_per_year,
            });
        }
        if !(self.risk_free_rate.is_finite() && (0.0..1.0).contains(&self.risk_free_rate)) {
            return Err(ConfigError::OutOfRange {
                field: "replay.risk_free_rate",
                expected: "in [0, 1)",
                value: self.risk_free_rate,
            });
        }
        Ok(())
    }
}
