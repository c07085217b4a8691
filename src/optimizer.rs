//! Parameter grid search
//!
//! Replays every combination of indicator and sizing parameters over the same
//! bars and ranks the combinations by a chosen score. Each combination is
//! independent, so the grid runs on the rayon pool.

use indicatif::ProgressBar;
use itertools::iproduct;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::replay::replay;
use crate::{Candle, Symbol};

/// Values tried for each parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    #[serde(default = "default_atr_periods")]
    pub atr_period: Vec<usize>,
    #[serde(default = "default_multipliers")]
    pub multiplier: Vec<f64>,
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: Vec<f64>,
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: Vec<f64>,
}

fn default_atr_periods() -> Vec<usize> {
    vec![7, 10, 14, 21]
}
fn default_multipliers() -> Vec<f64> {
    vec![2.0, 3.0, 5.0, 7.0]
}
fn default_risk_per_trade() -> Vec<f64> {
    vec![0.01, 0.02, 0.03]
}
fn default_max_position_pct() -> Vec<f64> {
    vec![0.05, 0.10, 0.15]
}

impl Default for ParameterGrid {
    fn default() -> Self {
        Self {
            atr_period: default_atr_periods(),
            multiplier: default_multipliers(),
            risk_per_trade: default_risk_per_trade(),
            max_position_pct: default_max_position_pct(),
        }
    }
}

impl ParameterGrid {
    pub fn total_combinations(&self) -> usize {
        self.atr_period.len()
            * self.multiplier.len()
            * self.risk_per_trade.len()
            * self.max_position_pct.len()
    }

    /// Cartesian product in declaration order, last parameter varying fastest
    pub fn parameter_sets(&self) -> Vec<ParameterSet> {
        iproduct!(
            &self.atr_period,
            &self.multiplier,
            &self.risk_per_trade,
            &self.max_position_pct
        )
        .map(|(&atr_period, &multiplier, &risk_per_trade, &max_position_pct)| ParameterSet {
            atr_period,
            multiplier,
            risk_per_trade,
            max_position_pct,
        })
        .collect()
    }

    /// One validated configuration per combination, built on `base`
    ///
    /// Any out-of-range value in the grid is a fatal configuration error.
    pub fn generate_configs(&self, base: &Config) -> Result<Vec<Candidate>, ConfigError> {
        for (field, len) in [
            ("optimize.atr_period", self.atr_period.len()),
            ("optimize.multiplier", self.multiplier.len()),
            ("optimize.risk_per_trade", self.risk_per_trade.len()),
            ("optimize.max_position_pct", self.max_position_pct.len()),
        ] {
            if len == 0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    expected: "a non-empty list",
                    value: 0.0,
                });
            }
        }

        self.parameter_sets()
            .into_iter()
            .map(|params| {
                let config = params.apply(base);
                config.validate()?;
                Ok(Candidate { params, config })
            })
            .collect()
    }
}

/// One point of the grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub atr_period: usize,
    pub multiplier: f64,
    pub risk_per_trade: f64,
    pub max_position_pct: f64,
}

impl ParameterSet {
    pub fn apply(&self, base: &Config) -> Config {
        let mut config = base.clone();
        config.supertrend.atr_period = self.atr_period;
        config.supertrend.multiplier = self.multiplier;
        config.risk.risk_per_trade = self.risk_per_trade;
        config.risk.max_position_pct = self.max_position_pct;
        config
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ATR:{} Mult:{} Risk:{:.2}% MaxPos:{:.0}%",
            self.atr_period,
            self.multiplier,
            self.risk_per_trade * 100.0,
            self.max_position_pct * 100.0
        )
    }
}

/// A parameter set with its full configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub params: ParameterSet,
    pub config: Config,
}

/// Replay outcome for one parameter set across all symbols
///
/// Return, Sharpe and Calmar are averaged over symbols; drawdown is the worst
/// symbol's; trade statistics pool every symbol's round trips.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub params: ParameterSet,
    pub sharpe_ratio: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub calmar_ratio: f64,
    pub profit_factor: f64,
    pub total_pnl: f64,
}

/// Ranking score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMetric {
    #[default]
    Sharpe,
    Return,
    Calmar,
    WinRate,
    ProfitFactor,
}

impl SortMetric {
    pub fn score(&self, result: &OptimizationResult) -> f64 {
        match self {
            SortMetric::Sharpe => result.sharpe_ratio,
            SortMetric::Return => result.total_return,
            SortMetric::Calmar => result.calmar_ratio,
            SortMetric::WinRate => result.win_rate,
            SortMetric::ProfitFactor => result.profit_factor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortMetric::Sharpe => "sharpe",
            SortMetric::Return => "return",
            SortMetric::Calmar => "calmar",
            SortMetric::WinRate => "win_rate",
            SortMetric::ProfitFactor => "profit_factor",
        }
    }
}

impl fmt::Display for SortMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sharpe" => Ok(SortMetric::Sharpe),
            "return" => Ok(SortMetric::Return),
            "calmar" => Ok(SortMetric::Calmar),
            "win_rate" => Ok(SortMetric::WinRate),
            "profit_factor" => Ok(SortMetric::ProfitFactor),
            other => Err(format!(
                "unknown sort metric '{}' (expected sharpe, return, calmar, win_rate or profit_factor)",
                other
            )),
        }
    }
}

/// Sort best first; NaN scores rank last
pub fn sort_results(results: &mut [OptimizationResult], sort_by: SortMetric) {
    let key = |r: &OptimizationResult| {
        let score = sort_by.score(r);
        if score.is_nan() {
            f64::NEG_INFINITY
        } else {
            score
        }
    };
    results.sort_by(|a, b| key(b).total_cmp(&key(a)));
}

/// Everything written to the results file
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub sort_by: SortMetric,
    pub symbols: Vec<Symbol>,
    pub grid: ParameterGrid,
    pub combinations: usize,
    pub results: Vec<OptimizationResult>,
}

/// Replays candidates against a fixed data set
pub struct Optimizer<'a> {
    data: &'a BTreeMap<Symbol, Vec<Candle>>,
}

impl<'a> Optimizer<'a> {
    pub fn new(data: &'a BTreeMap<Symbol, Vec<Candle>>) -> Self {
        Self { data }
    }

    /// Replay one candidate on every symbol
    pub fn evaluate(&self, candidate: &Candidate) -> Result<OptimizationResult, ConfigError> {
        let reports = self
            .data
            .iter()
            .map(|(symbol, candles)| replay(symbol.clone(), candles, &candidate.config))
            .collect::<Result<Vec<_>, _>>()?;

        let n = reports.len().max(1) as f64;
        let mut result = OptimizationResult {
            params: candidate.params,
            sharpe_ratio: 0.0,
            total_return: 0.0,
            max_drawdown: 0.0,
            win_rate: 0.0,
            total_trades: 0,
            calmar_ratio: 0.0,
            profit_factor: 0.0,
            total_pnl: 0.0,
        };
        let mut winning_trades = 0usize;
        let mut gross_profits = 0.0;
        let mut gross_losses = 0.0;

        for report in &reports {
            let m = &report.metrics;
            result.sharpe_ratio += m.sharpe_ratio / n;
            result.total_return += m.total_return / n;
            result.calmar_ratio += m.calmar_ratio / n;
            result.max_drawdown = result.max_drawdown.max(m.max_drawdown);
            result.total_trades += m.total_trades;
            result.total_pnl += m.total_pnl;
            winning_trades += m.winning_trades;
            gross_profits += m.avg_win * m.winning_trades as f64;
            gross_losses += m.avg_loss * m.losing_trades as f64;
        }

        if result.total_trades > 0 {
            result.win_rate = winning_trades as f64 / result.total_trades as f64 * 100.0;
        }
        result.profit_factor = if gross_losses > 0.0 {
            gross_profits / gross_losses
        } else if gross_profits > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        debug!(
            params = %candidate.params,
            sharpe = format!("{:.2}", result.sharpe_ratio),
            trades = result.total_trades,
            "Candidate evaluated"
        );
        Ok(result)
    }

    /// Evaluate all candidates on the rayon pool
    pub fn optimize_with_progress(
        &self,
        candidates: &[Candidate],
        progress_bar: &ProgressBar,
    ) -> Result<Vec<OptimizationResult>, ConfigError> {
        info!(
            "Testing {} parameter combinations on {} symbols",
            candidates.len(),
            self.data.len()
        );

        candidates
            .par_iter()
            .map(|candidate| {
                let result = self.evaluate(candidate);
                progress_bar.inc(1);
                result
            })
            .collect()
    }

    /// Evaluate all candidates on the calling thread
    pub fn optimize_sequential(
        &self,
        candidates: &[Candidate],
        progress_bar: &ProgressBar,
    ) -> Result<Vec<OptimizationResult>, ConfigError> {
        info!(
            "Testing {} parameter combinations sequentially",
            candidates.len()
        );

        candidates
            .iter()
            .map(|candidate| {
                let result = self.evaluate(candidate);
                progress_bar.inc(1);
                result
            })
            .collect()
    }
}
