//! Performance metrics
//!
//! Summarises a replay from its per-bar equity curve and the round trips
//! closed on the paper account. Returns are bar-to-bar, so the annualisation
//! factor must match the bar resolution (minute bars by default).

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::Side;

/// Account equity marked at a bar close
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub datetime: DateTime<Utc>,
    pub equity: f64,
}

/// A closed round trip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    /// Side of the opening order
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
}

impl TradeRecord {
    /// P&L as a percentage of the entry notional
    pub fn return_pct(&self) -> f64 {
        let notional = self.entry_price * self.quantity;
        if notional > 0.0 {
            self.pnl / notional * 100.0
        } else {
            0.0
        }
    }
}

/// Summary statistics for one replay
///
/// Percentages (`total_return`, `max_drawdown`, `win_rate`) are in percent;
/// currency amounts are in the bar price currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub final_equity: f64,
    pub peak_equity: f64,
    pub max_drawdown: f64,
    /// Annualised standard deviation of bar returns
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub calmar_ratio: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_pnl: f64,
    pub avg_trade_pnl: f64,
    pub avg_win: f64,
    /// Magnitude of the average losing trade
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

/// Compute metrics from an equity curve and closed trades
///
/// `periods_per_year` annualises bar returns; `risk_free_rate` is an annual
/// rate spread evenly over those periods.
pub fn calculate_metrics(
    initial_equity: f64,
    equity_curve: &[EquityPoint],
    trades: &[TradeRecord],
    periods_per_year: f64,
    risk_free_rate: f64,
) -> PerformanceMetrics {
    let mut metrics = PerformanceMetrics {
        final_equity: initial_equity,
        peak_equity: initial_equity,
        ..Default::default()
    };
    if initial_equity <= 0.0 {
        return metrics;
    }

    if let Some(last) = equity_curve.last() {
        metrics.final_equity = last.equity;
        metrics.total_return = (last.equity - initial_equity) / initial_equity * 100.0;

        let mut peak = initial_equity;
        let mut max_dd = 0.0_f64;
        for point in equity_curve {
            peak = peak.max(point.equity);
            max_dd = max_dd.max((peak - point.equity) / peak);
        }
        metrics.peak_equity = peak;
        metrics.max_drawdown = max_dd * 100.0;
        if max_dd > 0.0 {
            metrics.calmar_ratio = (metrics.total_return / 100.0) / max_dd;
        }
    }

    let returns: Vec<f64> = equity_curve
        .iter()
        .map(|p| p.equity)
        .tuple_windows()
        .filter(|(prev, _)| *prev > 0.0)
        .map(|(prev, next)| (next - prev) / prev)
        .collect();

    if !returns.is_empty() {
        let mean = returns.as_slice().mean();
        let std = returns.as_slice().population_std_dev();
        let annualise = periods_per_year.sqrt();
        metrics.volatility = std * annualise;
        if std > 0.0 {
            metrics.sharpe_ratio = (mean - risk_free_rate / periods_per_year) / std * annualise;
        }
    }

    if trades.is_empty() {
        return metrics;
    }

    let (wins, losses): (Vec<f64>, Vec<f64>) =
        trades.iter().map(|t| t.pnl).partition(|pnl| *pnl > 0.0);
    let gross_profits: f64 = wins.iter().sum();
    let gross_losses: f64 = losses.iter().map(|pnl| pnl.abs()).sum();

    metrics.total_trades = trades.len();
    metrics.winning_trades = wins.len();
    metrics.losing_trades = losses.len();
    metrics.win_rate = wins.len() as f64 / trades.len() as f64 * 100.0;
    metrics.profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else if gross_profits > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    metrics.total_pnl = gross_profits - gross_losses;
    metrics.avg_trade_pnl = metrics.total_pnl / trades.len() as f64;
    if !wins.is_empty() {
        metrics.avg_win = gross_profits / wins.len() as f64;
    }
    if !losses.is_empty() {
        metrics.avg_loss = gross_losses / losses.len() as f64;
    }
    metrics.largest_win = wins.iter().copied().fold(0.0, f64::max);
    metrics.largest_loss = losses.iter().copied().fold(0.0, f64::min);

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                datetime: start + Duration::minutes(i as i64),
                equity,
            })
            .collect()
    }

    fn trade(pnl: f64) -> TradeRecord {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TradeRecord {
            side: Side::Buy,
            entry_time: t,
            exit_time: t + Duration::hours(1),
            quantity: 1.0,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            pnl,
        }
    }

    #[test]
    fn test_empty_inputs() {
        let metrics = calculate_metrics(10_000.0, &[], &[], 252.0, 0.0);
        assert_eq!(metrics.final_equity, 10_000.0);
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.total_trades, 0);
    }

    #[test]
    fn test_drawdown_measured_from_running_peak() {
        let metrics = calculate_metrics(100.0, &curve(&[100.0, 110.0, 99.0, 121.0]), &[], 1.0, 0.0);
        assert_relative_eq!(metrics.max_drawdown, 10.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.total_return, 21.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.peak_equity, 121.0);
        assert_relative_eq!(metrics.calmar_ratio, 2.1, epsilon = 1e-9);
    }

    #[test]
    fn test_drawdown_below_initial_equity() {
        let metrics = calculate_metrics(100.0, &curve(&[90.0, 95.0]), &[], 1.0, 0.0);
        assert_relative_eq!(metrics.max_drawdown, 10.0, epsilon = 1e-9);
        assert_eq!(metrics.peak_equity, 100.0);
    }

    #[test]
    fn test_sharpe_uses_excess_return() {
        // returns +10% then -10%: mean 0, population std 0.1
        let points = curve(&[100.0, 110.0, 99.0]);
        let metrics = calculate_metrics(100.0, &points, &[], 4.0, 0.02);
        assert_relative_eq!(metrics.volatility, 0.2, epsilon = 1e-9);
        assert_relative_eq!(metrics.sharpe_ratio, -0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_flat_equity_has_zero_sharpe() {
        let metrics = calculate_metrics(100.0, &curve(&[100.0; 5]), &[], 362_880.0, 0.02);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.volatility, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
    }

    #[test]
    fn test_trade_statistics() {
        let trades = [trade(50.0), trade(-20.0), trade(30.0), trade(0.0)];
        let metrics = calculate_metrics(1_000.0, &curve(&[1_060.0]), &trades, 252.0, 0.0);

        assert_eq!(metrics.total_trades, 4);
        assert_eq!(metrics.winning_trades, 2);
        // break-even counts as a loss
        assert_eq!(metrics.losing_trades, 2);
        assert_relative_eq!(metrics.win_rate, 50.0);
        assert_relative_eq!(metrics.profit_factor, 4.0);
        assert_relative_eq!(metrics.total_pnl, 60.0);
        assert_relative_eq!(metrics.avg_trade_pnl, 15.0);
        assert_relative_eq!(metrics.avg_win, 40.0);
        assert_relative_eq!(metrics.avg_loss, 10.0);
        assert_relative_eq!(metrics.largest_win, 50.0);
        assert_relative_eq!(metrics.largest_loss, -20.0);
    }

    #[test]
    fn test_profit_factor_without_losses() {
        let metrics = calculate_metrics(1_000.0, &[], &[trade(5.0)], 252.0, 0.0);
        assert!(metrics.profit_factor.is_infinite());
        assert_relative_eq!(trade(5.0).return_pct(), 5.0);
    }
}
