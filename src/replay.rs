//! Historical replay driver
//!
//! Feeds recorded bars through a fresh [`SuperTrendStrategy`] and fills every
//! intent at the bar close on a paper account so that equity and position can
//! be reported back to the strategy. There are no fees, slippage or stop
//! executions; the account only closes the feedback loop and records the
//! equity curve and round trips that the performance metrics are built from.

use anyhow::Result;
use chrono::{DateTime, Utc};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::history::{HistoryStats, SignalRecord};
use crate::metrics::{calculate_metrics, EquityPoint, PerformanceMetrics, TradeRecord};
use crate::strategy::{AccountSnapshot, StrategyStats, SuperTrendStrategy};
use crate::supertrend::SuperTrendSummary;
use crate::{Candle, IntentKind, OrderIntent, Side, Symbol};

/// Signals kept in a report
const REPORT_SIGNALS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
struct OpenTrade {
    side: Side,
    time: DateTime<Utc>,
    quantity: f64,
    price: f64,
}

/// Cash plus a signed position, marked at the latest close
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperAccount {
    cash: f64,
    position: f64,
    open: Option<OpenTrade>,
}

impl PaperAccount {
    pub fn new(initial_equity: f64) -> Self {
        Self {
            cash: initial_equity,
            position: 0.0,
            open: None,
        }
    }

    pub fn snapshot(&self, price: f64) -> AccountSnapshot {
        AccountSnapshot {
            equity: self.equity(price),
            position_quantity: self.position,
        }
    }

    pub fn equity(&self, price: f64) -> f64 {
        self.cash + self.position * price
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Fill at the intent's reference price
    ///
    /// Returns the round trip when an exit closes the open trade.
    pub fn fill(&mut self, intent: &OrderIntent) -> Option<TradeRecord> {
        let signed = intent.signed_quantity();
        self.cash -= signed * intent.reference_price;
        self.position += signed;

        match intent.kind {
            IntentKind::Entry => {
                self.open = Some(match self.open {
                    // adding to a position averages the entry price
                    Some(open) if open.side == intent.side => {
                        let quantity = open.quantity + intent.quantity;
                        OpenTrade {
                            quantity,
                            price: (open.price * open.quantity
                                + intent.reference_price * intent.quantity)
                                / quantity,
                            ..open
                        }
                    }
                    _ => OpenTrade {
                        side: intent.side,
                        time: intent.time,
                        quantity: intent.quantity,
                        price: intent.reference_price,
                    },
                });
                None
            }
            IntentKind::Exit => {
                let open = self.open.take()?;
                Some(TradeRecord {
                    side: open.side,
                    entry_time: open.time,
                    exit_time: intent.time,
                    quantity: open.quantity,
                    entry_price: open.price,
                    exit_price: intent.reference_price,
                    pnl: (intent.reference_price - open.price) * open.quantity * open.side.sign(),
                })
            }
        }
    }
}

/// Result of replaying one symbol
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub symbol: Symbol,
    pub bars: usize,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub final_position: f64,
    pub metrics: PerformanceMetrics,
    pub indicator: SuperTrendSummary,
    pub stats: StrategyStats,
    pub history: HistoryStats,
    pub recent_signals: Vec<SignalRecord>,
    pub intents: Vec<OrderIntent>,
    pub trades: Vec<TradeRecord>,
    /// One point per processed bar, written separately as CSV
    #[serde(skip)]
    pub equity_curve: Vec<EquityPoint>,
}

/// Replay `candles` in order through a new strategy for `symbol`
pub fn replay(
    symbol: Symbol,
    candles: &[Candle],
    config: &Config,
) -> Result<ReplayReport, ConfigError> {
    config.validate()?;
    let mut strategy = SuperTrendStrategy::new(symbol.clone(), config)?;
    let initial_equity = config.replay.initial_equity;
    let mut account = PaperAccount::new(initial_equity);
    let mut intents = Vec::new();
    let mut trades = Vec::new();
    let mut equity_curve = Vec::with_capacity(candles.len());
    let mut last_price = None;

    for candle in candles {
        let mark = if candle.is_valid() {
            candle.close
        } else {
            last_price.unwrap_or(candle.close)
        };
        let outcome = strategy.on_bar(candle, &account.snapshot(mark));
        if outcome.skipped.is_some() {
            continue;
        }
        last_price = Some(candle.close);

        for intent in outcome.intents {
            debug!(%symbol, side = ?intent.side, quantity = intent.quantity, "Paper fill");
            if let Some(trade) = account.fill(&intent) {
                debug!(%symbol, pnl = format!("{:.2}", trade.pnl), "Trade closed");
                trades.push(trade);
            }
            intents.push(intent);
        }

        equity_curve.push(EquityPoint {
            datetime: candle.datetime,
            equity: account.equity(candle.close),
        });
    }

    let final_equity = last_price.map_or(initial_equity, |price| account.equity(price));
    let metrics = calculate_metrics(
        initial_equity,
        &equity_curve,
        &trades,
        config.replay.periods_per_year,
        config.replay.risk_free_rate,
    );
    let history = strategy.history();

    let report = ReplayReport {
        symbol: symbol.clone(),
        bars: candles.len(),
        initial_equity,
        final_equity,
        final_position: account.position(),
        metrics,
        indicator: history.indicator().summary(),
        stats: strategy.stats().clone(),
        history: history.stats(),
        recent_signals: history.recent_signals(REPORT_SIGNALS),
        intents,
        trades,
        equity_curve,
    };

    info!(
        %symbol,
        bars = report.bars,
        intents = report.intents.len(),
        trades = report.trades.len(),
        suppressed = report.stats.total_suppressed(),
        final_equity = format!("{:.2}", report.final_equity),
        sharpe = format!("{:.2}", report.metrics.sharpe_ratio),
        "Replay finished"
    );

    Ok(report)
}

/// Replay several symbols in parallel, one strategy per symbol
pub fn replay_many(
    data: &BTreeMap<Symbol, Vec<Candle>>,
    config: &Config,
) -> Result<Vec<ReplayReport>> {
    config.validate()?;

    let pb = ProgressBar::new(data.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} symbols ({eta})")?
            .progress_chars("#>-"),
    );

    let jobs: Vec<(&Symbol, &Vec<Candle>)> = data.iter().collect();
    let reports = jobs
        .par_iter()
        .progress_with(pb.clone())
        .map(|(symbol, candles)| replay((*symbol).clone(), candles, config))
        .collect::<Result<Vec<_>, ConfigError>>()?;

    pb.finish_with_message("done");
    Ok(reports)
}
