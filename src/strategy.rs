//! Supertrend trading strategy
//!
//! One instance per symbol. Each bar goes through validation, the indicator
//! and, on a trend flip, the risk manager, producing order intents for an
//! external execution engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError, StrategyConfig};
use crate::history::SuperTrendHistory;
use crate::risk::{RiskManager, SignalDecision, SuppressionReason};
use crate::supertrend::SuperTrendReading;
use crate::{Candle, CandleValidationError, OrderIntent, Symbol, Trend};

/// Account state reported by the execution engine before each bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccountSnapshot {
    /// Mark-to-market equity
    pub equity: f64,
    /// Signed position, negative when short
    pub position_quantity: f64,
}

impl AccountSnapshot {
    pub fn flat(equity: f64) -> Self {
        Self {
            equity,
            position_quantity: 0.0,
        }
    }

    pub fn is_long(&self) -> bool {
        self.position_quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.position_quantity < 0.0
    }

    /// Direction of the open position, `None` when flat
    pub fn held_trend(&self) -> Option<Trend> {
        if self.is_long() {
            Some(Trend::Up)
        } else if self.is_short() {
            Some(Trend::Down)
        } else {
            None
        }
    }
}

/// Why a bar was not processed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    Invalid(CandleValidationError),
    /// Timestamp not after the previous processed bar
    OutOfOrder,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Invalid(err) => write!(f, "{}", err),
            SkipReason::OutOfOrder => f.write_str("bar out of order"),
        }
    }
}

/// Everything the strategy decided for one bar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarOutcome {
    /// `None` while warming up or when the bar was skipped
    pub reading: Option<SuperTrendReading>,
    /// Exit first, then entry
    pub intents: Vec<OrderIntent>,
    pub suppressed: Option<SuppressionReason>,
    /// New protective stop for the open position
    pub stop_update: Option<f64>,
    pub skipped: Option<SkipReason>,
}

impl BarOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    /// Trend flipped on this bar
    pub fn flipped(&self) -> Option<Trend> {
        self.reading.and_then(|r| r.flipped)
    }
}

/// Running counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyStats {
    pub bars_processed: usize,
    pub bars_skipped: usize,
    pub anomalies: usize,
    pub signals: usize,
    pub entries: usize,
    pub exits: usize,
    pub stop_updates: usize,
    pub suppressed: BTreeMap<SuppressionReason, usize>,
}

impl StrategyStats {
    pub fn total_suppressed(&self) -> usize {
        self.suppressed.values().sum()
    }

    fn record_suppression(&mut self, reason: SuppressionReason) {
        *self.suppressed.entry(reason).or_insert(0) += 1;
    }
}

/// Supertrend strategy for a single symbol
#[derive(Debug, Clone)]
pub struct SuperTrendStrategy {
    symbol: Symbol,
    config: StrategyConfig,
    history: SuperTrendHistory,
    risk: RiskManager,
    last_time: Option<DateTime<Utc>>,
    prev_close: Option<f64>,
    stop_level: Option<f64>,
    stats: StrategyStats,
}

impl SuperTrendStrategy {
    /// Build from a validated configuration; invalid parameters are fatal
    pub fn new(symbol: Symbol, config: &Config) -> Result<Self, ConfigError> {
        config.strategy.validate()?;
        Ok(Self {
            symbol,
            config: config.strategy,
            history: SuperTrendHistory::new(config.supertrend, config.strategy.history_len)?,
            risk: config.risk.build()?,
            last_time: None,
            prev_close: None,
            stop_level: None,
            stats: StrategyStats::default(),
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn history(&self) -> &SuperTrendHistory {
        &self.history
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn stats(&self) -> &StrategyStats {
        &self.stats
    }

    /// Protective stop currently tracked for the open position
    pub fn stop_level(&self) -> Option<f64> {
        self.stop_level
    }

    /// Process one closed bar
    pub fn on_bar(&mut self, candle: &Candle, account: &AccountSnapshot) -> BarOutcome {
        if let Err(err) = candle.validate() {
            warn!(symbol = %self.symbol, time = %candle.datetime, error = %err, "Skipping invalid bar");
            self.stats.bars_skipped += 1;
            return BarOutcome::skipped(SkipReason::Invalid(err));
        }
        if matches!(self.last_time, Some(last) if candle.datetime <= last) {
            warn!(symbol = %self.symbol, time = %candle.datetime, "Skipping out-of-order bar");
            self.stats.bars_skipped += 1;
            return BarOutcome::skipped(SkipReason::OutOfOrder);
        }
        self.last_time = Some(candle.datetime);
        self.check_anomaly(candle);

        self.risk.on_bar(candle.datetime, account.equity);
        self.stats.bars_processed += 1;

        let output = self.history.update(candle);
        let Some(reading) = output.reading().copied() else {
            return BarOutcome::default();
        };

        let mut outcome = BarOutcome {
            reading: Some(reading),
            ..Default::default()
        };

        if account.position_quantity == 0.0 {
            self.stop_level = None;
        }

        match reading.flipped {
            Some(trend) => self.on_flip(trend, candle, account, &reading, &mut outcome),
            None => outcome.stop_update = self.trail_stop(&reading, account),
        }

        outcome
    }

    fn check_anomaly(&mut self, candle: &Candle) {
        if let Some(prev) = self.prev_close {
            let change = (candle.close - prev).abs() / prev;
            if change > self.config.anomaly_threshold {
                warn!(
                    symbol = %self.symbol,
                    time = %candle.datetime,
                    change_pct = format!("{:.2}", change * 100.0),
                    "Large price change"
                );
                self.stats.anomalies += 1;
            }
        }
        self.prev_close = Some(candle.close);
    }

    fn on_flip(
        &mut self,
        trend: Trend,
        candle: &Candle,
        account: &AccountSnapshot,
        reading: &SuperTrendReading,
        outcome: &mut BarOutcome,
    ) {
        self.stats.signals += 1;
        let now = candle.datetime;
        let price = candle.close;

        info!(
            symbol = %self.symbol,
            %trend,
            price,
            level = format!("{:.2}", reading.level),
            atr = format!("{:.4}", reading.atr),
            "Trend flip"
        );

        if let Err(reason) = self.risk.check_rate(now) {
            self.suppress(trend, reason, outcome);
            return;
        }

        let held = account.held_trend();
        // closing a position against the new trend trades in the trend's direction
        let exit_side = (held == Some(trend.opposite())).then_some(trend.entry_side());
        if let Some(side) = exit_side {
            let quantity = account.position_quantity.abs();
            if let SignalDecision::Execute(intent) =
                self.risk
                    .evaluate_exit(&self.symbol, now, side, quantity, price)
            {
                info!(symbol = %self.symbol, ?side, quantity, price, "Exit intent");
                self.stats.exits += 1;
                self.stop_level = None;
                outcome.intents.push(intent);
            }
        }

        if held == Some(trend) {
            debug!(symbol = %self.symbol, %trend, "Already positioned with the trend");
            return;
        }
        if trend == Trend::Down && !self.config.allow_short {
            return;
        }
        if exit_side.is_some() {
            if let Err(reason) = self.risk.check_trade_count() {
                self.suppress(trend, reason, outcome);
                return;
            }
        }

        match self.risk.evaluate_entry(
            &self.symbol,
            now,
            trend.entry_side(),
            account.equity,
            price,
            reading.level,
        ) {
            SignalDecision::Execute(intent) => {
                info!(
                    symbol = %self.symbol,
                    side = ?intent.side,
                    quantity = intent.quantity,
                    price,
                    stop = format!("{:.2}", reading.level),
                    "Entry intent"
                );
                self.stats.entries += 1;
                self.stop_level = Some(reading.level);
                outcome.intents.push(intent);
            }
            SignalDecision::Suppressed(reason) => self.suppress(trend, reason, outcome),
        }
    }

    fn suppress(&mut self, trend: Trend, reason: SuppressionReason, outcome: &mut BarOutcome) {
        info!(symbol = %self.symbol, %trend, %reason, "Signal suppressed");
        self.stats.record_suppression(reason);
        outcome.suppressed = Some(reason);
    }

    /// Ratchet the stop towards price while positioned with the trend
    fn trail_stop(&mut self, reading: &SuperTrendReading, account: &AccountSnapshot) -> Option<f64> {
        let level = reading.level;
        let improves = match (reading.trend, self.stop_level) {
            (Some(Trend::Up), Some(stop)) if account.is_long() => level > stop,
            (Some(Trend::Down), Some(stop)) if account.is_short() => level < stop,
            (Some(Trend::Up), None) => account.is_long(),
            (Some(Trend::Down), None) => account.is_short(),
            _ => false,
        };
        if !improves {
            return None;
        }

        debug!(
            symbol = %self.symbol,
            old = ?self.stop_level,
            new = format!("{:.2}", level),
            "Stop updated"
        );
        self.stop_level = Some(level);
        self.stats.stop_updates += 1;
        Some(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskConfig;
    use crate::supertrend::SuperTrendConfig;
    use crate::{IntentKind, Side};
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

    fn config(allow_short: bool) -> Config {
        let mut config = Config::default();
        config.supertrend = SuperTrendConfig::new(2, 1.0);
        config.risk = RiskConfig::default().with_min_signal_interval(0);
        config.strategy.allow_short = allow_short;
        config
    }

    fn strategy(allow_short: bool) -> SuperTrendStrategy {
        SuperTrendStrategy::new(Symbol::new("BTCUSD"), &config(allow_short)).unwrap()
    }

    /// Two flat bars followed by a breakout up
    fn warm_up_and_break_up(s: &mut SuperTrendStrategy, account: &AccountSnapshot) -> BarOutcome {
        s.on_bar(&bar(0, 101.0, 99.0, 100.0), account);
        s.on_bar(&bar(1, 101.0, 99.0, 100.0), account);
        s.on_bar(&bar(2, 106.0, 104.0, 105.0), account)
    }

    #[test]
    fn test_warmup_emits_nothing() {
        let mut s = strategy(false);
        let outcome = s.on_bar(&bar(0, 101.0, 99.0, 100.0), &AccountSnapshot::flat(1e5));
        assert_eq!(outcome, BarOutcome::default());
        assert_eq!(s.stats().bars_processed, 1);
    }

    #[test]
    fn test_flip_up_emits_entry() {
        let mut s = strategy(false);
        let outcome = warm_up_and_break_up(&mut s, &AccountSnapshot::flat(1e5));

        assert_eq!(outcome.flipped(), Some(Trend::Up));
        assert_eq!(outcome.intents.len(), 1);
        let intent = &outcome.intents[0];
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.kind, IntentKind::Entry);
        assert_eq!(intent.stop_level, outcome.reading.map(|r| r.level));
        assert!(intent.quantity * intent.reference_price <= 1e5 * 0.10 + 1e-6);
        assert_eq!(s.stats().entries, 1);
        assert_eq!(s.stop_level(), intent.stop_level);
    }

    #[test]
    fn test_flip_down_exits_long_only() {
        let mut s = strategy(false);
        warm_up_and_break_up(&mut s, &AccountSnapshot::flat(1e5));

        let long = AccountSnapshot {
            equity: 1e5,
            position_quantity: 50.0,
        };
        let outcome = s.on_bar(&bar(3, 96.0, 90.0, 91.0), &long);

        assert_eq!(outcome.flipped(), Some(Trend::Down));
        assert_eq!(outcome.intents.len(), 1);
        assert_eq!(outcome.intents[0].kind, IntentKind::Exit);
        assert_eq!(outcome.intents[0].side, Side::Sell);
        assert_eq!(outcome.intents[0].quantity, 50.0);
        assert_eq!(s.stop_level(), None);
    }

    #[test]
    fn test_flip_down_reverses_when_shorting_allowed() {
        let mut s = strategy(true);
        warm_up_and_break_up(&mut s, &AccountSnapshot::flat(1e5));

        let long = AccountSnapshot {
            equity: 1e5,
            position_quantity: 50.0,
        };
        let outcome = s.on_bar(&bar(3, 96.0, 90.0, 91.0), &long);

        let kinds: Vec<_> = outcome.intents.iter().map(|i| (i.kind, i.side)).collect();
        assert_eq!(
            kinds,
            vec![(IntentKind::Exit, Side::Sell), (IntentKind::Entry, Side::Sell)]
        );
        let stop = outcome.intents[1].stop_level.unwrap();
        assert!(stop > 91.0);
    }

    #[test]
    fn test_daily_loss_blocks_entry_but_not_exit() {
        let mut s = strategy(true);
        warm_up_and_break_up(&mut s, &AccountSnapshot::flat(1e5));

        // 4% below start-of-day equity, past the 3% limit
        let losing_long = AccountSnapshot {
            equity: 96_000.0,
            position_quantity: 50.0,
        };
        let outcome = s.on_bar(&bar(3, 96.0, 90.0, 91.0), &losing_long);

        assert_eq!(outcome.flipped(), Some(Trend::Down));
        assert_eq!(outcome.intents.len(), 1);
        assert_eq!(outcome.intents[0].kind, IntentKind::Exit);
        assert_eq!(outcome.intents[0].side, Side::Sell);
        assert_eq!(outcome.intents[0].quantity, 50.0);
        assert_eq!(outcome.suppressed, Some(SuppressionReason::DailyLoss));
        assert_eq!(s.stats().exits, 1);
        assert_eq!(s.stats().entries, 1);
    }

    #[test]
    fn test_exit_uses_last_daily_trade_and_blocks_reversal() {
        let mut config = config(true);
        config.risk = config.risk.with_max_daily_trades(2);
        let mut s = SuperTrendStrategy::new(Symbol::new("BTCUSD"), &config).unwrap();

        let up = warm_up_and_break_up(&mut s, &AccountSnapshot::flat(1e5));
        assert_eq!(up.intents.len(), 1);
        assert_eq!(s.risk().gate().daily_trade_count(), 1);

        let long = AccountSnapshot {
            equity: 1e5,
            position_quantity: 50.0,
        };
        let outcome = s.on_bar(&bar(3, 96.0, 90.0, 91.0), &long);

        assert_eq!(outcome.intents.len(), 1);
        assert_eq!(outcome.intents[0].kind, IntentKind::Exit);
        assert_eq!(outcome.suppressed, Some(SuppressionReason::TradeCount));
        assert_eq!(s.risk().gate().daily_trade_count(), 2);
        assert_eq!(s.stats().suppressed.get(&SuppressionReason::TradeCount), Some(&1));
    }

    #[test]
    fn test_held_trend() {
        assert_eq!(AccountSnapshot::flat(1e5).held_trend(), None);
        let short = AccountSnapshot {
            equity: 1e5,
            position_quantity: -3.0,
        };
        assert_eq!(short.held_trend(), Some(Trend::Down));
    }

    #[test]
    fn test_invalid_bar_skipped() {
        let mut s = strategy(false);
        let outcome = s.on_bar(&bar(0, 99.0, 101.0, 100.0), &AccountSnapshot::flat(1e5));
        assert!(matches!(outcome.skipped, Some(SkipReason::Invalid(_))));
        assert_eq!(s.stats().bars_skipped, 1);
        assert_eq!(s.history().indicator().bars_seen(), 0);
    }

    #[test]
    fn test_out_of_order_bar_skipped() {
        let mut s = strategy(false);
        let account = AccountSnapshot::flat(1e5);
        s.on_bar(&bar(5, 101.0, 99.0, 100.0), &account);
        let outcome = s.on_bar(&bar(4, 101.0, 99.0, 100.0), &account);
        assert_eq!(outcome.skipped, Some(SkipReason::OutOfOrder));
        assert_eq!(s.history().indicator().bars_seen(), 1);
    }

    #[test]
    fn test_interval_suppression_counted() {
        let mut config = config(true);
        config.risk = RiskConfig::default().with_min_signal_interval(30);
        let mut s = SuperTrendStrategy::new(Symbol::new("BTCUSD"), &config).unwrap();
        let flat = AccountSnapshot::flat(1e5);

        let up = warm_up_and_break_up(&mut s, &flat);
        assert_eq!(up.intents.len(), 1);

        // flips back down one minute later
        let down = s.on_bar(&bar(3, 96.0, 90.0, 91.0), &flat);
        assert_eq!(down.flipped(), Some(Trend::Down));
        assert!(down.intents.is_empty());
        assert_eq!(down.suppressed, Some(SuppressionReason::Interval));
        assert_eq!(s.stats().suppressed.get(&SuppressionReason::Interval), Some(&1));
        assert_eq!(s.stats().total_suppressed(), 1);
    }

    #[test]
    fn test_stop_ratchets_up_only() {
        let mut s = strategy(false);
        let up = warm_up_and_break_up(&mut s, &AccountSnapshot::flat(1e5));
        let entry_stop = up.intents[0].stop_level.unwrap();
        let long = AccountSnapshot {
            equity: 1e5,
            position_quantity: 10.0,
        };

        let higher = s.on_bar(&bar(3, 111.0, 109.0, 110.0), &long);
        let new_stop = higher.stop_update.unwrap();
        assert!(new_stop > entry_stop);

        // a quiet bar cannot loosen the stop
        let quiet = s.on_bar(&bar(4, 110.5, 109.5, 110.0), &long);
        if let Some(stop) = quiet.stop_update {
            assert!(stop > new_stop);
        }
        assert!(s.stop_level().unwrap() >= new_stop);
    }

    #[test]
    fn test_anomaly_counted() {
        let mut s = strategy(false);
        let account = AccountSnapshot::flat(1e5);
        s.on_bar(&bar(0, 101.0, 99.0, 100.0), &account);
        s.on_bar(&bar(1, 111.0, 109.0, 110.0), &account);
        assert_eq!(s.stats().anomalies, 1);
    }
}
