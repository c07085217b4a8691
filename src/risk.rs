//! Risk management framework
//!
//! Turns a trend flip into a bounded order quantity and suppresses signals
//! that violate per-day trading limits.
//!
//! # Currency-Agnostic Design
//!
//! All values are dimensionless. Equity and prices only need to share the same
//! currency denomination.
//!
//! Position sizing formula:
//! ```text
//! risk_amount   = equity * risk_per_trade
//! stop_distance = |price - stop_level|
//! quantity      = min(risk_amount / stop_distance,
//!                     equity * max_position_pct / price)
//! ```

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::{IntentKind, OrderIntent, Side, Symbol};

/// Configuration for the position sizer and risk gate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of equity risked per trade (default: 0.02)
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,

    /// Maximum position value as fraction of equity (default: 0.10)
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,

    /// Orders allowed per trading day (default: 10)
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    /// Minimum minutes between executed signals, 0 disables (default: 30)
    #[serde(default = "default_min_signal_interval")]
    pub min_signal_interval_minutes: i64,

    /// Daily drawdown from start-of-day equity that blocks entries (default: 0.03)
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,

    /// Floor for the stop distance as fraction of price, 0 disables (default: 0.0)
    #[serde(default)]
    pub min_stop_distance_pct: f64,
}

fn default_risk_per_trade() -> f64 {
    0.02
}
fn default_max_position_pct() -> f64 {
    0.10
}
fn default_max_daily_trades() -> u32 {
    10
}
fn default_min_signal_interval() -> i64 {
    30
}
fn default_daily_loss_limit() -> f64 {
    0.03
}

/// Longest accepted signal interval, one year
pub const MAX_SIGNAL_INTERVAL_MINUTES: i64 = 365 * 24 * 60;

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: default_risk_per_trade(),
            max_position_pct: default_max_position_pct(),
            max_daily_trades: default_max_daily_trades(),
            min_signal_interval_minutes: default_min_signal_interval(),
            daily_loss_limit: default_daily_loss_limit(),
            min_stop_distance_pct: 0.0,
        }
    }
}

fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            expected: "in (0, 1]",
            value,
        })
    }
}

impl RiskConfig {
    /// Set risk per trade as a fraction (e.g., 0.02 = 2%)
    pub fn with_risk_per_trade(mut self, risk: f64) -> Self {
        self.risk_per_trade = risk;
        self
    }

    /// Set maximum position percentage
    pub fn with_max_position_pct(mut self, pct: f64) -> Self {
        self.max_position_pct = pct;
        self
    }

    pub fn with_max_daily_trades(mut self, max: u32) -> Self {
        self.max_daily_trades = max;
        self
    }

    pub fn with_min_signal_interval(mut self, minutes: i64) -> Self {
        self.min_signal_interval_minutes = minutes;
        self
    }

    pub fn with_daily_loss_limit(mut self, limit: f64) -> Self {
        self.daily_loss_limit = limit;
        self
    }

    pub fn with_min_stop_distance_pct(mut self, pct: f64) -> Self {
        self.min_stop_distance_pct = pct;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_fraction("risk.risk_per_trade", self.risk_per_trade)?;
        check_fraction("risk.max_position_pct", self.max_position_pct)?;
        check_fraction("risk.daily_loss_limit", self.daily_loss_limit)?;

        if self.max_daily_trades < 1 {
            return Err(ConfigError::OutOfRange {
                field: "risk.max_daily_trades",
                expected: ">= 1",
                value: self.max_daily_trades as f64,
            });
        }
        if !(0..=MAX_SIGNAL_INTERVAL_MINUTES).contains(&self.min_signal_interval_minutes) {
            return Err(ConfigError::OutOfRange {
                field: "risk.min_signal_interval_minutes",
                expected: "in [0, 525600]",
                value: self.min_signal_interval_minutes as f64,
            });
        }
        if !(self.min_stop_distance_pct.is_finite() && self.min_stop_distance_pct >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "risk.min_stop_distance_pct",
                expected: ">= 0",
                value: self.min_stop_distance_pct,
            });
        }
        Ok(())
    }

    /// Build the RiskManager
    pub fn build(self) -> Result<RiskManager, ConfigError> {
        RiskManager::new(self)
    }
}

/// Why a signal produced no order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuppressionReason {
    /// Too soon after the previous executed signal
    Interval,
    /// Daily order budget used up
    TradeCount,
    /// Daily loss limit breached
    DailyLoss,
    /// Stop distance zero or not finite
    DegenerateStop,
    /// Equity or price not usable for sizing
    InvalidPricing,
}

impl SuppressionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionReason::Interval => "interval",
            SuppressionReason::TradeCount => "trade-count",
            SuppressionReason::DailyLoss => "daily-loss",
            SuppressionReason::DegenerateStop => "degenerate-stop",
            SuppressionReason::InvalidPricing => "invalid-pricing",
        }
    }
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a sizing calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSize {
    pub quantity: f64,
    /// Equity lost if the stop is hit at its actual distance from price
    pub risk_amount: f64,
    pub stop_distance: f64,
    /// Quantity was reduced to the allocation cap
    pub capped: bool,
}

/// Risk-based position sizer
#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    risk_per_trade: f64,
    max_position_pct: f64,
    min_stop_distance_pct: f64,
}

impl PositionSizer {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            risk_per_trade: config.risk_per_trade,
            max_position_pct: config.max_position_pct,
            min_stop_distance_pct: config.min_stop_distance_pct,
        }
    }

    /// Largest quantity the allocation cap allows at `price`
    pub fn max_quantity(&self, equity: f64, price: f64) -> f64 {
        equity * self.max_position_pct / price
    }

    /// Size a position whose stop sits at `stop_level`
    pub fn size(
        &self,
        equity: f64,
        price: f64,
        stop_level: f64,
    ) -> Result<PositionSize, SuppressionReason> {
        if !(equity.is_finite() && equity > 0.0 && price.is_finite() && price > 0.0) {
            return Err(SuppressionReason::InvalidPricing);
        }

        let raw_distance = (price - stop_level).abs();
        if !raw_distance.is_finite() || raw_distance <= 0.0 {
            return Err(SuppressionReason::DegenerateStop);
        }
        let stop_distance = raw_distance.max(price * self.min_stop_distance_pct);

        let risk_budget = equity * self.risk_per_trade;
        let raw_quantity = risk_budget / stop_distance;
        let max_quantity = self.max_quantity(equity, price);
        let capped = raw_quantity > max_quantity;
        let quantity = raw_quantity.min(max_quantity);

        Ok(PositionSize {
            quantity,
            risk_amount: quantity * raw_distance,
            stop_distance,
            capped,
        })
    }
}

/// Per-day signal limits, owned by one strategy instance
#[derive(Debug, Clone)]
pub struct RiskGate {
    max_daily_trades: u32,
    min_signal_interval: Duration,
    daily_loss_limit: f64,
    trading_day: Option<NaiveDate>,
    start_of_day_equity: f64,
    daily_trade_count: u32,
    last_signal_time: Option<DateTime<Utc>>,
}

impl RiskGate {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            max_daily_trades: config.max_daily_trades,
            min_signal_interval: Duration::try_minutes(config.min_signal_interval_minutes)
                .unwrap_or(Duration::MAX),
            daily_loss_limit: config.daily_loss_limit,
            trading_day: None,
            start_of_day_equity: 0.0,
            daily_trade_count: 0,
            last_signal_time: None,
        }
    }

    /// Start a new trading day when `now` falls on a later UTC date
    pub fn roll_day(&mut self, now: DateTime<Utc>, equity: f64) {
        let today = now.date_naive();
        match self.trading_day {
            Some(day) if today <= day => {}
            previous => {
                if previous.is_some() {
                    info!(
                        date = %today,
                        trades_yesterday = self.daily_trade_count,
                        start_of_day_equity = format!("{:.2}", equity),
                        "Daily reset"
                    );
                }
                self.trading_day = Some(today);
                self.start_of_day_equity = equity;
                self.daily_trade_count = 0;
            }
        }
    }

    /// Interval and trade-count limits
    pub fn check_rate(&self, now: DateTime<Utc>) -> Result<(), SuppressionReason> {
        if let Some(last) = self.last_signal_time {
            if now - last < self.min_signal_interval {
                return Err(SuppressionReason::Interval);
            }
        }
        self.check_trade_count()
    }

    pub fn check_trade_count(&self) -> Result<(), SuppressionReason> {
        if self.daily_trade_count >= self.max_daily_trades {
            return Err(SuppressionReason::TradeCount);
        }
        Ok(())
    }

    /// Daily loss limit against start-of-day equity
    pub fn check_daily_loss(&self, equity: f64) -> Result<(), SuppressionReason> {
        if self.start_of_day_equity > 0.0
            && self.daily_pnl(equity) <= -self.daily_loss_limit * self.start_of_day_equity
        {
            return Err(SuppressionReason::DailyLoss);
        }
        Ok(())
    }

    /// Mark-to-market P&L since the start of the trading day
    pub fn daily_pnl(&self, equity: f64) -> f64 {
        equity - self.start_of_day_equity
    }

    /// Count an emitted order
    pub fn record_execution(&mut self, now: DateTime<Utc>) {
        self.daily_trade_count += 1;
        self.last_signal_time = Some(now);
    }

    pub fn daily_trade_count(&self) -> u32 {
        self.daily_trade_count
    }

    pub fn start_of_day_equity(&self) -> f64 {
        self.start_of_day_equity
    }

    pub fn last_signal_time(&self) -> Option<DateTime<Utc>> {
        self.last_signal_time
    }
}

/// Result of evaluating one signal
#[derive(Debug, Clone, PartialEq)]
pub enum SignalDecision {
    Execute(OrderIntent),
    Suppressed(SuppressionReason),
}

impl SignalDecision {
    pub fn intent(&self) -> Option<&OrderIntent> {
        match self {
            SignalDecision::Execute(intent) => Some(intent),
            SignalDecision::Suppressed(_) => None,
        }
    }

    pub fn reason(&self) -> Option<SuppressionReason> {
        match self {
            SignalDecision::Execute(_) => None,
            SignalDecision::Suppressed(reason) => Some(*reason),
        }
    }
}

/// Position sizer plus risk gate for one symbol
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    sizer: PositionSizer,
    gate: RiskGate,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            sizer: PositionSizer::new(&config),
            gate: RiskGate::new(&config),
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn sizer(&self) -> &PositionSizer {
        &self.sizer
    }

    pub fn gate(&self) -> &RiskGate {
        &self.gate
    }

    /// Advance day counters; call once per bar before evaluating signals
    pub fn on_bar(&mut self, now: DateTime<Utc>, equity: f64) {
        self.gate.roll_day(now, equity);
    }

    pub fn check_rate(&self, now: DateTime<Utc>) -> Result<(), SuppressionReason> {
        self.gate.check_rate(now)
    }

    pub fn check_trade_count(&self) -> Result<(), SuppressionReason> {
        self.gate.check_trade_count()
    }

    /// Size an entry in `side` direction with the stop at `stop_level`
    ///
    /// Rate limits are checked by the caller once per signal; this applies the
    /// daily loss limit and sizing, and records the execution.
    pub fn evaluate_entry(
        &mut self,
        symbol: &Symbol,
        now: DateTime<Utc>,
        side: Side,
        equity: f64,
        price: f64,
        stop_level: f64,
    ) -> SignalDecision {
        if let Err(reason) = self.gate.check_daily_loss(equity) {
            debug!(
                %symbol,
                daily_pnl = format!("{:.2}", self.gate.daily_pnl(equity)),
                "Entry suppressed: daily loss limit"
            );
            return SignalDecision::Suppressed(reason);
        }

        let size = match self.sizer.size(equity, price, stop_level) {
            Ok(size) => size,
            Err(reason) => {
                debug!(%symbol, price, stop_level, %reason, "Entry suppressed");
                return SignalDecision::Suppressed(reason);
            }
        };

        debug!(
            %symbol,
            price,
            stop_level,
            quantity = size.quantity,
            risk = format!("{:.2}", size.risk_amount),
            capped = size.capped,
            "Position sized"
        );

        self.gate.record_execution(now);
        SignalDecision::Execute(OrderIntent {
            symbol: symbol.clone(),
            time: now,
            side,
            kind: IntentKind::Entry,
            quantity: size.quantity,
            reference_price: price,
            stop_level: Some(stop_level),
        })
    }

    /// Close `quantity` units held on the side opposite to `side`
    pub fn evaluate_exit(
        &mut self,
        symbol: &Symbol,
        now: DateTime<Utc>,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> SignalDecision {
        self.gate.record_execution(now);
        SignalDecision::Execute(OrderIntent {
            symbol: symbol.clone(),
            time: now,
            side,
            kind: IntentKind::Exit,
            quantity,
            reference_price: price,
            stop_level: None,
        })
    }

    /// Full gate plus sizing for a standalone entry signal
    pub fn evaluate(
        &mut self,
        symbol: &Symbol,
        now: DateTime<Utc>,
        side: Side,
        equity: f64,
        price: f64,
        stop_level: f64,
    ) -> SignalDecision {
        self.on_bar(now, equity);
        if let Err(reason) = self.gate.check_rate(now) {
            debug!(%symbol, %reason, "Signal suppressed");
            return SignalDecision::Suppressed(reason);
        }
        self.evaluate_entry(symbol, now, side, equity, price, stop_level)
    }
}
