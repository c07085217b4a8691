//! Replay command implementation

use anyhow::Result;
use std::path::Path;
use supertrend_trader::{data, replay, Config, Symbol};
use tracing::{debug, info};

pub fn run(
    config_path: String,
    symbols_override: Option<String>,
    capital_override: Option<f64>,
    allow_short: bool,
) -> Result<()> {
    info!("Starting replay");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(symbols) = symbols_override {
        info!("Overriding symbols to: {}", symbols);
        config.data.symbols = symbols
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }

    if let Some(capital) = capital_override {
        info!("Overriding initial equity to: {:.2}", capital);
        config.replay.initial_equity = capital;
    }

    if allow_short {
        info!("Short entries enabled");
        config.strategy.allow_short = true;
    }

    // Overrides can break invariants the file satisfied
    config.validate()?;

    let symbols: Vec<Symbol> = config.data.symbols();
    if symbols.is_empty() {
        anyhow::bail!("No symbols configured");
    }
    debug!("Symbols: {:?}", symbols);

    info!("Loading data from: {}", config.data.data_dir);
    let data = data::load_multi_symbol(&config.data.data_dir, &symbols, &config.data.timeframe)?;
    info!("Loaded data for {} symbols", data.len());

    let reports = replay::replay_many(&data, &config)?;

    let results_dir = Path::new(&config.data.results_dir);

    println!("\n{}", "=".repeat(60));
    println!("REPLAY RESULTS");
    println!("{}", "=".repeat(60));
    println!(
        "Indicator:          period={}, multiplier={}",
        config.supertrend.atr_period, config.supertrend.multiplier
    );
    println!("Initial Equity:     {:.2}", config.replay.initial_equity);

    for report in &reports {
        data::write_intents_csv(
            results_dir.join(format!("{}_intents.csv", report.symbol)),
            &report.intents,
        )?;
        data::write_csv(
            results_dir.join(format!("{}_trades.csv", report.symbol)),
            &report.trades,
        )?;
        data::write_csv(
            results_dir.join(format!("{}_equity.csv", report.symbol)),
            &report.equity_curve,
        )?;
        data::write_json(results_dir.join(format!("{}_report.json", report.symbol)), report)?;

        println!("{}", "-".repeat(60));
        println!("Symbol:             {}", report.symbol);
        println!(
            "Bars:               {} ({} skipped)",
            report.bars, report.stats.bars_skipped
        );
        println!("Trend Flips:        {}", report.stats.signals);
        println!(
            "Entries / Exits:    {} / {}",
            report.stats.entries, report.stats.exits
        );
        println!("Stop Updates:       {}", report.stats.stop_updates);
        for (reason, count) in &report.stats.suppressed {
            println!("Suppressed {:<8} {}", format!("{}:", reason), count);
        }
        let m = &report.metrics;
        println!("Final Equity:       {:.2}", report.final_equity);
        println!("Total Return:       {:.2}%", m.total_return);
        println!("Max Drawdown:       {:.2}%", m.max_drawdown);
        println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
        println!("Volatility:         {:.2}%", m.volatility * 100.0);
        println!(
            "Trades:             {} ({} wins, {} losses)",
            m.total_trades, m.winning_trades, m.losing_trades
        );
        println!("Win Rate:           {:.2}%", m.win_rate);
        println!("Profit Factor:      {:.2}", m.profit_factor);
        println!("Total P&L:          {:.2}", m.total_pnl);
        println!("Avg Trade P&L:      {:.2}", m.avg_trade_pnl);
        println!("Final Position:     {:.6}", report.final_position);
        println!("State:              {}", report.indicator);
    }
    println!("{}", "=".repeat(60));

    info!("Replay completed successfully");

    Ok(())
}
