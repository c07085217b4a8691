//! Optimize command implementation with progress tracking and custom grids

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::str::FromStr;
use supertrend_trader::optimizer::{self, OptimizationReport, Optimizer};
use supertrend_trader::{data, Config, SortMetric, Symbol};
use tracing::info;

/// Parse a comma-separated list, rejecting values that do not parse
fn parse_list<T: FromStr>(s: &str, name: &str) -> Result<Vec<T>> {
    s.split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(|x| {
            x.parse()
                .map_err(|_| anyhow::anyhow!("invalid value '{}' in --{}", x, name))
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: String,
    sort_by: SortMetric,
    top: usize,
    symbols_override: Option<String>,
    atr_period: Option<String>,
    multiplier: Option<String>,
    risk: Option<String>,
    max_position: Option<String>,
    sequential: bool,
) -> Result<()> {
    info!("Starting optimization");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(symbols) = symbols_override {
        config.data.symbols = symbols
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }

    // CLI lists replace the grid from the config file
    let mut grid = config.optimize.clone();
    if let Some(s) = atr_period {
        grid.atr_period = parse_list(&s, "atr-period")?;
    }
    if let Some(s) = multiplier {
        grid.multiplier = parse_list(&s, "multiplier")?;
    }
    if let Some(s) = risk {
        grid.risk_per_trade = parse_list(&s, "risk")?;
    }
    if let Some(s) = max_position {
        grid.max_position_pct = parse_list(&s, "max-position")?;
    }

    let candidates = grid.generate_configs(&config)?;
    info!("Parameter combinations: {}", candidates.len());

    let symbols: Vec<Symbol> = config.data.symbols();
    if symbols.is_empty() {
        anyhow::bail!("No symbols configured");
    }
    let data = data::load_multi_symbol(&config.data.data_dir, &symbols, &config.data.timeframe)?;
    let loaded: Vec<Symbol> = data.keys().cloned().collect();

    println!("\n{}", "=".repeat(70));
    println!("OPTIMIZATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Symbols:       {:?}", loaded);
    println!("  ATR periods:   {:?}", grid.atr_period);
    println!("  Multipliers:   {:?}", grid.multiplier);
    println!("  Risk/trade:    {:?}", grid.risk_per_trade);
    println!("  Max position:  {:?}", grid.max_position_pct);
    println!("  Parameters:    {} combinations", candidates.len());
    println!("  Mode:          {}", if sequential { "sequential" } else { "parallel" });
    println!("{}\n", "=".repeat(70));

    let pb = ProgressBar::new(candidates.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}]")?
            .progress_chars("█░ "),
    );

    let optimizer = Optimizer::new(&data);
    let mut results = if sequential {
        optimizer.optimize_sequential(&candidates, &pb)?
    } else {
        optimizer.optimize_with_progress(&candidates, &pb)?
    };
    pb.finish();
    println!();

    optimizer::sort_results(&mut results, sort_by);
    info!("Total results: {}, sorted by: {}", results.len(), sort_by);

    let display_count = top.min(results.len());
    println!("\n{}", "=".repeat(110));
    println!("TOP {} OPTIMIZATION RESULTS (sorted by {})", display_count, sort_by);
    println!("{}", "=".repeat(110));
    println!(
        "{:<4} {:>7} {:>9} {:>8} {:>8} {:>6} {:>7} | Parameters",
        "Rank", "Sharpe", "Return%", "MaxDD%", "WinR%", "Trades", "PF"
    );
    println!("{}", "-".repeat(110));
    for (i, result) in results.iter().take(display_count).enumerate() {
        println!(
            "{:<4} {:>7.2} {:>9.2} {:>8.2} {:>8.2} {:>6} {:>7.2} | {}",
            i + 1,
            result.sharpe_ratio,
            result.total_return,
            result.max_drawdown,
            result.win_rate,
            result.total_trades,
            result.profit_factor,
            result.params
        );
    }
    println!("{}", "=".repeat(110));

    let report = OptimizationReport {
        sort_by,
        symbols: loaded,
        combinations: candidates.len(),
        grid,
        results,
    };
    let path = Path::new(&config.data.results_dir).join(format!(
        "optimize_{}.json",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));
    data::write_json(&path, &report).context("Failed to save optimization results")?;
    println!("Results saved to {}", path.display());

    info!("Optimization completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list::<usize>("7, 10,14,", "atr-period").unwrap(), vec![7, 10, 14]);
        assert_eq!(parse_list::<f64>("0.01,0.02", "risk").unwrap(), vec![0.01, 0.02]);
        assert!(parse_list::<usize>("7,ten", "atr-period").is_err());
    }
}
