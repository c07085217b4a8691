//! Supertrend trader - main entry point
//!
//! This binary provides four subcommands:
//! - replay: Run recorded bars through the strategy and risk gate
//! - optimize: Grid-search indicator and sizing parameters over recorded bars
//! - indicator: Compute Supertrend readings for a CSV file
//! - check-config: Validate a configuration file

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use supertrend_trader::SortMetric;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "supertrend-trader")]
#[command(about = "Supertrend indicator with risk-gated position sizing", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay recorded bars and report the order intents produced
    Replay {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/supertrend.json")]
        config: String,

        /// Symbols to replay (comma-separated, overrides config file)
        #[arg(short, long)]
        symbols: Option<String>,

        /// Initial equity
        #[arg(long)]
        capital: Option<f64>,

        /// Allow short entries on downward flips
        #[arg(long)]
        allow_short: bool,
    },

    /// Grid-search parameters and rank them by a score
    Optimize {
        /// Path to base configuration file
        #[arg(short, long, default_value = "configs/supertrend.json")]
        config: String,

        /// Sort results by metric (sharpe, return, calmar, win_rate, profit_factor)
        #[arg(long, default_value = "sharpe")]
        sort_by: SortMetric,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Symbols to test (comma-separated, overrides config file)
        #[arg(short, long)]
        symbols: Option<String>,

        /// ATR periods to test (comma-separated). E.g., "7,10,14"
        #[arg(long)]
        atr_period: Option<String>,

        /// Band multipliers to test (comma-separated). E.g., "2,3,5"
        #[arg(long)]
        multiplier: Option<String>,

        /// Risk per trade fractions to test (comma-separated). E.g., "0.01,0.02"
        #[arg(long)]
        risk: Option<String>,

        /// Maximum position fractions to test (comma-separated). E.g., "0.05,0.10"
        #[arg(long)]
        max_position: Option<String>,

        /// Run sequentially instead of in parallel
        #[arg(long)]
        sequential: bool,
    },

    /// Compute indicator readings for one CSV file
    Indicator {
        /// OHLCV CSV file
        #[arg(short, long)]
        input: String,

        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// ATR period (overrides config file)
        #[arg(long)]
        atr_period: Option<usize>,

        /// Band multiplier (overrides config file)
        #[arg(long)]
        multiplier: Option<f64>,

        /// Output CSV file
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Validate a configuration file and print the effective parameters
    CheckConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/supertrend.json")]
        config: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool, json: bool) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log (or .json)
    let extension = if json { "json" } else { "log" };
    let log_filename = format!(
        "{}_{}.{}",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"),
        extension
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    // Console layer is skipped for the optimizer to keep the progress bar clean
    let console_layer = (!file_only).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true)
    });

    // File layer - same format but without ANSI colors, or one JSON object per line
    let (text_file_layer, json_file_layer) = if json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);
        (Some(layer), None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(text_file_layer)
        .with(json_file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    // Parameter overrides may live in a local .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Replay { .. } => ("replay", false),
        Commands::Optimize { .. } => ("optimize", true),
        Commands::Indicator { .. } => ("indicator", false),
        Commands::CheckConfig { .. } => ("check_config", false),
    };

    setup_logging(cli.verbose, command_name, file_only, cli.json_logs)?;

    match cli.command {
        Commands::Replay {
            config,
            symbols,
            capital,
            allow_short,
        } => commands::replay::run(config, symbols, capital, allow_short),

        Commands::Optimize {
            config,
            sort_by,
            top,
            symbols,
            atr_period,
            multiplier,
            risk,
            max_position,
            sequential,
        } => commands::optimize::run(
            config,
            sort_by,
            top,
            symbols,
            atr_period,
            multiplier,
            risk,
            max_position,
            sequential,
        ),

        Commands::Indicator {
            input,
            config,
            atr_period,
            multiplier,
            output,
        } => commands::indicator::run(input, config, atr_period, multiplier, output),

        Commands::CheckConfig { config } => commands::check_config::run(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_logs_flag_is_global() {
        let cli = Cli::try_parse_from(["supertrend-trader", "replay", "--json-logs"]).unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Replay { .. }));

        let cli = Cli::try_parse_from(["supertrend-trader", "check-config"]).unwrap();
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_optimize_args() {
        let cli = Cli::try_parse_from([
            "supertrend-trader",
            "optimize",
            "--sort-by",
            "return",
            "--atr-period",
            "7,14",
            "--sequential",
        ])
        .unwrap();
        match cli.command {
            Commands::Optimize {
                sort_by,
                top,
                atr_period,
                sequential,
                ..
            } => {
                assert_eq!(sort_by, SortMetric::Return);
                assert_eq!(top, 10);
                assert_eq!(atr_period.as_deref(), Some("7,14"));
                assert!(sequential);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from(["supertrend-trader", "optimize", "--sort-by", "luck"]).is_err());
    }
}
