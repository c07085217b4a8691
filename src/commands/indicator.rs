//! Indicator command implementation

use anyhow::Result;
use std::path::Path;
use supertrend_trader::{data, supertrend, Config};
use tracing::info;

pub fn run(
    input: String,
    config_path: Option<String>,
    atr_period: Option<usize>,
    multiplier: Option<f64>,
    output: Option<String>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(period) = atr_period {
        config.supertrend.atr_period = period;
    }
    if let Some(multiplier) = multiplier {
        config.supertrend.multiplier = multiplier;
    }
    config.supertrend.validate()?;

    let candles = data::load_csv(&input)?;
    info!("Loaded {} candles from {}", candles.len(), input);

    let readings = supertrend::supertrend(&candles, config.supertrend)?;

    let output = output.unwrap_or_else(|| {
        let stem = Path::new(&input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bars".to_string());
        Path::new(&config.data.results_dir)
            .join(format!("{}_supertrend.csv", stem))
            .to_string_lossy()
            .into_owned()
    });
    data::write_readings_csv(&output, &candles, &readings)?;

    let flips = readings
        .iter()
        .flatten()
        .filter(|r| r.flipped.is_some())
        .count();
    let last = readings.iter().rev().flatten().next();

    println!("\n{}", "=".repeat(60));
    println!("SUPERTREND");
    println!("{}", "=".repeat(60));
    println!("Bars:               {}", candles.len());
    println!("ATR Period:         {}", config.supertrend.atr_period);
    println!("Multiplier:         {}", config.supertrend.multiplier);
    println!("Trend Flips:        {}", flips);
    match last {
        Some(reading) => {
            let trend = reading
                .trend
                .map_or_else(|| "-".to_string(), |t| t.to_string());
            println!("Current Trend:      {}", trend);
            println!("Current Level:      {:.4}", reading.level);
            println!("Current ATR:        {:.4}", reading.atr);
        }
        None => println!("Not enough bars to warm up"),
    }
    println!("Output:             {}", output);
    println!("{}", "=".repeat(60));

    Ok(())
}
