//! Data loading and report output
//!
//! Loads OHLCV bars from CSV files and writes indicator readings, order
//! intents and replay reports.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};

use crate::supertrend::SuperTrendReading;
use crate::{Candle, OrderIntent, Symbol, Trend};

// =============================================================================
// CSV Data Loading
// =============================================================================

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Try parsing without timezone and assume UTC
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .with_context(|| format!("Failed to parse datetime: {}", raw))
}

fn parse_field(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64> {
    record
        .get(idx)
        .with_context(|| format!("Missing {} column", name))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", name))
}

/// Load OHLCV data from CSV file
///
/// Columns are `datetime,open,high,low,close,volume` with a header row. Rows
/// that fail candle validation are dropped with a warning; the result is
/// sorted by time with duplicate timestamps removed.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();
    let mut dropped = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let datetime = parse_datetime(record.get(0).context("Missing datetime column")?.trim())?;
        let candle = Candle {
            datetime,
            open: parse_field(&record, 1, "open")?,
            high: parse_field(&record, 2, "high")?,
            low: parse_field(&record, 3, "low")?,
            close: parse_field(&record, 4, "close")?,
            volume: parse_field(&record, 5, "volume")?,
        };

        if let Err(err) = candle.validate() {
            warn!(row = row_idx + 1, time = %datetime, error = %err, "Dropping invalid row");
            dropped += 1;
            continue;
        }
        candles.push(candle);
    }

    if !candles.windows(2).all(|w| w[0].datetime < w[1].datetime) {
        warn!("{}: rows not in time order, sorting", path.display());
        candles.sort_by_key(|c| c.datetime);
        candles.dedup_by_key(|c| c.datetime);
    }
    if dropped > 0 {
        warn!("{}: dropped {} invalid rows", path.display(), dropped);
    }

    Ok(candles)
}

/// Load data for multiple symbols from `{SYMBOL}_{timeframe}.csv` files
pub fn load_multi_symbol(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    timeframe: &str,
) -> Result<BTreeMap<Symbol, Vec<Candle>>> {
    let mut data = BTreeMap::new();

    for symbol in symbols {
        let filename = format!("{}_{}.csv", symbol.as_str(), timeframe);
        let path = data_dir.as_ref().join(&filename);

        if !path.exists() {
            warn!("Data file not found: {}", path.display());
            continue;
        }

        let candles =
            load_csv(&path).with_context(|| format!("Failed to load data for {}", symbol))?;

        info!("Loaded {} candles for {}", candles.len(), symbol);
        data.insert(symbol.clone(), candles);
    }

    if data.is_empty() {
        anyhow::bail!("No data loaded for any symbol");
    }

    Ok(data)
}

// =============================================================================
// Output
// =============================================================================

/// One row of indicator output
#[derive(Debug, Clone, Serialize)]
pub struct ReadingRow {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub atr: Option<f64>,
    pub upper_band: Option<f64>,
    pub lower_band: Option<f64>,
    pub level: Option<f64>,
    pub trend: Option<Trend>,
    pub flipped: Option<Trend>,
}

impl ReadingRow {
    pub fn new(candle: &Candle, reading: Option<&SuperTrendReading>) -> Self {
        Self {
            datetime: candle.datetime,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            atr: reading.map(|r| r.atr),
            upper_band: reading.map(|r| r.band.upper),
            lower_band: reading.map(|r| r.band.lower),
            level: reading.map(|r| r.level),
            trend: reading.and_then(|r| r.trend),
            flipped: reading.and_then(|r| r.flipped),
        }
    }
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Write any serializable rows as CSV with a header
pub fn write_csv<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir(path)?;

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!("Saved {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Write indicator readings alongside their bars
pub fn write_readings_csv(
    path: impl AsRef<Path>,
    candles: &[Candle],
    readings: &[Option<SuperTrendReading>],
) -> Result<()> {
    let rows: Vec<ReadingRow> = candles
        .iter()
        .zip(readings)
        .map(|(candle, reading)| ReadingRow::new(candle, reading.as_ref()))
        .collect();
    write_csv(path, &rows)
}

pub fn write_intents_csv(path: impl AsRef<Path>, intents: &[OrderIntent]) -> Result<()> {
    write_csv(path, intents)
}

/// Write a value as pretty-printed JSON
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir(path)?;

    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Saved report to {}", path.display());
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("supertrend_data_{}_{}", std::process::id(), name))
    }

    fn write_file(path: &Path, contents: &str) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_csv_both_datetime_formats() {
        let path = temp_path("formats.csv");
        write_file(
            &path,
            "datetime,open,high,low,close,volume\n\
             2024-01-01 00:00:00,100,105,95,102,10\n\
             2024-01-01T00:01:00Z,102,106,101,104,12\n",
        );

        let candles = load_csv(&path).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 104.0);
        assert!(candles[0].datetime < candles[1].datetime);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_csv_drops_invalid_and_sorts() {
        let path = temp_path("unsorted.csv");
        write_file(
            &path,
            "datetime,open,high,low,close,volume\n\
             2024-01-01 00:02:00,100,105,95,102,10\n\
             2024-01-01 00:01:00,100,95,105,102,10\n\
             2024-01-01 00:00:00,100,105,95,101,10\n",
        );

        let candles = load_csv(&path).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].close, 102.0);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_csv_unparseable_is_error() {
        let path = temp_path("bad.csv");
        write_file(&path, "datetime,open,high,low,close,volume\nyesterday,1,1,1,1,1\n");
        assert!(load_csv(&path).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_multi_symbol_missing_everything() {
        let dir = temp_path("empty_dir");
        fs::create_dir_all(&dir).unwrap();
        let result = load_multi_symbol(&dir, &[Symbol::new("BTCUSD")], "1m");
        assert!(result.is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_write_intents_csv() {
        let path = temp_path("out/intents.csv");
        let intent = OrderIntent {
            symbol: Symbol::new("BTCUSD"),
            time: "2024-01-01T00:00:00Z".parse().unwrap(),
            side: crate::Side::Buy,
            kind: crate::IntentKind::Entry,
            quantity: 1.5,
            reference_price: 100.0,
            stop_level: Some(95.0),
        };
        write_intents_csv(&path, &[intent]).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("symbol,time,side,kind,quantity,reference_price,stop_level")
        );
        assert!(lines.next().unwrap().starts_with("BTCUSD,2024-01-01T00:00:00Z,Buy,Entry,1.5"));
        fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
