//! Data loading for historical OHLCV candles
//!
//! Reads Binance kline export CSVs (12 columns, of which only the first six
//! are used: open_time, open, high, low, close, volume). The `open_time`
//! column is either a millisecond epoch or an already-rendered datetime,
//! depending on which tool produced the file; both are accepted.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

use crate::{Candle, Symbol};

/// Parse the open_time column: 13-digit millisecond epoch or rendered datetime
fn parse_open_time(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if raw.len() == 13 && raw.bytes().all(|b| b.is_ascii_digit()) {
        let millis: i64 = raw.parse().context("Failed to parse epoch millis")?;
        return DateTime::from_timestamp_millis(millis)
            .context(format!("Timestamp out of range: {}", raw));
    }

    if let Ok(dt) = raw.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }

    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        .context(format!("Failed to parse open_time: {}", raw))
}

/// Load OHLCV data from a kline CSV file with validation
///
/// Invalid rows are skipped with a warning. The result is sorted ascending
/// by open time with duplicate timestamps removed.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .context(format!("Failed to open CSV file: {}", path.display()))?;

    let mut candles = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.context(format!("Failed to read row {}", row_idx + 1))?;

        let parsed = (|| -> Result<Candle> {
            let datetime = parse_open_time(record.get(0).context("Missing open_time column")?)?;
            let open: f64 = record
                .get(1)
                .context("Missing open column")?
                .parse()
                .context("Failed to parse open")?;
            let high: f64 = record
                .get(2)
                .context("Missing high column")?
                .parse()
                .context("Failed to parse high")?;
            let low: f64 = record
                .get(3)
                .context("Missing low column")?
                .parse()
                .context("Failed to parse low")?;
            let close: f64 = record
                .get(4)
                .context("Missing close column")?
                .parse()
                .context("Failed to parse close")?;
            let volume: f64 = record
                .get(5)
                .context("Missing volume column")?
                .parse()
                .context("Failed to parse volume")?;

            Candle::new(datetime, open, high, low, close, volume).map_err(Into::into)
        })();

        match parsed {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid candle at row {} in {:?}: {}",
                    row_idx + 2, // +2 for 1-indexed and header row
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid candles out of {} in {:?}",
            invalid_count,
            invalid_count + candles.len(),
            path.file_name().unwrap_or_default()
        );
    }

    candles.sort_by_key(|c| c.datetime);
    candles.dedup_by_key(|c| c.datetime);

    Ok(candles)
}

/// Load the candle file for a symbol/timeframe under the data directory
///
/// Files follow the `{symbol}_{timeframe}.csv` naming convention.
pub fn load_symbol(
    data_dir: impl AsRef<Path>,
    symbol: &Symbol,
    timeframe: &str,
) -> Result<Vec<Candle>> {
    let filename = format!("{}_{}.csv", symbol.as_str(), timeframe);
    let path = data_dir.as_ref().join(&filename);

    if !path.exists() {
        anyhow::bail!("Data file not found: {}", path.display());
    }

    let candles = load_csv(&path).context(format!("Failed to load data for {}", symbol))?;
    info!("Loaded {} candles for {}", candles.len(), symbol);

    if candles.is_empty() {
        anyhow::bail!("No valid candles in {}", path.display());
    }

    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_csv(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_millisecond_epoch_open_time() {
        let dt = parse_open_time("1735689600000").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn parses_rendered_open_time() {
        let dt = parse_open_time("2025-01-01 00:15:00").unwrap();
        assert_eq!(dt.timestamp(), 1735690500);
    }

    #[test]
    fn loads_sorts_and_dedups() {
        let csv = "open_time,open,high,low,close,volume,close_time,quote_volume,count,taker_buy_volume,taker_buy_quote_volume,ignore\n\
            1735690500000,101,102,100,101.5,20,0,0,0,0,0,0\n\
            1735689600000,100,101,99,100.5,10,0,0,0,0,0,0\n\
            1735689600000,100,101,99,100.5,10,0,0,0,0,0,0\n";
        let path = write_temp_csv("ema_breakout_load_test.csv", csv);
        let candles = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(candles.len(), 2);
        assert!(candles[0].datetime < candles[1].datetime);
    }

    #[test]
    fn skips_invalid_rows() {
        // Second row has high < low
        let csv = "open_time,open,high,low,close,volume\n\
            1735689600000,100,101,99,100.5,10\n\
            1735690500000,101,99,102,101.5,20\n";
        let path = write_temp_csv("ema_breakout_invalid_test.csv", csv);
        let candles = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(candles.len(), 1);
    }
}
