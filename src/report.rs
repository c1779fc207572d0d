//! Results post-processing
//!
//! Writes backtest and optimization output under timestamped run folders:
//! `results/single_<ts>/` holds the trade list and an hourly win/loss
//! breakdown, `results/batch_<ts>/` holds the parameter heatmap and its
//! (ema_period, atr_period, multiplier) aggregation. File names carry the
//! headline win rate and trade count so runs can be told apart at a glance.

use anyhow::{Context, Result};
use chrono::Timelike;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::optimizer::OptimizationResult;
use crate::Trade;

/// Create `results_dir/<prefix>_<timestamp>/`
pub fn create_run_dir(results_dir: impl AsRef<Path>, prefix: &str) -> Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let dir = results_dir.as_ref().join(format!("{}_{}", prefix, timestamp));
    std::fs::create_dir_all(&dir).context("Failed to create results directory")?;
    Ok(dir)
}

#[derive(Serialize)]
struct TradeRow<'a> {
    symbol: &'a str,
    side: String,
    entry_time: String,
    exit_time: String,
    entry_price: f64,
    exit_price: f64,
    size: f64,
    pnl: f64,
    commission: f64,
    net_pnl: f64,
    return_pct: f64,
    exit_reason: &'a str,
}

/// Write the trade list, named with win rate and trade count
pub fn write_trades_csv(dir: &Path, trades: &[Trade], win_rate: f64) -> Result<PathBuf> {
    let path = dir.join(format!(
        "trades_win{:.2}_trades{}.csv",
        win_rate,
        trades.len()
    ));
    let mut writer = csv::Writer::from_path(&path).context("Failed to create trades CSV")?;

    for trade in trades {
        writer.serialize(TradeRow {
            symbol: trade.symbol.as_str(),
            side: trade.side.to_string(),
            entry_time: trade.entry_time.to_rfc3339(),
            exit_time: trade.exit_time.to_rfc3339(),
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            size: trade.quantity,
            pnl: trade.pnl,
            commission: trade.commission,
            net_pnl: trade.net_pnl,
            return_pct: trade.return_pct(),
            exit_reason: &trade.exit_reason,
        })?;
    }

    writer.flush()?;
    Ok(path)
}

#[derive(Serialize)]
struct HourlyRow {
    hour: u32,
    wins: usize,
    losses: usize,
    net_wins: i64,
}

/// Win/loss counts bucketed by UTC entry hour
pub fn hourly_stats(trades: &[Trade]) -> Vec<HourlyStat> {
    let mut buckets = vec![(0usize, 0usize); 24];
    for trade in trades {
        let hour = trade.entry_time.hour() as usize;
        if trade.net_pnl > 0.0 {
            buckets[hour].0 += 1;
        } else {
            buckets[hour].1 += 1;
        }
    }

    buckets
        .into_iter()
        .enumerate()
        .map(|(hour, (wins, losses))| HourlyStat {
            hour: hour as u32,
            wins,
            losses,
        })
        .collect()
}

/// Per-hour win/loss tally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlyStat {
    pub hour: u32,
    pub wins: usize,
    pub losses: usize,
}

impl HourlyStat {
    pub fn net_wins(&self) -> i64 {
        self.wins as i64 - self.losses as i64
    }
}

/// Write the hourly win/loss breakdown
pub fn write_hourly_stats_csv(dir: &Path, trades: &[Trade]) -> Result<PathBuf> {
    let path = dir.join("hourly_stats.csv");
    let mut writer = csv::Writer::from_path(&path).context("Failed to create hourly stats CSV")?;

    for stat in hourly_stats(trades) {
        writer.serialize(HourlyRow {
            hour: stat.hour,
            wins: stat.wins,
            losses: stat.losses,
            net_wins: stat.net_wins(),
        })?;
    }

    writer.flush()?;
    Ok(path)
}

#[derive(Serialize)]
struct HeatmapRow {
    ema_period: usize,
    atr_period: usize,
    multiplier: f64,
    sl_multiplier: f64,
    atr_threshold_pct: f64,
    rr: f64,
    win_rate: f64,
    trades: usize,
    total_return: f64,
    max_drawdown: f64,
}

/// Write one heatmap row per evaluated combination
pub fn write_heatmap_csv(dir: &Path, results: &[OptimizationResult]) -> Result<PathBuf> {
    let best = results.first();
    let path = dir.join(format!(
        "heatmap_win{:.2}_trades{}.csv",
        best.map(|r| r.score).unwrap_or(0.0),
        best.map(|r| r.total_trades).unwrap_or(0)
    ));
    let mut writer = csv::Writer::from_path(&path).context("Failed to create heatmap CSV")?;

    for result in results {
        writer.serialize(HeatmapRow {
            ema_period: result.params.ema_period,
            atr_period: result.params.atr_period,
            multiplier: result.params.multiplier,
            sl_multiplier: result.params.sl_multiplier,
            atr_threshold_pct: result.params.atr_threshold_pct,
            rr: result.params.rr,
            win_rate: result.win_rate,
            trades: result.total_trades,
            total_return: result.total_return,
            max_drawdown: result.max_drawdown,
        })?;
    }

    writer.flush()?;
    Ok(path)
}

#[derive(Serialize)]
struct AggregatedRow {
    ema_period: usize,
    atr_period: usize,
    multiplier: f64,
    win_rate: f64,
}

/// Collapse results to the best win rate per (ema_period, atr_period,
/// multiplier) triple, the axes of the original 3-D heatmap cube
pub fn write_aggregated_csv(dir: &Path, results: &[OptimizationResult]) -> Result<PathBuf> {
    use std::collections::BTreeMap;

    // f64 multiplier keyed through its bit pattern; values come straight
    // from the config lists so equality is exact
    let mut best: BTreeMap<(usize, usize, u64), f64> = BTreeMap::new();
    for result in results {
        let key = (
            result.params.ema_period,
            result.params.atr_period,
            result.params.multiplier.to_bits(),
        );
        let entry = best.entry(key).or_insert(f64::NEG_INFINITY);
        if result.score > *entry {
            *entry = result.score;
        }
    }

    let path = dir.join("aggregated.csv");
    let mut writer = csv::Writer::from_path(&path).context("Failed to create aggregated CSV")?;

    for ((ema_period, atr_period, multiplier_bits), win_rate) in best {
        writer.serialize(AggregatedRow {
            ema_period,
            atr_period,
            multiplier: f64::from_bits(multiplier_bits),
            win_rate,
        })?;
    }

    writer.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Side, Symbol, Trade};
    use chrono::{TimeZone, Utc};

    fn trade_at_hour(hour: u32, net_pnl: f64) -> Trade {
        let entry = Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap();
        Trade {
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            entry_price: 100.0,
            exit_price: 101.0,
            quantity: 1.0,
            entry_time: entry,
            exit_time: entry + chrono::Duration::minutes(30),
            pnl: net_pnl,
            commission: 0.0,
            net_pnl,
            exit_reason: "Take Profit".to_string(),
        }
    }

    #[test]
    fn hourly_stats_bucket_by_entry_hour() {
        let trades = vec![
            trade_at_hour(9, 10.0),
            trade_at_hour(9, -5.0),
            trade_at_hour(9, 3.0),
            trade_at_hour(14, -2.0),
        ];
        let stats = hourly_stats(&trades);
        assert_eq!(stats.len(), 24);
        assert_eq!(stats[9].wins, 2);
        assert_eq!(stats[9].losses, 1);
        assert_eq!(stats[9].net_wins(), 1);
        assert_eq!(stats[14].losses, 1);
        assert_eq!(stats[0].wins, 0);
    }
}
