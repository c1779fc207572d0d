//! EMA/ATR channel-breakout signal
//!
//! The one decision function shared by the backtester and the live loop:
//! price crossing out of the EMA ± multiplier·ATR channel between the two
//! most recent closed candles, gated by a volatility filter, an optional
//! volume filter, and optional forbidden-hour windows.

use serde::{Deserialize, Serialize};

use crate::indicators::{atr, ema};
use crate::schedule::is_trading_allowed;
use crate::Candle;

/// Strategy parameters for the breakout signal and its bracket exits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub ema_period: usize,
    pub atr_period: usize,
    /// Channel half-width in ATRs
    pub multiplier: f64,
    /// Stop distance in ATRs
    pub sl_multiplier: f64,
    /// Minimum ATR as a fraction of price; 0 disables the filter
    pub atr_threshold_pct: f64,
    /// Take-profit distance as a multiple of the stop distance
    pub rr: f64,
}

impl StrategyParams {
    /// Bars needed before the signal can fire: full indicator warmup plus
    /// the prior closed candle the breakout test compares against.
    pub fn min_bars(&self) -> usize {
        self.ema_period.max(self.atr_period) + 1
    }
}

/// Entry filters applied on top of the channel cross
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalFilters {
    /// Require the last two candles to share direction with rising volume
    pub volume_filter: bool,
    /// UTC hour windows (inclusive, may wrap midnight) with no entries
    pub forbidden_hours: Vec<(u32, u32)>,
}

/// Which side of the channel was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breakout {
    Upper,
    Lower,
}

/// Signal evaluation result: the breakout (if any) and the ATR it was
/// computed from. The ATR is reported even without a breakout so callers
/// can log volatility; it is `None` only when the indicators have not
/// warmed up or an hour filter blocked evaluation entirely.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation {
    pub breakout: Option<Breakout>,
    pub atr: Option<f64>,
}

impl Evaluation {
    fn none() -> Self {
        Evaluation {
            breakout: None,
            atr: None,
        }
    }

    fn skip(atr: f64) -> Self {
        Evaluation {
            breakout: None,
            atr: Some(atr),
        }
    }
}

/// Precomputed EMA/ATR channel over a candle series
///
/// Computed once per series so that grid search over thousands of bars does
/// not recompute the indicators at every bar.
#[derive(Debug)]
pub struct ChannelSeries {
    pub atr: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

impl ChannelSeries {
    pub fn compute(candles: &[Candle], params: &StrategyParams) -> Self {
        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let ema_vals = ema(&close, params.ema_period);
        let atr_vals = atr(&high, &low, &close, params.atr_period);

        let mut upper = Vec::with_capacity(candles.len());
        let mut lower = Vec::with_capacity(candles.len());
        for i in 0..candles.len() {
            match (ema_vals.get(i).copied().flatten(), atr_vals.get(i).copied().flatten()) {
                (Some(e), Some(a)) => {
                    upper.push(Some(e + params.multiplier * a));
                    lower.push(Some(e - params.multiplier * a));
                }
                _ => {
                    upper.push(None);
                    lower.push(None);
                }
            }
        }

        ChannelSeries {
            atr: atr_vals,
            upper,
            lower,
        }
    }
}

/// Evaluate the breakout signal at `idx`, the last closed candle.
///
/// The candle at `idx - 1` must have closed inside the channel and the
/// candle at `idx` outside it; a close that was already beyond the band on
/// both candles is a continuation, not a breakout.
///
/// `utc_hour` is the hour the entry would be taken in; `None` disables the
/// hour filter (the caller has no wall clock, e.g. unit tests).
pub fn evaluate_at(
    candles: &[Candle],
    series: &ChannelSeries,
    idx: usize,
    params: &StrategyParams,
    filters: &SignalFilters,
    utc_hour: Option<u32>,
) -> Evaluation {
    if let Some(hour) = utc_hour {
        if !is_trading_allowed(hour, &filters.forbidden_hours) {
            return Evaluation::none();
        }
    }

    if idx == 0 || idx >= candles.len() || idx + 1 < params.min_bars() {
        return Evaluation::none();
    }

    let (Some(atr_value), Some(last_upper), Some(last_lower), Some(prev_upper), Some(prev_lower)) = (
        series.atr[idx],
        series.upper[idx],
        series.lower[idx],
        series.upper[idx - 1],
        series.lower[idx - 1],
    ) else {
        return Evaluation::none();
    };

    let last = &candles[idx];
    let prev = &candles[idx - 1];

    // Volatility filter: ATR as a fraction of the last close
    if atr_value / last.close < params.atr_threshold_pct {
        return Evaluation::skip(atr_value);
    }

    if filters.volume_filter {
        // Two candles of the same color with expanding volume
        if last.is_bullish() != prev.is_bullish() || last.volume <= prev.volume {
            return Evaluation::skip(atr_value);
        }
    }

    let upper_breakout = prev.close <= prev_upper && last.close > last_upper;
    let lower_breakout = prev.close >= prev_lower && last.close < last_lower;

    let breakout = if upper_breakout {
        Some(Breakout::Upper)
    } else if lower_breakout {
        Some(Breakout::Lower)
    } else {
        None
    };

    Evaluation {
        breakout,
        atr: Some(atr_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn params() -> StrategyParams {
        StrategyParams {
            ema_period: 3,
            atr_period: 3,
            multiplier: 1.0,
            sl_multiplier: 2.0,
            atr_threshold_pct: 0.0,
            rr: 2.0,
        }
    }

    fn candle(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            datetime: Utc.timestamp_opt(1_700_000_000 + i as i64 * 900, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Flat series with a sharp upward thrust on the final candle
    fn upper_breakout_candles() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..10)
            .map(|i| candle(i, 100.0, 100.5, 99.5, 100.0, 1000.0))
            .collect();
        candles.push(candle(10, 100.0, 110.0, 100.0, 109.0, 2000.0));
        candles
    }

    #[test]
    fn detects_upper_breakout_on_last_closed_candle() {
        let candles = upper_breakout_candles();
        let p = params();
        let series = ChannelSeries::compute(&candles, &p);
        let eval = evaluate_at(
            &candles,
            &series,
            candles.len() - 1,
            &p,
            &SignalFilters::default(),
            None,
        );
        assert_eq!(eval.breakout, Some(Breakout::Upper));
        assert!(eval.atr.is_some());
    }

    #[test]
    fn no_breakout_inside_channel() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| candle(i, 100.0, 100.5, 99.5, 100.0, 1000.0))
            .collect();
        let p = params();
        let series = ChannelSeries::compute(&candles, &p);
        let eval = evaluate_at(
            &candles,
            &series,
            candles.len() - 1,
            &p,
            &SignalFilters::default(),
            None,
        );
        assert_eq!(eval.breakout, None);
        assert!(eval.atr.is_some());
    }

    #[test]
    fn continuation_outside_channel_is_not_a_breakout() {
        // Two consecutive closes above the band: the cross already happened
        let mut candles = upper_breakout_candles();
        candles.push(candle(11, 109.0, 112.0, 108.0, 111.0, 2500.0));
        let p = params();
        let series = ChannelSeries::compute(&candles, &p);
        let eval = evaluate_at(
            &candles,
            &series,
            candles.len() - 1,
            &p,
            &SignalFilters::default(),
            None,
        );
        assert_eq!(eval.breakout, None);
    }

    #[test]
    fn detects_lower_breakout() {
        let mut candles: Vec<Candle> = (0..10)
            .map(|i| candle(i, 100.0, 100.5, 99.5, 100.0, 1000.0))
            .collect();
        candles.push(candle(10, 100.0, 100.0, 90.0, 91.0, 2000.0));
        let p = params();
        let series = ChannelSeries::compute(&candles, &p);
        let eval = evaluate_at(
            &candles,
            &series,
            candles.len() - 1,
            &p,
            &SignalFilters::default(),
            None,
        );
        assert_eq!(eval.breakout, Some(Breakout::Lower));
    }

    #[test]
    fn atr_threshold_filters_quiet_markets() {
        let candles = upper_breakout_candles();
        let mut p = params();
        p.atr_threshold_pct = 0.5; // ATR would have to be half the price
        let series = ChannelSeries::compute(&candles, &p);
        let eval = evaluate_at(
            &candles,
            &series,
            candles.len() - 1,
            &p,
            &SignalFilters::default(),
            None,
        );
        assert_eq!(eval.breakout, None);
        assert!(eval.atr.is_some());
    }

    #[test]
    fn volume_filter_requires_rising_volume() {
        let mut candles = upper_breakout_candles();
        // Breakout candle with less volume than its predecessor
        candles.last_mut().unwrap().volume = 500.0;
        let p = params();
        let filters = SignalFilters {
            volume_filter: true,
            forbidden_hours: vec![],
        };
        let series = ChannelSeries::compute(&candles, &p);
        let eval = evaluate_at(&candles, &series, candles.len() - 1, &p, &filters, None);
        assert_eq!(eval.breakout, None);
    }

    #[test]
    fn volume_filter_requires_matching_colors() {
        let mut candles = upper_breakout_candles();
        // Make the prior candle bearish while the breakout candle is bullish
        let n = candles.len();
        candles[n - 2].open = 100.4;
        candles[n - 2].close = 99.8;
        let p = params();
        let filters = SignalFilters {
            volume_filter: true,
            forbidden_hours: vec![],
        };
        let series = ChannelSeries::compute(&candles, &p);
        let eval = evaluate_at(&candles, &series, n - 1, &p, &filters, None);
        assert_eq!(eval.breakout, None);
    }

    #[test]
    fn forbidden_hours_block_evaluation() {
        let candles = upper_breakout_candles();
        let p = params();
        let filters = SignalFilters {
            volume_filter: false,
            forbidden_hours: vec![(8, 10)],
        };
        let series = ChannelSeries::compute(&candles, &p);
        let eval = evaluate_at(&candles, &series, candles.len() - 1, &p, &filters, Some(9));
        assert_eq!(eval.breakout, None);
        assert!(eval.atr.is_none());

        let eval = evaluate_at(&candles, &series, candles.len() - 1, &p, &filters, Some(11));
        assert_eq!(eval.breakout, Some(Breakout::Upper));
    }

    #[test]
    fn insufficient_history_yields_nothing() {
        let candles: Vec<Candle> = (0..3)
            .map(|i| candle(i, 100.0, 100.5, 99.5, 100.0, 1000.0))
            .collect();
        let p = params();
        let series = ChannelSeries::compute(&candles, &p);
        let eval = evaluate_at(
            &candles,
            &series,
            candles.len() - 1,
            &p,
            &SignalFilters::default(),
            None,
        );
        assert_eq!(eval.breakout, None);
        assert!(eval.atr.is_none());
    }
}
