//! Parameter optimization framework
//!
//! Grid search over the six strategy parameters with parallel execution
//! using Rayon. The objective is win rate; runs that never trade score
//! zero. When the full cartesian grid exceeds `max_tries`, combinations
//! are sampled at a deterministic stride so repeated runs of the same
//! config stay reproducible.

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use itertools::iproduct;
use rayon::prelude::*;

use crate::backtest::{BacktestParams, Backtester};
use crate::config::GridConfig;
use crate::signal::{SignalFilters, StrategyParams};
use crate::{Candle, Symbol};

/// Parameter lists for the grid search
#[derive(Debug, Clone)]
pub struct ParamGrid {
    pub ema_periods: Vec<usize>,
    pub atr_periods: Vec<usize>,
    pub multipliers: Vec<f64>,
    pub sl_multipliers: Vec<f64>,
    pub atr_threshold_pcts: Vec<f64>,
    pub rrs: Vec<f64>,
    pub max_tries: Option<usize>,
}

impl From<&GridConfig> for ParamGrid {
    fn from(grid: &GridConfig) -> Self {
        ParamGrid {
            ema_periods: grid.ema_period.clone(),
            atr_periods: grid.atr_period.clone(),
            multipliers: grid.multiplier.clone(),
            sl_multipliers: grid.sl_multiplier.clone(),
            atr_threshold_pcts: grid.atr_threshold_pct.clone(),
            rrs: grid.rr.clone(),
            max_tries: grid.max_tries,
        }
    }
}

impl ParamGrid {
    /// Size of the full cartesian product
    pub fn total_combinations(&self) -> usize {
        self.ema_periods.len()
            * self.atr_periods.len()
            * self.multipliers.len()
            * self.sl_multipliers.len()
            * self.atr_threshold_pcts.len()
            * self.rrs.len()
    }

    /// Materialize the parameter combinations to evaluate
    ///
    /// With `max_tries` set below the full grid size, every k-th
    /// combination is taken so the sample spans the whole grid.
    pub fn combinations(&self) -> Vec<StrategyParams> {
        let all: Vec<StrategyParams> = iproduct!(
            &self.ema_periods,
            &self.atr_periods,
            &self.multipliers,
            &self.sl_multipliers,
            &self.atr_threshold_pcts,
            &self.rrs
        )
        .map(
            |(&ema_period, &atr_period, &multiplier, &sl_multiplier, &atr_threshold_pct, &rr)| {
                StrategyParams {
                    ema_period,
                    atr_period,
                    multiplier,
                    sl_multiplier,
                    atr_threshold_pct,
                    rr,
                }
            },
        )
        .collect();

        match self.max_tries {
            Some(cap) if cap > 0 && cap < all.len() => {
                let stride = all.len().div_ceil(cap);
                all.into_iter().step_by(stride).collect()
            }
            _ => all,
        }
    }
}

/// One evaluated parameter combination
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub params: StrategyParams,
    pub win_rate: f64,
    pub total_trades: usize,
    pub net_profit: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub score: f64,
}

/// Objective: win rate, zeroed for degenerate runs
///
/// A combination that never trades, or whose win rate is not finite,
/// must not outrank a real result.
pub fn score(win_rate: f64, total_trades: usize) -> f64 {
    if total_trades == 0 || !win_rate.is_finite() {
        0.0
    } else {
        win_rate
    }
}

/// Grid-search optimizer for a single symbol's candle history
pub struct Optimizer {
    symbol: Symbol,
    filters: SignalFilters,
    backtest: BacktestParams,
}

impl Optimizer {
    pub fn new(symbol: Symbol, filters: SignalFilters, backtest: BacktestParams) -> Self {
        Optimizer {
            symbol,
            filters,
            backtest,
        }
    }

    /// Run every grid combination in parallel, sorted best-first
    pub fn optimize(&self, candles: &[Candle], grid: &ParamGrid) -> Vec<OptimizationResult> {
        let combos = grid.combinations();

        let pb = ProgressBar::new(combos.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec}]")
                .unwrap()
                .progress_chars("█░ "),
        );

        let mut results: Vec<OptimizationResult> = combos
            .par_iter()
            .progress_with(pb)
            .map(|params| self.evaluate(candles, params))
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        results
    }

    /// Sequential variant for debugging
    pub fn optimize_sequential(&self, candles: &[Candle], grid: &ParamGrid) -> Vec<OptimizationResult> {
        let mut results: Vec<OptimizationResult> = grid
            .combinations()
            .iter()
            .map(|params| self.evaluate(candles, params))
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        results
    }

    fn evaluate(&self, candles: &[Candle], params: &StrategyParams) -> OptimizationResult {
        let backtester = Backtester::new(
            self.symbol.clone(),
            *params,
            self.filters.clone(),
            self.backtest,
        );
        let report = backtester.run(candles);
        let m = &report.metrics;

        OptimizationResult {
            params: *params,
            win_rate: m.win_rate,
            total_trades: m.total_trades,
            net_profit: m.net_profit,
            total_return: m.total_return,
            max_drawdown: m.max_drawdown,
            score: score(m.win_rate, m.total_trades),
        }
    }
}
