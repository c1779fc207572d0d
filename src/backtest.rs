//! Bracket-order backtesting engine
//!
//! Bar-by-bar simulation of the channel-breakout strategy. A signal
//! evaluated on bar T enters at bar T+1's open; the stop and target are
//! anchored to bar T's close, the price the signal saw. Intrabar exits are
//! pessimistic: when one bar touches both stop and target, the stop is
//! assumed to have filled first.

use chrono::{DateTime, Timelike, Utc};
use tracing::debug;

use crate::risk::{bracket_for, stop_distance, PositionSizer};
use crate::signal::{evaluate_at, Breakout, ChannelSeries, SignalFilters, StrategyParams};
use crate::{Candle, Side, Symbol, Trade};

/// Simulation parameters independent of the strategy
#[derive(Debug, Clone, Copy)]
pub struct BacktestParams {
    pub cash: f64,
    /// Per-side commission rate on traded notional
    pub commission: f64,
    pub risk_per_trade: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        BacktestParams {
            cash: 1_000_000.0,
            commission: 0.0005,
            risk_per_trade: 0.01,
        }
    }
}

/// Entry queued for execution at the next bar's open
#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    side: Side,
    stop: f64,
    target: f64,
    sl_distance: f64,
}

#[derive(Debug, Clone)]
struct OpenPosition {
    side: Side,
    entry_price: f64,
    quantity: f64,
    stop: f64,
    target: f64,
    entry_time: DateTime<Utc>,
}

impl OpenPosition {
    fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.side {
            Side::Buy => (price - self.entry_price) * self.quantity,
            Side::Sell => (self.entry_price - price) * self.quantity,
        }
    }
}

/// Backtest engine
pub struct Backtester {
    symbol: Symbol,
    strategy: StrategyParams,
    filters: SignalFilters,
    params: BacktestParams,
}

impl Backtester {
    pub fn new(
        symbol: Symbol,
        strategy: StrategyParams,
        filters: SignalFilters,
        params: BacktestParams,
    ) -> Self {
        Backtester {
            symbol,
            strategy,
            filters,
            params,
        }
    }

    /// Run the simulation over a candle series
    pub fn run(&self, candles: &[Candle]) -> BacktestReport {
        let series = ChannelSeries::compute(candles, &self.strategy);
        let sizer = PositionSizer::new(self.params.risk_per_trade);

        let mut equity = self.params.cash;
        let mut position: Option<OpenPosition> = None;
        let mut pending: Option<PendingEntry> = None;
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<(DateTime<Utc>, f64)> = Vec::with_capacity(candles.len());

        for (i, candle) in candles.iter().enumerate() {
            // Fill the entry queued on the previous bar at this bar's open
            if let Some(entry) = pending.take() {
                let quantity = sizer.size(equity, candle.open, entry.sl_distance);
                if quantity > 0.0 {
                    debug!(
                        "{} {} ENTRY {} qty={:.4} @ {:.2} sl={:.2} tp={:.2}",
                        candle.datetime.format("%Y-%m-%d %H:%M"),
                        self.symbol,
                        entry.side,
                        quantity,
                        candle.open,
                        entry.stop,
                        entry.target
                    );
                    position = Some(OpenPosition {
                        side: entry.side,
                        entry_price: candle.open,
                        quantity,
                        stop: entry.stop,
                        target: entry.target,
                        entry_time: candle.datetime,
                    });
                }
            }

            // Exit checks, including on the entry bar itself
            let triggered = position.as_ref().and_then(|pos| exit_for_bar(pos, candle));
            if let Some((exit_price, reason)) = triggered {
                if let Some(pos) = position.take() {
                    let trade = self.close_position(&pos, exit_price, candle.datetime, reason);
                    equity += trade.net_pnl;
                    trades.push(trade);
                }
            }

            // Evaluate the signal on this bar only when flat; the entry
            // would execute at the next bar's open
            if position.is_none() && i + 1 < candles.len() {
                let hour = candle.datetime.hour();
                let eval = evaluate_at(candles, &series, i, &self.strategy, &self.filters, Some(hour));
                if let (Some(breakout), Some(atr)) = (eval.breakout, eval.atr) {
                    let side = match breakout {
                        Breakout::Upper => Side::Buy,
                        Breakout::Lower => Side::Sell,
                    };
                    let sl_distance = stop_distance(atr, &self.strategy);
                    let bracket = bracket_for(side, candle.close, sl_distance, &self.strategy);
                    pending = Some(PendingEntry {
                        side,
                        stop: bracket.stop,
                        target: bracket.target,
                        sl_distance,
                    });
                }
            }

            let mark_to_market = equity
                + position
                    .as_ref()
                    .map(|p| p.unrealized_pnl(candle.close))
                    .unwrap_or(0.0);
            equity_curve.push((candle.datetime, mark_to_market));
        }

        // Liquidate whatever is still open at the final close
        if let (Some(pos), Some(last)) = (position.take(), candles.last()) {
            let trade = self.close_position(&pos, last.close, last.datetime, "End of data");
            equity += trade.net_pnl;
            trades.push(trade);
            if let Some(point) = equity_curve.last_mut() {
                point.1 = equity;
            }
        }

        let metrics = self.calculate_metrics(&trades, &equity_curve);

        BacktestReport {
            trades,
            equity_curve,
            metrics,
        }
    }

    fn close_position(
        &self,
        pos: &OpenPosition,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: &str,
    ) -> Trade {
        let pnl = pos.unrealized_pnl(exit_price);
        let commission = pos.quantity * (pos.entry_price + exit_price) * self.params.commission;
        let net_pnl = pnl - commission;

        debug!(
            "{} {} EXIT {} @ {:.2} | {} | PnL={:+.2}",
            exit_time.format("%Y-%m-%d %H:%M"),
            self.symbol,
            pos.side,
            exit_price,
            reason,
            net_pnl
        );

        Trade {
            symbol: self.symbol.clone(),
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price,
            quantity: pos.quantity,
            entry_time: pos.entry_time,
            exit_time,
            pnl,
            commission,
            net_pnl,
            exit_reason: reason.to_string(),
        }
    }

    fn calculate_metrics(
        &self,
        trades: &[Trade],
        equity_curve: &[(DateTime<Utc>, f64)],
    ) -> BacktestMetrics {
        if trades.is_empty() || equity_curve.is_empty() {
            return BacktestMetrics::default();
        }

        let initial = self.params.cash;
        let final_equity = equity_curve.last().map(|p| p.1).unwrap_or(initial);
        let net_profit = final_equity - initial;
        let total_return = net_profit / initial * 100.0;
        let total_commission: f64 = trades.iter().map(|t| t.commission).sum();

        let winners: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl > 0.0).collect();
        let losers: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl <= 0.0).collect();

        let win_rate = winners.len() as f64 / trades.len() as f64 * 100.0;

        let gross_profit: f64 = winners.iter().map(|t| t.net_pnl).sum();
        let gross_loss: f64 = losers.iter().map(|t| t.net_pnl.abs()).sum();

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if winners.is_empty() {
            0.0
        } else {
            gross_profit / winners.len() as f64
        };
        let avg_loss = if losers.is_empty() {
            0.0
        } else {
            gross_loss / losers.len() as f64
        };

        let largest_win = winners.iter().map(|t| t.net_pnl).fold(0.0, f64::max);
        let largest_loss = losers.iter().map(|t| t.net_pnl).fold(0.0, f64::min);

        let mut peak = initial;
        let mut max_drawdown = 0.0;
        for (_, equity) in equity_curve {
            if *equity > peak {
                peak = *equity;
            }
            let dd = (peak - equity) / peak;
            if dd > max_drawdown {
                max_drawdown = dd;
            }
        }

        BacktestMetrics {
            total_trades: trades.len(),
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            win_rate,
            net_profit,
            total_return,
            max_drawdown: max_drawdown * 100.0,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            total_commission,
        }
    }
}

/// First exit the bar triggers, if any. Stop before target; a bar that
/// gaps through a level fills at its open.
fn exit_for_bar(pos: &OpenPosition, candle: &Candle) -> Option<(f64, &'static str)> {
    match pos.side {
        Side::Buy => {
            if candle.open <= pos.stop {
                Some((candle.open, "Stop Loss"))
            } else if candle.low <= pos.stop {
                Some((pos.stop, "Stop Loss"))
            } else if candle.open >= pos.target {
                Some((candle.open, "Take Profit"))
            } else if candle.high >= pos.target {
                Some((pos.target, "Take Profit"))
            } else {
                None
            }
        }
        Side::Sell => {
            if candle.open >= pos.stop {
                Some((candle.open, "Stop Loss"))
            } else if candle.high >= pos.stop {
                Some((pos.stop, "Stop Loss"))
            } else if candle.open <= pos.target {
                Some((candle.open, "Take Profit"))
            } else if candle.low <= pos.target {
                Some((pos.target, "Take Profit"))
            } else {
                None
            }
        }
    }
}

/// Backtest output: the trade list, equity curve and summary metrics
#[derive(Debug, Default)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub metrics: BacktestMetrics,
}

/// Summary statistics over a backtest run
#[derive(Debug, Clone, Default)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub net_profit: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub total_commission: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn strategy() -> StrategyParams {
        StrategyParams {
            ema_period: 3,
            atr_period: 3,
            multiplier: 1.0,
            sl_multiplier: 1.0,
            atr_threshold_pct: 0.0,
            rr: 1.0,
        }
    }

    fn bt_params() -> BacktestParams {
        BacktestParams {
            cash: 10_000.0,
            commission: 0.0,
            risk_per_trade: 0.01,
        }
    }

    fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            datetime: Utc.timestamp_opt(1_700_000_000 + i as i64 * 900, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    /// Ten flat bars then an upward thrust that crosses the upper band.
    /// With the test parameters the signal ATR on the breakout bar is 4.0,
    /// so the bracket is close 109 ± 4.
    fn breakout_prefix() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..10)
            .map(|i| candle(i, 100.0, 100.5, 99.5, 100.0))
            .collect();
        candles.push(candle(10, 100.0, 110.0, 100.0, 109.0));
        candles
    }

    fn backtester() -> Backtester {
        Backtester::new(
            Symbol::new("BTCUSDT"),
            strategy(),
            SignalFilters::default(),
            bt_params(),
        )
    }

    #[test]
    fn entry_executes_at_next_bar_open() {
        let mut candles = breakout_prefix();
        // Target 113, stop 105; this bar reaches the target
        candles.push(candle(11, 109.5, 114.0, 108.0, 113.5));

        let report = backtester().run(&candles);
        assert_eq!(report.trades.len(), 1);

        let trade = &report.trades[0];
        assert_eq!(trade.side, Side::Buy);
        assert_relative_eq!(trade.entry_price, 109.5);
        assert_eq!(trade.entry_time, candles[11].datetime);
        assert_relative_eq!(trade.exit_price, 113.0);
        assert_eq!(trade.exit_reason, "Take Profit");
        assert!(trade.net_pnl > 0.0);
    }

    #[test]
    fn stop_fills_before_target_on_ambiguous_bar() {
        let mut candles = breakout_prefix();
        // One bar touches both 105 and 113: the stop wins
        candles.push(candle(11, 109.5, 114.0, 104.0, 110.0));

        let report = backtester().run(&candles);
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].exit_reason, "Stop Loss");
        assert_relative_eq!(report.trades[0].exit_price, 105.0);
        assert!(report.trades[0].net_pnl < 0.0);
    }

    #[test]
    fn gap_through_stop_fills_at_open() {
        let mut candles = breakout_prefix();
        candles.push(candle(11, 109.5, 110.0, 109.0, 109.8));
        candles.push(candle(12, 102.0, 103.0, 101.0, 102.5));

        let report = backtester().run(&candles);
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].exit_reason, "Stop Loss");
        assert_relative_eq!(report.trades[0].exit_price, 102.0);
    }

    #[test]
    fn open_position_liquidated_at_end_of_data() {
        let mut candles = breakout_prefix();
        // Entry bar that hits neither stop nor target, then data ends
        candles.push(candle(11, 109.5, 110.0, 109.0, 109.8));

        let report = backtester().run(&candles);
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].exit_reason, "End of data");
        assert_relative_eq!(report.trades[0].exit_price, 109.8);
    }

    #[test]
    fn commission_reduces_net_pnl() {
        let mut candles = breakout_prefix();
        candles.push(candle(11, 109.5, 114.0, 108.0, 113.5));

        let mut params = bt_params();
        params.commission = 0.001;
        let bt = Backtester::new(
            Symbol::new("BTCUSDT"),
            strategy(),
            SignalFilters::default(),
            params,
        );
        let report = bt.run(&candles);
        let trade = &report.trades[0];
        let expected_commission = trade.quantity * (trade.entry_price + trade.exit_price) * 0.001;
        assert_relative_eq!(trade.commission, expected_commission, epsilon = 1e-9);
        assert_relative_eq!(trade.net_pnl, trade.pnl - trade.commission, epsilon = 1e-9);
    }

    #[test]
    fn no_trades_on_flat_data() {
        let candles: Vec<Candle> = (0..50)
            .map(|i| candle(i, 100.0, 100.5, 99.5, 100.0))
            .collect();
        let report = backtester().run(&candles);
        assert!(report.trades.is_empty());
        assert_eq!(report.metrics.total_trades, 0);
    }

    #[test]
    fn metrics_count_wins_and_losses() {
        let mut candles = breakout_prefix();
        candles.push(candle(11, 109.5, 114.0, 108.0, 113.5)); // winner

        let report = backtester().run(&candles);
        let m = &report.metrics;
        assert_eq!(m.total_trades, 1);
        assert_eq!(m.winning_trades, 1);
        assert_relative_eq!(m.win_rate, 100.0);
        assert!(m.net_profit > 0.0);
        assert!(m.profit_factor.is_infinite());
    }
}
