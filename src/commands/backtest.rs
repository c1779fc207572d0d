//! Backtest command implementation

use anyhow::{Context, Result};
use tracing::info;

use ema_breakout::backtest::{BacktestParams, Backtester};
use ema_breakout::{data, report, Config, Symbol};

pub fn run(config_path: String, data_path: Option<String>, cash: Option<f64>) -> Result<()> {
    let config = Config::from_file(&config_path)
        .context(format!("Failed to load config from {}", config_path))?;
    info!("Loaded configuration from: {}", config_path);

    let symbol = Symbol::new(config.backtest.symbol.clone());
    let candles = match data_path {
        Some(path) => data::load_csv(&path).context(format!("Failed to load {}", path))?,
        None => data::load_symbol(&config.backtest.data_dir, &symbol, &config.strategy.timeframe)?,
    };

    if candles.is_empty() {
        anyhow::bail!("No candles to backtest");
    }

    let params = BacktestParams {
        cash: cash.unwrap_or(config.backtest.cash),
        commission: config.backtest.commission,
        risk_per_trade: config.backtest.risk_per_trade,
    };

    let strategy = config.strategy_params();
    let filters = config.signal_filters();

    info!(
        "Backtesting {} over {} candles ({} to {})",
        symbol,
        candles.len(),
        candles.first().unwrap().datetime.format("%Y-%m-%d %H:%M"),
        candles.last().unwrap().datetime.format("%Y-%m-%d %H:%M"),
    );

    let backtester = Backtester::new(symbol, strategy, filters, params);
    let result = backtester.run(&candles);
    let m = &result.metrics;

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));
    println!("  Trades:          {}", m.total_trades);
    println!(
        "  Win rate:        {:.2}% ({} W / {} L)",
        m.win_rate, m.winning_trades, m.losing_trades
    );
    println!("  Net profit:      {:+.2}", m.net_profit);
    println!("  Return:          {:+.2}%", m.total_return);
    println!("  Max drawdown:    {:.2}%", m.max_drawdown);
    println!("  Profit factor:   {:.2}", m.profit_factor);
    println!("  Avg win/loss:    {:.2} / {:.2}", m.avg_win, m.avg_loss);
    println!(
        "  Best/worst:      {:+.2} / {:+.2}",
        m.largest_win, m.largest_loss
    );
    println!("  Commission paid: {:.2}", m.total_commission);
    println!("{}\n", "=".repeat(60));

    if !result.trades.is_empty() {
        let run_dir = report::create_run_dir(&config.backtest.results_dir, "single")?;
        let trades_path = report::write_trades_csv(&run_dir, &result.trades, m.win_rate)?;
        let hourly_path = report::write_hourly_stats_csv(&run_dir, &result.trades)?;
        info!("Trades written to {}", trades_path.display());
        info!("Hourly stats written to {}", hourly_path.display());
    }

    Ok(())
}
