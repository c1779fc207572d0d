//! Optimize command implementation

use anyhow::{Context, Result};
use tracing::info;

use ema_breakout::backtest::BacktestParams;
use ema_breakout::optimizer::{Optimizer, ParamGrid};
use ema_breakout::{data, report, Config, Symbol};

pub fn run(config_path: String, top: usize, sequential: bool) -> Result<()> {
    let config = Config::from_file(&config_path)
        .context(format!("Failed to load config from {}", config_path))?;
    info!("Loaded configuration from: {}", config_path);

    let grid_config = config
        .grid
        .as_ref()
        .context("Config has no 'grid' section; nothing to optimize")?;
    let grid = ParamGrid::from(grid_config);

    let symbol = Symbol::new(config.backtest.symbol.clone());
    let candles = data::load_symbol(&config.backtest.data_dir, &symbol, &config.strategy.timeframe)?;

    let total = grid.total_combinations();
    let evaluated = grid.combinations().len();

    println!("\n{}", "=".repeat(60));
    println!("OPTIMIZATION SUMMARY");
    println!("{}", "=".repeat(60));
    println!("  Symbol:       {}", symbol);
    println!("  Timeframe:    {}", config.strategy.timeframe);
    println!("  Candles:      {}", candles.len());
    println!("  Full grid:    {} combinations", total);
    if evaluated < total {
        println!("  Evaluating:   {} (max_tries cap)", evaluated);
    }
    println!(
        "  Mode:         {}",
        if sequential { "sequential" } else { "parallel" }
    );
    println!("{}\n", "=".repeat(60));

    let backtest_params = BacktestParams {
        cash: config.backtest.cash,
        commission: config.backtest.commission,
        risk_per_trade: config.backtest.risk_per_trade,
    };

    let optimizer = Optimizer::new(symbol, config.signal_filters(), backtest_params);
    let results = if sequential {
        optimizer.optimize_sequential(&candles, &grid)
    } else {
        optimizer.optimize(&candles, &grid)
    };

    if results.is_empty() {
        info!("No results produced");
        return Ok(());
    }

    let display_count = top.min(results.len());
    println!("\n{}", "=".repeat(100));
    println!("TOP {} RESULTS (by win rate; zero-trade runs score 0)", display_count);
    println!("{}", "=".repeat(100));
    println!(
        "{:<4} {:>8} {:>7} {:>9} {:>8} | {:>4} {:>4} {:>5} {:>5} {:>7} {:>4}",
        "Rank", "WinRate%", "Trades", "Return%", "MaxDD%", "EMA", "ATR", "Mult", "SLx", "ATR%", "RR"
    );
    println!("{}", "-".repeat(100));

    for (i, r) in results.iter().take(display_count).enumerate() {
        println!(
            "{:<4} {:>8.2} {:>7} {:>9.2} {:>8.2} | {:>4} {:>4} {:>5.1} {:>5.1} {:>7.5} {:>4.1}",
            i + 1,
            r.win_rate,
            r.total_trades,
            r.total_return,
            r.max_drawdown,
            r.params.ema_period,
            r.params.atr_period,
            r.params.multiplier,
            r.params.sl_multiplier,
            r.params.atr_threshold_pct,
            r.params.rr,
        );
    }
    println!("{}", "=".repeat(100));

    let run_dir = report::create_run_dir(&config.backtest.results_dir, "batch")?;
    let heatmap_path = report::write_heatmap_csv(&run_dir, &results)?;
    let aggregated_path = report::write_aggregated_csv(&run_dir, &results)?;
    info!("Heatmap written to {}", heatmap_path.display());
    info!("Aggregated heatmap written to {}", aggregated_path.display());

    Ok(())
}
