//! EMA/ATR breakout toolkit - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Run the strategy over historical candle CSVs
//! - optimize: Grid-search strategy parameters
//! - live: Run the live/paper trading loop against OKX

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "ema-breakout")]
#[command(about = "EMA/ATR channel-breakout backtesting, optimization and live trading", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the strategy backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/btcusdt_15m.json")]
        config: String,

        /// Candle CSV to load (overrides the config's data_dir convention)
        #[arg(short, long)]
        data: Option<String>,

        /// Initial cash (overrides config)
        #[arg(long)]
        cash: Option<f64>,
    },

    /// Grid-search strategy parameters (grid section of the config)
    Optimize {
        /// Path to configuration file with grid section
        #[arg(short, long, default_value = "configs/btcusdt_15m.json")]
        config: String,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,
    },

    /// Run live trading (sandbox or real per the config)
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/btcusdt_15m.json")]
        config: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // For the optimizer: log only to file, keep the console clean for
        // the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true), // File-only for clean progress bar
        Commands::Live { .. } => ("live", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest { config, data, cash } => commands::backtest::run(config, data, cash),
        Commands::Optimize {
            config,
            top,
            sequential,
        } => commands::optimize::run(config, top, sequential),
        Commands::Live { config } => commands::live::run(config),
    }
}
