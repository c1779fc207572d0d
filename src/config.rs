//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files. API credentials
//! are never stored in the file; the live command reads them from the
//! environment (see [`crate::okx::Credentials`]).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::signal::{SignalFilters, StrategyParams};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Grid search parameter lists for the optimize command (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridConfig>,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.trading.symbols.is_empty() {
            anyhow::bail!("At least one symbol is required in the 'trading' section");
        }
        for sym in &self.trading.symbols {
            if sym.contract_size <= 0.0 {
                anyhow::bail!("contract_size must be positive for {}", sym.instrument);
            }
            if sym.leverage == 0 {
                anyhow::bail!("leverage must be >= 1 for {}", sym.instrument);
            }
        }
        for window in &self.strategy.forbidden_hours {
            if window[0] > 23 || window[1] > 23 {
                anyhow::bail!("forbidden_hours entries must use hours 0-23");
            }
        }
        Ok(())
    }

    /// Strategy parameters for the signal function
    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            ema_period: self.strategy.ema_period,
            atr_period: self.strategy.atr_period,
            multiplier: self.strategy.multiplier,
            sl_multiplier: self.strategy.sl_multiplier,
            atr_threshold_pct: self.strategy.atr_threshold_pct,
            rr: self.strategy.rr,
        }
    }

    /// Entry filters for the signal function
    pub fn signal_filters(&self) -> SignalFilters {
        SignalFilters {
            volume_filter: self.strategy.volume_filter,
            forbidden_hours: self
                .strategy
                .forbidden_hours
                .iter()
                .map(|w| (w[0], w[1]))
                .collect(),
        }
    }
}

/// Exchange client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Use OKX simulated trading (demo account credentials)
    pub sandbox: bool,
    pub rate_limit: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            sandbox: true,
            rate_limit: 10,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

/// One tradeable instrument with its contract parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// OKX instrument id, e.g. "BTC-USDT-SWAP"
    pub instrument: String,
    /// Contracts per base-currency unit (100 for BTC-USDT-SWAP: 1 contract = 0.01 BTC)
    pub contract_size: f64,
    pub leverage: u32,
}

/// Live trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbols: Vec<SymbolConfig>,
    /// USDT risked per trade; contract count is derived from the stop distance
    pub risk_usdt: f64,
    #[serde(default)]
    pub tp_mode: TpMode,
}

/// Take-profit placement mode for live trading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TpMode {
    /// Conditional limit order at the target price
    #[default]
    Limit,
    /// Trailing stop activated at the target price
    Trailing,
}

/// Strategy parameters as they appear in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub timeframe: String,
    pub ema_period: usize,
    pub atr_period: usize,
    pub multiplier: f64,
    pub sl_multiplier: f64,
    #[serde(default)]
    pub atr_threshold_pct: f64,
    pub rr: f64,
    /// Require matching candle colors and rising volume before entering
    #[serde(default)]
    pub volume_filter: bool,
    /// UTC hour windows (inclusive, may wrap midnight) in which no entries are taken
    #[serde(default)]
    pub forbidden_hours: Vec<[u32; 2]>,
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub symbol: String,
    pub data_dir: String,
    pub results_dir: String,
    pub cash: f64,
    pub commission: f64,
    /// Fraction of equity risked per trade
    pub risk_per_trade: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            symbol: "BTCUSDT".to_string(),
            data_dir: "data".to_string(),
            results_dir: "results".to_string(),
            cash: 1_000_000.0,
            commission: 0.0005,
            risk_per_trade: 0.01,
        }
    }
}

/// Grid search parameter lists, one entry per strategy parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub ema_period: Vec<usize>,
    pub atr_period: Vec<usize>,
    pub multiplier: Vec<f64>,
    pub sl_multiplier: Vec<f64>,
    #[serde(default = "default_zero_grid")]
    pub atr_threshold_pct: Vec<f64>,
    pub rr: Vec<f64>,
    /// Cap on evaluated combinations; the full grid is strided down to fit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tries: Option<usize>,
}

fn default_zero_grid() -> Vec<f64> {
    vec![0.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "trading": {
            "symbols": [
                {"instrument": "BTC-USDT-SWAP", "contract_size": 100.0, "leverage": 15}
            ],
            "risk_usdt": 2.5,
            "tp_mode": "limit"
        },
        "strategy": {
            "timeframe": "15m",
            "ema_period": 25,
            "atr_period": 24,
            "multiplier": 3.0,
            "sl_multiplier": 2.0,
            "rr": 2.0,
            "volume_filter": true,
            "forbidden_hours": [[23, 1], [8, 10]]
        }
    }"#;

    #[test]
    fn parses_sample_config() {
        let config: Config = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.trading.symbols[0].instrument, "BTC-USDT-SWAP");
        assert_eq!(config.trading.tp_mode, TpMode::Limit);
        assert!(config.exchange.sandbox);
        assert_eq!(config.backtest.symbol, "BTCUSDT");

        let filters = config.signal_filters();
        assert!(filters.volume_filter);
        assert_eq!(filters.forbidden_hours, vec![(23, 1), (8, 10)]);
    }

    #[test]
    fn rejects_out_of_range_forbidden_hours() {
        let mut config: Config = serde_json::from_str(SAMPLE).unwrap();
        config.strategy.forbidden_hours.push([25, 3]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_leverage() {
        let mut config: Config = serde_json::from_str(SAMPLE).unwrap();
        config.trading.symbols[0].leverage = 0;
        assert!(config.validate().is_err());
    }
}
