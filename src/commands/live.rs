//! Live trading command
//!
//! Polls OKX on candle-interval boundaries, evaluates the breakout signal
//! on the last closed candles, and places a market entry protected by a
//! stop-loss and a take-profit (limit or trailing) algo order. Runs against
//! the demo account when `exchange.sandbox` is set, against real money
//! otherwise.

use anyhow::{Context, Result};
use chrono::{Timelike, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use ema_breakout::config::{Config, SymbolConfig, TpMode};
use ema_breakout::okx::{AlgoOrderRequest, ClientConfig, Credentials, OkxClient};
use ema_breakout::risk;
use ema_breakout::schedule;
use ema_breakout::signal::{self, Breakout, ChannelSeries, SignalFilters, StrategyParams};
use ema_breakout::{Candle, Side};

/// Candles fetched per signal evaluation
const CANDLE_FETCH_LIMIT: u32 = 100;

/// Network-level OHLCV fetch retries
const OHLCV_FETCH_RETRIES: u32 = 10;
const OHLCV_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Retries waiting for the exchange to publish the boundary candle
const KLINE_SYNC_RETRIES: u32 = 100;
const KLINE_SYNC_DELAY: Duration = Duration::from_secs(2);

/// Retries polling a market order for its fill
const FILL_POLL_RETRIES: u32 = 5;
const FILL_POLL_DELAY: Duration = Duration::from_secs(1);

/// Extra seconds past the boundary before polling, so the candle exists
const BOUNDARY_GRACE_SECS: u64 = 2;

struct LiveTrader {
    config: Config,
    client: OkxClient,
    params: StrategyParams,
    filters: SignalFilters,
    interval_secs: u64,
    sandbox: bool,
}

impl LiveTrader {
    fn new(config: Config) -> Result<Self> {
        let sandbox = config.exchange.sandbox;
        let credentials = Credentials::from_env(sandbox)
            .context("Failed to load OKX credentials from environment")?;

        let client_config = ClientConfig::default()
            .with_max_retries(config.exchange.max_retries)
            .with_rate_limit(config.exchange.rate_limit as usize)
            .with_timeout(Duration::from_secs(config.exchange.timeout_secs));
        let client = OkxClient::with_config(credentials, sandbox, client_config);

        let interval_secs = schedule::parse_interval(&config.strategy.timeframe)
            .context("Invalid strategy timeframe")?;

        let params = config.strategy_params();
        let filters = config.signal_filters();

        Ok(LiveTrader {
            config,
            client,
            params,
            filters,
            interval_secs,
            sandbox,
        })
    }

    /// Verify connectivity and set leverage on every instrument
    async fn startup(&self) -> Result<()> {
        match self.client.get_usdt_balance().await {
            Ok(balance) => info!("API connection OK, USDT balance: {:.2}", balance),
            Err(e) => error!("Balance check failed: {}", e),
        }

        for sym in &self.config.trading.symbols {
            if self.sandbox {
                self.client
                    .set_leverage(&sym.instrument, sym.leverage, None)
                    .await?;
                info!(
                    "Leverage set to {}x for {} (sandbox)",
                    sym.leverage, sym.instrument
                );
            } else {
                // Real accounts in long/short mode take one call per side
                self.client
                    .set_leverage(&sym.instrument, sym.leverage, Some("long"))
                    .await?;
                self.client
                    .set_leverage(&sym.instrument, sym.leverage, Some("short"))
                    .await?;
                info!(
                    "Leverage set to {}x for {} (long and short)",
                    sym.leverage, sym.instrument
                );
            }
        }

        Ok(())
    }

    /// Fetch candles, retrying until the last two closed candles carry the
    /// expected boundary timestamps
    async fn fetch_verified_candles(&self, inst_id: &str) -> Result<Vec<Candle>> {
        for attempt in 0..KLINE_SYNC_RETRIES {
            let candles = self.fetch_candles_with_retry(inst_id).await?;

            if candles.len() < 3 {
                anyhow::bail!("Exchange returned only {} candles", candles.len());
            }

            let (expected_prev, expected_last) =
                schedule::expected_closed_timestamps(Utc::now(), self.interval_secs);
            let last_ts = candles[candles.len() - 2].datetime.timestamp();
            let prev_ts = candles[candles.len() - 3].datetime.timestamp();

            if last_ts == expected_last && prev_ts == expected_prev {
                for c in &candles[candles.len() - 3..candles.len() - 1] {
                    info!(
                        "Closed candle {} vol={:.2}",
                        c.datetime.format("%Y-%m-%d %H:%M"),
                        c.volume
                    );
                }
                return Ok(candles);
            }

            warn!(
                "Candle timestamps stale (attempt {}/{}): expected {} and {}, got {} and {}",
                attempt + 1,
                KLINE_SYNC_RETRIES,
                expected_prev,
                expected_last,
                prev_ts,
                last_ts
            );
            sleep(KLINE_SYNC_DELAY).await;
        }

        anyhow::bail!("Gave up waiting for fresh candles on {}", inst_id)
    }

    async fn fetch_candles_with_retry(&self, inst_id: &str) -> Result<Vec<Candle>> {
        let mut last_error = None;
        for attempt in 0..OHLCV_FETCH_RETRIES {
            match self
                .client
                .get_candles(inst_id, &self.config.strategy.timeframe, CANDLE_FETCH_LIMIT)
                .await
            {
                Ok(candles) => return Ok(candles),
                Err(e) => {
                    warn!(
                        "OHLCV fetch failed (attempt {}/{}): {}",
                        attempt + 1,
                        OHLCV_FETCH_RETRIES,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 < OHLCV_FETCH_RETRIES {
                        sleep(OHLCV_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("OHLCV fetch failed")))
    }

    /// One evaluation for one instrument
    async fn run_symbol_cycle(&self, sym: &SymbolConfig) -> Result<()> {
        let inst = &sym.instrument;
        let hour = Utc::now().hour();

        if !schedule::is_trading_allowed(hour, &self.filters.forbidden_hours) {
            info!("{}: trading forbidden at {:02}:00 UTC", inst, hour);
            return Ok(());
        }

        if self.client.has_open_position(inst).await? {
            info!("{}: position already open, skipping entry signal", inst);
            return Ok(());
        }

        let candles = self.fetch_verified_candles(inst).await?;
        let series = ChannelSeries::compute(&candles, &self.params);
        let idx = candles.len() - 2; // last closed candle
        let eval = signal::evaluate_at(&candles, &series, idx, &self.params, &self.filters, Some(hour));

        let Some(breakout) = eval.breakout else {
            info!("{}: no signal (ATR {:?})", inst, eval.atr);
            return Ok(());
        };
        let atr = eval
            .atr
            .context("Signal fired without an ATR value")?;

        let side = match breakout {
            Breakout::Upper => Side::Buy,
            Breakout::Lower => Side::Sell,
        };
        info!("{}: {:?} breakout -> {} entry, ATR={:.4}", inst, breakout, side, atr);

        // Clear any stale working orders before entering
        let pending = self.client.get_pending_orders(inst).await?;
        if !pending.is_empty() {
            let ids: Vec<String> = pending.into_iter().map(|o| o.ord_id).collect();
            self.client.cancel_orders(inst, &ids).await?;
            info!("{}: canceled {} pending orders", inst, ids.len());
        }

        let sl_distance = risk::stop_distance(atr, &self.params);
        let size = risk::contracts(self.config.trading.risk_usdt, sym.contract_size, sl_distance);
        if size <= 0.0 {
            warn!("{}: computed size is zero, skipping entry", inst);
            return Ok(());
        }
        info!("{}: sizing {:.2} contracts (stop distance {:.4})", inst, size, sl_distance);

        let pos_side = (!self.sandbox).then(|| side.as_pos_side());
        let ord_id = self
            .client
            .place_market_order(inst, side, size, pos_side)
            .await?;
        info!("{}: market {} order submitted, id {}", inst, side, ord_id);

        let Some((entry_price, filled_size)) = self.await_fill(inst, &ord_id).await? else {
            error!("{}: could not confirm fill for {}, skipping bracket", inst, ord_id);
            return Ok(());
        };
        info!("{}: filled {:.2} contracts @ {:.2}", inst, filled_size, entry_price);

        let margin = risk::margin(filled_size, sym.contract_size, entry_price, sym.leverage);
        info!("{}: margin in use {:.2} USDT", inst, margin);

        let bracket = risk::bracket_for(side, entry_price, sl_distance, &self.params);
        info!(
            "{}: stop {:.2}, target {:.2}",
            inst, bracket.stop, bracket.target
        );
        self.place_bracket(sym, side, entry_price, filled_size, bracket)
            .await?;

        Ok(())
    }

    /// Poll an order until it is filled; `None` when it never confirms
    async fn await_fill(&self, inst_id: &str, ord_id: &str) -> Result<Option<(f64, f64)>> {
        for _ in 0..FILL_POLL_RETRIES {
            sleep(FILL_POLL_DELAY).await;
            let detail = self.client.get_order(inst_id, ord_id).await?;
            if detail.is_filled() {
                if let Some(avg_px) = detail.average_price() {
                    let filled = detail.filled_size();
                    if filled > 0.0 {
                        return Ok(Some((avg_px, filled)));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Place the protective stop and the configured take-profit order
    async fn place_bracket(
        &self,
        sym: &SymbolConfig,
        side: Side,
        entry_price: f64,
        size: f64,
        bracket: risk::Bracket,
    ) -> Result<()> {
        let inst = &sym.instrument;
        let exit_side = side.opposite();
        let pos_side = (!self.sandbox).then(|| side.as_pos_side());

        let sl_req = AlgoOrderRequest::stop_loss(
            inst,
            exit_side.as_order_side(),
            size,
            bracket.stop,
            pos_side,
        );
        let sl_id = self.client.place_algo_order(&sl_req).await?;
        info!("{}: stop-loss placed, algo id {}", inst, sl_id);

        match self.config.trading.tp_mode {
            TpMode::Limit => {
                // Armed halfway to the target, limit at the target
                let trigger = (bracket.target + entry_price) / 2.0;
                let tp_req = AlgoOrderRequest::take_profit_limit(
                    inst,
                    exit_side.as_order_side(),
                    size,
                    trigger,
                    bracket.target,
                    pos_side,
                );
                let tp_id = self.client.place_algo_order(&tp_req).await?;
                info!("{}: take-profit limit placed, algo id {}", inst, tp_id);
            }
            TpMode::Trailing => {
                let callback = (bracket.target - entry_price).abs();
                let trail_req = AlgoOrderRequest::trailing_stop(
                    inst,
                    exit_side.as_order_side(),
                    size,
                    callback,
                    bracket.target,
                    pos_side,
                );
                let trail_id = self.client.place_algo_order(&trail_req).await?;
                info!("{}: trailing stop placed, algo id {}", inst, trail_id);
            }
        }

        Ok(())
    }
}

pub fn run(config_path: String) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path))
}

async fn run_async(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path)
        .context(format!("Failed to load config from {}", config_path))?;

    let mode = if config.exchange.sandbox {
        "SANDBOX"
    } else {
        "LIVE - REAL MONEY"
    };
    let symbols: Vec<&str> = config
        .trading
        .symbols
        .iter()
        .map(|s| s.instrument.as_str())
        .collect();

    info!("{}", "=".repeat(60));
    info!("EMA/ATR BREAKOUT TRADER - {} MODE", mode);
    info!("Symbols:   {}", symbols.join(", "));
    info!("Timeframe: {}", config.strategy.timeframe);
    info!(
        "Params:    ema={} atr={} mult={} slx={} rr={}",
        config.strategy.ema_period,
        config.strategy.atr_period,
        config.strategy.multiplier,
        config.strategy.sl_multiplier,
        config.strategy.rr
    );
    info!("Risk:      {} USDT per trade", config.trading.risk_usdt);
    info!("{}", "=".repeat(60));

    if !config.exchange.sandbox {
        warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("Press Ctrl+C within 10 seconds to abort...");
        for i in (1..=10).rev() {
            info!("Starting in {} seconds...", i);
            sleep(Duration::from_secs(1)).await;
        }
    }

    let trader = LiveTrader::new(config)?;
    if let Err(e) = trader.startup().await {
        error!("Startup checks failed: {}", e);
    }

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down after this cycle...");
            let _ = shutdown_tx.send(()).await;
        }
    });

    info!("Starting trading loop...");

    loop {
        for sym in trader.config.trading.symbols.clone() {
            if let Err(e) = trader.run_symbol_cycle(&sym).await {
                error!("{}: cycle failed: {}", sym.instrument, e);
            }
            info!("{}", "-".repeat(50));
        }

        let wait =
            schedule::secs_until_next_boundary(Utc::now(), trader.interval_secs) + BOUNDARY_GRACE_SECS;
        info!(
            "Waiting {}s for the next {} boundary",
            wait, trader.config.strategy.timeframe
        );

        tokio::select! {
            _ = sleep(Duration::from_secs(wait)) => {}
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Live trading session ended.");
    Ok(())
}
