//! OKX v5 REST API client
//!
//! HTTP client for the OKX perpetual-swap API with:
//! - Automatic retry with exponential backoff
//! - Rate limiting
//! - Circuit breaker pattern for fault tolerance
//! - Simulated-trading (demo account) support via the `x-simulated-trading`
//!   header

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::auth::{iso_timestamp, Credentials};
use super::types::*;
use crate::common::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};
use crate::{Candle, Side};

/// Base URL for the OKX API
pub const API_BASE_URL: &str = "https://www.okx.com";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Request timeout duration
    pub timeout: Duration,
    /// Rate limiter configuration
    pub rate_limiter: RateLimiterConfig,
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: usize) -> Self {
        self.rate_limiter = self.rate_limiter.with_rate(requests_per_second);
        self
    }
}

/// OKX exchange API client
pub struct OkxClient {
    credentials: Credentials,
    http_client: Client,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
    rate_limiter: RateLimiter,
    max_retries: u32,
    simulated: bool,
}

impl OkxClient {
    /// Create a new client; `simulated` routes to OKX demo trading
    pub fn new(credentials: Credentials, simulated: bool) -> Self {
        Self::with_config(credentials, simulated, ClientConfig::default())
    }

    pub fn with_config(credentials: Credentials, simulated: bool, config: ClientConfig) -> Self {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            credentials,
            http_client,
            circuit_breaker: Arc::new(Mutex::new(CircuitBreaker::new(config.circuit_breaker))),
            rate_limiter: RateLimiter::new(config.rate_limiter),
            max_retries: config.max_retries,
            simulated,
        }
    }

    /// Execute a request with retry logic, rate limiting, and circuit breaker
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        {
            let mut cb = self.circuit_breaker.lock().await;
            if !cb.can_attempt() {
                return Err(anyhow!("Circuit breaker is open, rejecting request"));
            }
        }

        self.rate_limiter.acquire().await;

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s...
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                debug!("Retrying after {}ms", delay.as_millis());
                sleep(delay).await;
            }

            match operation().await {
                Ok(result) => {
                    let mut cb = self.circuit_breaker.lock().await;
                    cb.record_success();
                    return Ok(result);
                }
                Err(e) => {
                    warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        {
            let mut cb = self.circuit_breaker.lock().await;
            cb.record_failure();
        }

        Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
    }

    /// Send one request and unwrap the OKX envelope
    ///
    /// `path` must include the query string: OKX signs the full request
    /// path. Signing is skipped for public market-data endpoints.
    async fn request<R>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        auth: bool,
    ) -> Result<Vec<R>>
    where
        R: DeserializeOwned,
    {
        let url = format!("{}{}", API_BASE_URL, path);
        let mut req = self.http_client.request(method.clone(), &url);

        if let Some(ref b) = body {
            req = req
                .header("Content-Type", "application/json")
                .body(b.clone());
        }

        if auth {
            let timestamp = iso_timestamp(Utc::now());
            let signature = self.credentials.sign(
                &timestamp,
                method.as_str(),
                path,
                body.as_deref().unwrap_or(""),
            );
            req = req
                .header("OK-ACCESS-KEY", self.credentials.api_key())
                .header("OK-ACCESS-SIGN", signature)
                .header("OK-ACCESS-TIMESTAMP", &timestamp)
                .header("OK-ACCESS-PASSPHRASE", self.credentials.passphrase());
        }

        if self.simulated {
            req = req.header("x-simulated-trading", "1");
        }

        let response = req.send().await.context("Failed to send request")?;
        let status = response.status();
        let text = response.text().await.context("Failed to read response")?;

        if !status.is_success() {
            return Err(anyhow!("OKX API error ({}): {}", status, text));
        }

        let envelope: ApiResponse<R> =
            serde_json::from_str(&text).context("Failed to parse OKX response")?;

        if envelope.code != "0" {
            return Err(anyhow!("OKX error {}: {}", envelope.code, envelope.msg));
        }

        Ok(envelope.data)
    }

    async fn get<R: DeserializeOwned>(&self, path: &str, auth: bool) -> Result<Vec<R>> {
        self.execute_with_retry(|| self.request::<R>(Method::GET, path, None, auth))
            .await
    }

    async fn post<T: serde::Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Vec<R>> {
        let json_body = serde_json::to_string(body)?;
        self.execute_with_retry(|| {
            self.request::<R>(Method::POST, path, Some(json_body.clone()), true)
        })
        .await
    }

    // ==================== MARKET DATA ====================

    /// Fetch candles for an instrument, oldest first
    ///
    /// OKX returns rows newest-first with the still-forming candle at the
    /// head; after reversal it sits at the tail, so index `len - 2` is the
    /// last closed candle.
    pub async fn get_candles(&self, inst_id: &str, bar: &str, limit: u32) -> Result<Vec<Candle>> {
        let path = format!(
            "/api/v5/market/candles?instId={}&bar={}&limit={}",
            inst_id,
            okx_bar(bar),
            limit
        );
        let rows: Vec<Vec<String>> = self.get(&path, false).await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            match parse_candle_row(row) {
                Ok(candle) => candles.push(candle),
                Err(e) => warn!("Skipping malformed candle row: {}", e),
            }
        }

        Ok(candles)
    }

    // ==================== ACCOUNT ====================

    /// Total USDT equity on the trading account
    pub async fn get_usdt_balance(&self) -> Result<f64> {
        let data: Vec<BalanceData> = self.get("/api/v5/account/balance?ccy=USDT", true).await?;

        let balance = data
            .first()
            .and_then(|b| b.details.iter().find(|d| d.ccy == "USDT"))
            .map(|d| d.eq.parse().unwrap_or(0.0))
            .unwrap_or(0.0);

        Ok(balance)
    }

    /// Set isolated-margin leverage for an instrument
    ///
    /// Real accounts in long/short mode need one call per position side;
    /// pass `None` on demo accounts.
    pub async fn set_leverage(
        &self,
        inst_id: &str,
        leverage: u32,
        pos_side: Option<&str>,
    ) -> Result<()> {
        let req = SetLeverageRequest {
            inst_id: inst_id.to_string(),
            lever: leverage.to_string(),
            mgn_mode: "isolated".to_string(),
            pos_side: pos_side.map(str::to_string),
        };

        let _: Vec<serde_json::Value> = self.post("/api/v5/account/set-leverage", &req).await?;
        Ok(())
    }

    /// All open positions on the account
    pub async fn get_positions(&self) -> Result<Vec<PositionData>> {
        self.get("/api/v5/account/positions", true).await
    }

    /// Whether the account holds a non-zero position in the instrument
    pub async fn has_open_position(&self, inst_id: &str) -> Result<bool> {
        let positions = self.get_positions().await?;
        Ok(positions
            .iter()
            .any(|p| p.inst_id == inst_id && p.contracts() != 0.0))
    }

    // ==================== ORDERS ====================

    /// Pending (unfilled) orders for an instrument
    pub async fn get_pending_orders(&self, inst_id: &str) -> Result<Vec<PendingOrderData>> {
        let path = format!("/api/v5/trade/orders-pending?instId={}", inst_id);
        self.get(&path, true).await
    }

    /// Cancel a batch of orders on one instrument
    pub async fn cancel_orders(&self, inst_id: &str, order_ids: &[String]) -> Result<()> {
        if order_ids.is_empty() {
            return Ok(());
        }

        let body: Vec<CancelOrderRequest> = order_ids
            .iter()
            .map(|ord_id| CancelOrderRequest {
                inst_id: inst_id.to_string(),
                ord_id: ord_id.clone(),
            })
            .collect();

        let acks: Vec<OrderAck> = self.post("/api/v5/trade/cancel-batch-orders", &body).await?;
        for ack in &acks {
            if ack.s_code != "0" {
                warn!("Cancel rejected for order {}: {}", ack.ord_id, ack.s_msg);
            }
        }
        Ok(())
    }

    /// Place an isolated-margin market order; returns the order id
    pub async fn place_market_order(
        &self,
        inst_id: &str,
        side: Side,
        size: f64,
        pos_side: Option<&str>,
    ) -> Result<String> {
        let req = PlaceOrderRequest::market(inst_id, side.as_order_side(), size, pos_side);
        let acks: Vec<OrderAck> = self.post("/api/v5/trade/order", &req).await?;

        let ack = acks.first().context("Empty order response")?;
        if ack.s_code != "0" {
            return Err(anyhow!("Order rejected ({}): {}", ack.s_code, ack.s_msg));
        }

        Ok(ack.ord_id.clone())
    }

    /// Look up an order's fill state
    pub async fn get_order(&self, inst_id: &str, ord_id: &str) -> Result<OrderDetail> {
        let path = format!("/api/v5/trade/order?instId={}&ordId={}", inst_id, ord_id);
        let orders: Vec<OrderDetail> = self.get(&path, true).await?;
        orders.into_iter().next().context("Order not found")
    }

    /// Submit an algo (conditional or trailing) order; returns the algo id
    pub async fn place_algo_order(&self, req: &AlgoOrderRequest) -> Result<String> {
        let acks: Vec<AlgoOrderAck> = self.post("/api/v5/trade/order-algo", req).await?;

        let ack = acks.first().context("Empty algo order response")?;
        if ack.s_code != "0" {
            return Err(anyhow!(
                "Algo order rejected ({}): {}",
                ack.s_code,
                ack.s_msg
            ));
        }

        Ok(ack.algo_id.clone())
    }
}

/// Map a timeframe to OKX's bar code: minutes stay lowercase, hours and
/// days are uppercase ("1h" -> "1H", "1d" -> "1D")
fn okx_bar(bar: &str) -> String {
    match bar.chars().last() {
        Some('h') | Some('d') | Some('w') => bar.to_uppercase(),
        _ => bar.to_string(),
    }
}

/// Parse one OKX candle row: [ts, open, high, low, close, volume, ...]
fn parse_candle_row(row: &[String]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(anyhow!("Candle row has {} fields, expected >= 6", row.len()));
    }

    let millis: i64 = row[0].parse().context("Bad candle timestamp")?;
    let datetime =
        chrono::DateTime::from_timestamp_millis(millis).context("Candle timestamp out of range")?;

    Candle::new(
        datetime,
        row[1].parse().context("Bad open")?,
        row[2].parse().context("Bad high")?,
        row[3].parse().context("Bad low")?,
        row[4].parse().context("Bad close")?,
        row[5].parse().context("Bad volume")?,
    )
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: i64, o: &str, h: &str, l: &str, c: &str, v: &str) -> Vec<String> {
        vec![
            ts.to_string(),
            o.to_string(),
            h.to_string(),
            l.to_string(),
            c.to_string(),
            v.to_string(),
            "0".to_string(),
            "0".to_string(),
            "1".to_string(),
        ]
    }

    #[test]
    fn parses_candle_row() {
        let candle = parse_candle_row(&row(
            1735689600000,
            "93500.1",
            "93800",
            "93200",
            "93650.5",
            "1234.5",
        ))
        .unwrap();
        assert_eq!(candle.datetime.timestamp(), 1735689600);
        assert_eq!(candle.close, 93650.5);
    }

    #[test]
    fn bar_codes_match_okx_casing() {
        assert_eq!(okx_bar("15m"), "15m");
        assert_eq!(okx_bar("1h"), "1H");
        assert_eq!(okx_bar("4h"), "4H");
        assert_eq!(okx_bar("1d"), "1D");
    }

    #[test]
    fn rejects_short_row() {
        let short = vec!["1735689600000".to_string(), "1".to_string()];
        assert!(parse_candle_row(&short).is_err());
    }
}
