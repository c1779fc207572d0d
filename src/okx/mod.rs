//! OKX v5 REST API library
//!
//! A standalone client for OKX perpetual swaps with retry, rate limiting
//! and circuit breaking. Covers the endpoints the live trader needs:
//! candles, balance, leverage, positions, pending orders, market orders
//! and algo (conditional/trailing) orders.
//!
//! ```no_run
//! use ema_breakout::okx::{Credentials, OkxClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let credentials = Credentials::from_env(true)?;
//!     let client = OkxClient::new(credentials, true);
//!     let candles = client.get_candles("BTC-USDT-SWAP", "15m", 100).await?;
//!     println!("Fetched {} candles", candles.len());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod types;

pub use auth::Credentials;
pub use client::{ClientConfig, OkxClient, API_BASE_URL};
pub use types::{AlgoOrderRequest, OrderDetail, PendingOrderData, PositionData};
