//! Request and response types for the OKX v5 REST API
//!
//! OKX returns every numeric field as a string; fields stay `String` here
//! and are parsed at the call site that needs a number.

use serde::{Deserialize, Serialize};

/// Standard OKX response envelope
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<T>,
}

/// Account balance: one entry per margin currency
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceData {
    #[serde(default)]
    pub details: Vec<BalanceDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDetail {
    pub ccy: String,
    /// Total equity in this currency
    pub eq: String,
    #[serde(default)]
    pub avail_bal: String,
}

/// Open position snapshot
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub inst_id: String,
    /// Signed position size in contracts; "0" or "" when flat
    pub pos: String,
    #[serde(default)]
    pub pos_side: String,
    #[serde(default)]
    pub avg_px: String,
}

impl PositionData {
    pub fn contracts(&self) -> f64 {
        self.pos.parse().unwrap_or(0.0)
    }
}

/// Pending (unfilled) order
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrderData {
    pub inst_id: String,
    pub ord_id: String,
}

/// Order detail returned by the order-lookup endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub ord_id: String,
    /// "live", "partially_filled", "filled", "canceled"
    pub state: String,
    #[serde(default)]
    pub avg_px: String,
    #[serde(default)]
    pub acc_fill_sz: String,
}

impl OrderDetail {
    pub fn is_filled(&self) -> bool {
        self.state == "filled"
    }

    pub fn average_price(&self) -> Option<f64> {
        self.avg_px.parse().ok().filter(|p: &f64| *p > 0.0)
    }

    pub fn filled_size(&self) -> f64 {
        self.acc_fill_sz.parse().unwrap_or(0.0)
    }
}

/// Market order request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub inst_id: String,
    pub td_mode: String,
    pub side: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_side: Option<String>,
    pub ord_type: String,
    pub sz: String,
}

impl PlaceOrderRequest {
    pub fn market(inst_id: &str, side: &str, size: f64, pos_side: Option<&str>) -> Self {
        PlaceOrderRequest {
            inst_id: inst_id.to_string(),
            td_mode: "isolated".to_string(),
            side: side.to_string(),
            pos_side: pos_side.map(str::to_string),
            ord_type: "market".to_string(),
            sz: format_size(size),
        }
    }
}

/// Per-order acknowledgement inside a place/cancel response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default)]
    pub ord_id: String,
    pub s_code: String,
    #[serde(default)]
    pub s_msg: String,
}

/// Batch-cancel entry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub inst_id: String,
    pub ord_id: String,
}

/// Algo (conditional/trailing) order request
///
/// The same endpoint covers stop-loss, take-profit and trailing orders;
/// which one it is follows from `ord_type` and the trigger fields set.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgoOrderRequest {
    pub inst_id: String,
    pub td_mode: String,
    pub side: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_side: Option<String>,
    /// "conditional" or "move_order_stop"
    pub ord_type: String,
    pub sz: String,
    pub reduce_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_trigger_px: Option<String>,
    /// "-1" executes the stop as a market order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_ord_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_trigger_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_ord_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_spread: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_px: Option<String>,
}

impl AlgoOrderRequest {
    fn base(inst_id: &str, side: &str, size: f64, pos_side: Option<&str>, ord_type: &str) -> Self {
        AlgoOrderRequest {
            inst_id: inst_id.to_string(),
            td_mode: "isolated".to_string(),
            side: side.to_string(),
            pos_side: pos_side.map(str::to_string),
            ord_type: ord_type.to_string(),
            sz: format_size(size),
            reduce_only: true,
            sl_trigger_px: None,
            sl_ord_px: None,
            tp_trigger_px: None,
            tp_ord_px: None,
            callback_spread: None,
            active_px: None,
        }
    }

    /// Market stop-loss triggered at `trigger_price`
    pub fn stop_loss(
        inst_id: &str,
        side: &str,
        size: f64,
        trigger_price: f64,
        pos_side: Option<&str>,
    ) -> Self {
        let mut req = Self::base(inst_id, side, size, pos_side, "conditional");
        req.sl_trigger_px = Some(format_price(trigger_price));
        req.sl_ord_px = Some("-1".to_string());
        req
    }

    /// Take-profit limit order at `limit_price`, armed at `trigger_price`
    pub fn take_profit_limit(
        inst_id: &str,
        side: &str,
        size: f64,
        trigger_price: f64,
        limit_price: f64,
        pos_side: Option<&str>,
    ) -> Self {
        let mut req = Self::base(inst_id, side, size, pos_side, "conditional");
        req.tp_trigger_px = Some(format_price(trigger_price));
        req.tp_ord_px = Some(format_price(limit_price));
        req
    }

    /// Trailing stop armed at `active_price` with the given callback spread
    pub fn trailing_stop(
        inst_id: &str,
        side: &str,
        size: f64,
        callback_spread: f64,
        active_price: f64,
        pos_side: Option<&str>,
    ) -> Self {
        let mut req = Self::base(inst_id, side, size, pos_side, "move_order_stop");
        req.callback_spread = Some(format_price(callback_spread));
        req.active_px = Some(format_price(active_price));
        req
    }
}

/// Algo order acknowledgement
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgoOrderAck {
    #[serde(default)]
    pub algo_id: String,
    pub s_code: String,
    #[serde(default)]
    pub s_msg: String,
}

/// Set-leverage request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLeverageRequest {
    pub inst_id: String,
    pub lever: String,
    pub mgn_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_side: Option<String>,
}

/// Render a contract count without scientific notation or trailing zeros
pub fn format_size(size: f64) -> String {
    let s = format!("{:.8}", size);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

/// Render a price for the wire
pub fn format_price(price: f64) -> String {
    let s = format!("{:.8}", price);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}
