//! Position sizing and bracket geometry
//!
//! Stop and take-profit distances scale linearly with ATR and the
//! risk-reward ratio; contract counts are derived so that a stop-out loses
//! a fixed USDT amount.

use crate::signal::StrategyParams;
use crate::Side;

/// Stop-loss and take-profit prices around an entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub stop: f64,
    pub target: f64,
}

/// Stop distance for the given ATR
pub fn stop_distance(atr: f64, params: &StrategyParams) -> f64 {
    atr * params.sl_multiplier
}

/// Take-profit distance: stop distance scaled by the risk-reward ratio
pub fn target_distance(sl_distance: f64, params: &StrategyParams) -> f64 {
    sl_distance * params.rr
}

/// Bracket prices around the entry, stop below and target above for longs,
/// mirrored for shorts
pub fn bracket_for(side: Side, entry_price: f64, sl_distance: f64, params: &StrategyParams) -> Bracket {
    let tp_distance = target_distance(sl_distance, params);
    match side {
        Side::Buy => Bracket {
            stop: entry_price - sl_distance,
            target: entry_price + tp_distance,
        },
        Side::Sell => Bracket {
            stop: entry_price + sl_distance,
            target: entry_price - tp_distance,
        },
    }
}

/// Contracts to trade so a stop-out loses `risk_usdt`
///
/// `contract_size` is contracts per base-currency unit (100 for
/// BTC-USDT-SWAP), so one contract moves `sl_distance / contract_size`
/// USDT over the stop distance.
pub fn contracts(risk_usdt: f64, contract_size: f64, sl_distance: f64) -> f64 {
    if sl_distance <= 0.0 {
        return 0.0;
    }
    risk_usdt * contract_size / sl_distance
}

/// Isolated margin consumed by a position of `size` contracts
pub fn margin(size: f64, contract_size: f64, entry_price: f64, leverage: u32) -> f64 {
    size / contract_size * entry_price / leverage as f64
}

/// Equity-fraction position sizer for the backtester
///
/// quantity = risk_fraction * equity / stop_distance, capped so the
/// position notional never exceeds equity.
#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    pub risk_per_trade: f64,
}

impl PositionSizer {
    pub fn new(risk_per_trade: f64) -> Self {
        PositionSizer { risk_per_trade }
    }

    pub fn size(&self, equity: f64, entry_price: f64, sl_distance: f64) -> f64 {
        if equity <= 0.0 || entry_price <= 0.0 || sl_distance <= 0.0 {
            return 0.0;
        }
        let by_risk = equity * self.risk_per_trade / sl_distance;
        let by_notional = equity / entry_price;
        by_risk.min(by_notional)
    }
}
