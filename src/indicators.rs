//! Technical indicators powered by the `ta` crate
//!
//! EMA delegates to `ta::indicators::ExponentialMovingAverage`. ATR is
//! computed with Wilder's smoothing, which matches talib's ATR; the `ta`
//! crate smooths true range with a standard EMA instead, so the values
//! diverge slightly after warmup.
//!
//! All functions return `Vec<Option<f64>>` aligned with the input: `None`
//! until the indicator has seen `period` values.

use ta::indicators::ExponentialMovingAverage;
use ta::Next;

/// Calculate Exponential Moving Average
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    let mut result = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let ema_val = indicator.next(value);
        if i + 1 >= period {
            result.push(Some(ema_val));
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range (ATR) using Wilder's smoothing
///
/// ATR = (prev_ATR * (period - 1) + current_TR) / period, seeded with the
/// SMA of the first `period` true ranges.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }

    let tr = true_range(high, low, close);
    let mut result = Vec::with_capacity(high.len());
    let mut atr_value: Option<f64> = None;

    for i in 0..tr.len() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = tr[0..period].iter().sum();
            atr_value = Some(sum / period as f64);
            result.push(atr_value);
        } else if let Some(prev_atr) = atr_value {
            let new_atr = (prev_atr * (period - 1) as f64 + tr[i]) / period as f64;
            atr_value = Some(new_atr);
            result.push(atr_value);
        } else {
            result.push(None);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ema_warmup_is_none() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema(&values, 3);
        assert_eq!(result.len(), 5);
        assert!(result[0].is_none());
        assert!(result[1].is_none());
        assert!(result[2].is_some());
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let values = vec![42.0; 10];
        let result = ema(&values, 4);
        for v in result.iter().skip(3) {
            assert_relative_eq!(v.unwrap(), 42.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn true_range_uses_prior_close() {
        // Gap up: yesterday closed at 10, today ranges 14-15
        let high = vec![11.0, 15.0];
        let low = vec![9.0, 14.0];
        let close = vec![10.0, 14.5];
        let tr = true_range(&high, &low, &close);
        assert_relative_eq!(tr[0], 2.0);
        // max(15-14, |15-10|, |14-10|) = 5
        assert_relative_eq!(tr[1], 5.0);
    }

    #[test]
    fn atr_seeds_with_sma_of_true_range() {
        let high = vec![12.0, 13.0, 14.0, 15.0];
        let low = vec![10.0, 11.0, 12.0, 13.0];
        let close = vec![11.0, 12.0, 13.0, 14.0];
        let result = atr(&high, &low, &close, 3);

        assert!(result[0].is_none());
        assert!(result[1].is_none());
        // TR = [2, 2, 2], first ATR = 2
        assert_relative_eq!(result[2].unwrap(), 2.0, epsilon = 1e-9);
        // Wilder: (2 * 2 + 2) / 3 = 2
        assert_relative_eq!(result[3].unwrap(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn atr_rejects_mismatched_lengths() {
        let result = atr(&[1.0, 2.0], &[1.0], &[1.0, 2.0], 2);
        assert!(result.is_empty());
    }
}
