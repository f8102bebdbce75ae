//! The buy rule applied to the most recent indicator row.

use crate::indicators::IndicatorRow;
use serde::{Deserialize, Serialize};

const RSI_FLOOR: f64 = 45.0;
const RSI_CEILING: f64 = 80.0;

/// Figures behind a positive signal.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct SignalDetails {
    pub close_price: f64,
    pub rsi: f64,
    pub volume_ratio: f64,
    pub score: f64,
}

impl SignalDetails {
    pub fn for_symbol(self, symbol: &str) -> SignalResult {
        SignalResult {
            symbol: symbol.to_string(),
            score: self.score,
            close_price: self.close_price,
            rsi: self.rsi,
            volume_ratio: self.volume_ratio,
        }
    }
}

/// A flagged symbol, in the column order of the persisted results table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignalResult {
    pub symbol: String,
    pub score: f64,
    pub close_price: f64,
    pub rsi: f64,
    pub volume_ratio: f64,
}

/// Checks the latest row for a bullish-momentum setup:
/// SMA50 above SMA200, RSI strictly between 45 and 80, and volume above a
/// positive 20-period volume average.
///
/// Returns the score (RSI x volume ratio) when every condition holds.
pub fn evaluate_signal(rows: &[IndicatorRow]) -> Option<SignalDetails> {
    let last = rows.last()?;

    let uptrend = last.sma_50 > last.sma_200;
    let healthy_momentum = RSI_FLOOR < last.rsi_14 && last.rsi_14 < RSI_CEILING;
    let volume_confirms =
        last.candle.volume > last.volume_sma_20 && last.volume_sma_20 > 0.0;

    if !(uptrend && healthy_momentum && volume_confirms) {
        return None;
    }

    let volume_ratio = last.candle.volume / last.volume_sma_20;
    Some(SignalDetails {
        close_price: last.candle.close,
        rsi: last.rsi_14,
        volume_ratio,
        score: last.rsi_14 * volume_ratio,
    })
}

/// Ranks results best-first. Equal scores keep their discovery order.
pub fn rank_results(results: &mut [SignalResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
