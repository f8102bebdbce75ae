use crate::klines::Candle;
use serde::Serialize;
use ta::Next;
use ta::indicators::ExponentialMovingAverage;

pub const SHORT_SMA_LENGTH: usize = 50;
pub const LONG_SMA_LENGTH: usize = 200;
pub const RSI_LENGTH: usize = 14;
pub const VOLUME_SMA_LENGTH: usize = 20;

/// A candle together with the indicators computed at its close.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct IndicatorRow {
    pub candle: Candle,
    pub sma_50: f64,
    pub sma_200: f64,
    pub rsi_14: f64,
    pub volume_sma_20: f64,
}

/// Trailing mean over `length` values.
///
/// A position is `None` until `length` values have been seen, and whenever
/// its window contains a NaN.
pub fn sma(values: &[f64], length: usize) -> Vec<Option<f64>> {
    if length == 0 {
        return vec![None; values.len()];
    }

    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    let mut nan_in_window = 0usize;

    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            nan_in_window += 1;
        } else {
            sum += v;
        }
        if i >= length {
            let leaving = values[i - length];
            if leaving.is_nan() {
                nan_in_window -= 1;
            } else {
                sum -= leaving;
            }
        }

        let full = i + 1 >= length;
        out.push((full && nan_in_window == 0).then(|| sum / length as f64));
    }
    out
}

/// Wilder-style RSI over closing prices.
///
/// Gains and losses are smoothed recursively with α = 1/length, seeded with
/// the first observation; the first delta counts as neither gain nor loss.
/// Values start at the `length`-th observation. When the final average loss
/// is exactly zero the whole series is 100.
pub fn rsi(closes: &[f64], length: usize) -> Vec<Option<f64>> {
    if closes.is_empty() || length == 0 {
        return vec![None; closes.len()];
    }

    // ta's EMA smooths with k = 2 / (period + 1); period 2L - 1 gives k = 1/L.
    let period = 2 * length - 1;
    let (Ok(mut gain_ema), Ok(mut loss_ema)) = (
        ExponentialMovingAverage::new(period),
        ExponentialMovingAverage::new(period),
    ) else {
        return vec![None; closes.len()];
    };

    let mut averages: Vec<Option<(f64, f64)>> = Vec::with_capacity(closes.len());
    for (i, &close) in closes.iter().enumerate() {
        let delta = if i == 0 { 0.0 } else { close - closes[i - 1] };
        // NaN deltas fail both comparisons and count as zero.
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        let avg_gain = gain_ema.next(gain);
        let avg_loss = loss_ema.next(loss);
        averages.push((i + 1 >= length).then_some((avg_gain, avg_loss)));
    }

    if let Some(Some((_, last_loss))) = averages.last() {
        if *last_loss == 0.0 {
            return vec![Some(100.0); closes.len()];
        }
    }

    averages
        .into_iter()
        .map(|avg| {
            let (avg_gain, avg_loss) = avg?;
            let rs = avg_gain / avg_loss;
            let value = 100.0 - 100.0 / (1.0 + rs);
            // 0/0 leaves the row undefined; x/0 saturates at 100.
            (!value.is_nan()).then_some(value)
        })
        .collect()
}

/// Computes SMA(50), SMA(200), RSI(14) and volume SMA(20) for a candle series
/// and keeps only rows where everything is defined.
///
/// Fewer than 200 usable candles yields an empty result.
pub fn compute_indicators(candles: &[Candle]) -> Vec<IndicatorRow> {
    if candles.is_empty() {
        return Vec::new();
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let sma_50 = sma(&closes, SHORT_SMA_LENGTH);
    let sma_200 = sma(&closes, LONG_SMA_LENGTH);
    let rsi_14 = rsi(&closes, RSI_LENGTH);
    let volume_sma_20 = sma(&volumes, VOLUME_SMA_LENGTH);

    candles
        .iter()
        .enumerate()
        .filter(|(_, candle)| candle.is_complete())
        .filter_map(|(i, candle)| {
            Some(IndicatorRow {
                candle: candle.clone(),
                sma_50: sma_50[i]?,
                sma_200: sma_200[i]?,
                rsi_14: rsi_14[i]?,
                volume_sma_20: volume_sma_20[i]?,
            })
        })
        .collect()
}
