use crate::exchange::{MarketDataSource, RawKline, value_to_f64};
use crate::scan_config::Interval;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::Serialize;
use serde_json::Value;

/// One OHLCV bar. Numeric fields that failed to parse hold NaN.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
    pub quote_asset_volume: f64,
    pub number_of_trades: u64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
}

impl Candle {
    /// True when every price/volume field needed downstream is a number.
    pub fn is_complete(&self) -> bool {
        ![self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .any(|v| v.is_nan())
    }
}

fn epoch_ms(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
}

/// Converts a positional kline row
/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume, trades, takerBase, takerQuote, ignore]`.
///
/// Rows without usable timestamps are rejected; bad numbers become NaN.
pub fn parse_kline(row: &RawKline) -> Option<Candle> {
    let num = |i: usize| row.get(i).map(value_to_f64).unwrap_or(f64::NAN);

    Some(Candle {
        open_time: epoch_ms(row.first())?,
        open: num(1),
        high: num(2),
        low: num(3),
        close: num(4),
        volume: num(5),
        close_time: epoch_ms(row.get(6))?,
        quote_asset_volume: num(7),
        number_of_trades: row.get(8).and_then(Value::as_u64).unwrap_or(0),
        taker_buy_base_volume: num(9),
        taker_buy_quote_volume: num(10),
    })
}

pub fn parse_klines(rows: &[RawKline]) -> Vec<Candle> {
    rows.iter().filter_map(parse_kline).collect()
}

/// Start of the lookback window ending at `now`.
pub fn window_start(now: DateTime<Utc>, lookback_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(lookback_days))
}

/// Candles for `symbol` covering the last `lookback_days`, oldest first.
///
/// Any transport or protocol failure is logged and returns an empty series;
/// callers treat that as "skip this symbol".
pub async fn fetch_history(
    source: &dyn MarketDataSource,
    symbol: &str,
    interval: Interval,
    lookback_days: u32,
) -> Vec<Candle> {
    let now = Utc::now();
    let start_ms = window_start(now, lookback_days).timestamp_millis();

    match source
        .klines(symbol, interval, start_ms, Some(now.timestamp_millis()))
        .await
    {
        Ok(rows) => parse_klines(&rows),
        Err(e) => {
            warn!("Error fetching klines for {}: {}", symbol, e);
            Vec::new()
        }
    }
}
