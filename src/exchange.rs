use crate::errors::ScreenerError;
use crate::scan_config::Interval;
use crate::storage_utils::ExchangeConfig;
use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Binance caps a single klines response at this many rows.
pub const KLINES_PAGE_LIMIT: usize = 1000;

static BAN_UNTIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"until\s+(\d+)").unwrap());

/// One kline as returned by the exchange: a positional JSON array.
pub type RawKline = Vec<Value>;

// --- Wire types ---

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub is_spot_trading_allowed: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Listing time in epoch ms. Not every venue/endpoint reports it.
    #[serde(default, deserialize_with = "deserialize_i64_lenient")]
    pub onboard_date: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    pub quote_volume: Option<f64>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    pub price_change: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    pub price_change_percent: Option<f64>,
}

// --- Lenient number parsing ---
// Binance sends prices and volumes as strings; accept numbers too.

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(v.trim().parse::<f64>().ok())
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientF64Visitor)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_option(LenientF64Visitor)
}

fn deserialize_i64_lenient<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = deserializer.deserialize_option(LenientF64Visitor)?;
    Ok(value.filter(|v| v.is_finite()).map(|v| v as i64))
}

/// Coerces one JSON cell to f64, yielding NaN when it is not numeric.
pub fn value_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

// --- Data source abstraction ---

/// Read-only view of an exchange's public market data.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Exchange metadata for every listed symbol.
    async fn exchange_info(&self) -> Result<ExchangeInfo, ScreenerError>;

    /// Rolling 24h statistics for every symbol.
    async fn tickers_24h(&self) -> Result<Vec<Ticker24h>, ScreenerError>;

    /// Klines for `symbol` opening at or after `start_ms` (and before `end_ms`
    /// when given), ascending by open time.
    async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: i64,
        end_ms: Option<i64>,
    ) -> Result<Vec<RawKline>, ScreenerError>;
}

pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ScreenerError> {
        let client = Client::builder()
            .pool_max_idle_per_host(50)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ScreenerError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();

        if status == StatusCode::IM_A_TEAPOT || status == StatusCode::TOO_MANY_REQUESTS {
            let text = response.text().await.unwrap_or_default();
            return Err(wait_out_ban(&text).await);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ScreenerError::MalformedResponse {
                endpoint: path.to_string(),
                message: format!("HTTP {}: {}", status, text),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ScreenerError::MalformedResponse {
                endpoint: path.to_string(),
                message: e.to_string(),
            })
    }
}

/// Sleeps until an IP ban reported by the exchange (error -1003) lifts.
/// The request that triggered it is not retried.
async fn wait_out_ban(body: &str) -> ScreenerError {
    let wait_ms = ban_wait_ms(body, now_ms()).unwrap_or(0);
    if wait_ms > 0 {
        warn!("Exchange rate limit hit, pausing for {} ms", wait_ms);
        let wait_sec = (wait_ms as f64 / 1000.0) + 5.0;
        tokio::time::sleep(Duration::from_secs_f64(wait_sec)).await;
    }
    ScreenerError::RateLimited { wait_ms }
}

fn ban_wait_ms(body: &str, now_ms: u64) -> Option<u64> {
    if !body.contains("-1003") {
        return None;
    }
    let ban_until = BAN_UNTIL
        .captures(body)?
        .get(1)?
        .as_str()
        .parse::<u64>()
        .ok()?;
    ban_until.checked_sub(now_ms)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn exchange_info(&self) -> Result<ExchangeInfo, ScreenerError> {
        self.get_json("/api/v3/exchangeInfo", &[]).await
    }

    async fn tickers_24h(&self) -> Result<Vec<Ticker24h>, ScreenerError> {
        self.get_json("/api/v3/ticker/24hr", &[]).await
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: i64,
        end_ms: Option<i64>,
    ) -> Result<Vec<RawKline>, ScreenerError> {
        let mut all_klines: Vec<RawKline> = Vec::new();
        let mut cursor = start_ms;

        loop {
            let mut query = vec![
                ("symbol", symbol.to_string()),
                ("interval", interval.as_str().to_string()),
                ("startTime", cursor.to_string()),
                ("limit", KLINES_PAGE_LIMIT.to_string()),
            ];
            if let Some(end) = end_ms {
                query.push(("endTime", end.to_string()));
            }

            let page: Vec<RawKline> = self.get_json("/api/v3/klines", &query).await?;
            let page_len = page.len();
            let last_open = page
                .last()
                .and_then(|k| k.first())
                .and_then(Value::as_i64);
            all_klines.extend(page);

            match last_open {
                Some(open) if page_len == KLINES_PAGE_LIMIT => cursor = open + 1,
                _ => break,
            }
            if end_ms.is_some_and(|end| cursor > end) {
                break;
            }
        }

        debug!("{}: fetched {} klines ({})", symbol, all_klines.len(), interval);
        Ok(all_klines)
    }
}
