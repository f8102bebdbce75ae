//! Discovery of the tradable spot universe for one quote asset.

use crate::errors::ScreenerError;
use crate::exchange::{ExchangeInfo, MarketDataSource, SymbolInfo, Ticker24h};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use std::collections::HashMap;

/// Stablecoins never worth screening against a stable quote asset.
const EXCLUDED_BASE_ASSETS: &[&str] = &["USDC", "TUSD", "BUSD"];

/// Markers of leveraged tokens (e.g. `BTCUPUSDT`, `ETHDOWNUSDT`).
const LEVERAGED_MARKERS: &[&str] = &["UP", "DOWN"];

/// A tradable symbol with its 24h market statistics.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub onboard_date: Option<i64>,
    pub permissions: Vec<String>,
    pub volume_24h: f64,
    pub quote_volume_24h: f64,
    pub count_24h: u64,
    pub price_change_24h: f64,
    pub price_change_percent_24h: f64,
}

impl Instrument {
    /// Listing time, if the exchange reported a usable one.
    pub fn listed_at(&self) -> Option<DateTime<Utc>> {
        self.onboard_date.and_then(DateTime::from_timestamp_millis)
    }

    fn from_parts(info: SymbolInfo, ticker: Option<&Ticker24h>) -> Self {
        let stat = |f: fn(&Ticker24h) -> Option<f64>| ticker.and_then(f).unwrap_or(0.0);
        Self {
            volume_24h: stat(|t| t.volume),
            quote_volume_24h: stat(|t| t.quote_volume),
            count_24h: ticker.and_then(|t| t.count).unwrap_or(0),
            price_change_24h: stat(|t| t.price_change),
            price_change_percent_24h: stat(|t| t.price_change_percent),
            symbol: info.symbol,
            base_asset: info.base_asset,
            quote_asset: info.quote_asset,
            onboard_date: info.onboard_date,
            permissions: info.permissions,
        }
    }
}

/// True when a symbol belongs in the screening universe for `quote_asset`.
pub fn is_screenable(info: &SymbolInfo, quote_asset: &str) -> bool {
    info.is_spot_trading_allowed
        && info.status == "TRADING"
        && info.quote_asset == quote_asset
        && !LEVERAGED_MARKERS.iter().any(|m| info.symbol.contains(m))
        && !EXCLUDED_BASE_ASSETS.contains(&info.base_asset.as_str())
}

/// Joins exchange metadata with 24h statistics, keeping exchange order.
pub fn build_catalog(
    exchange_info: ExchangeInfo,
    tickers: Vec<Ticker24h>,
    quote_asset: &str,
) -> Vec<Instrument> {
    let tickers_by_symbol: HashMap<String, Ticker24h> = tickers
        .into_iter()
        .map(|t| (t.symbol.clone(), t))
        .collect();

    exchange_info
        .symbols
        .into_iter()
        .filter(|s| is_screenable(s, quote_asset))
        .map(|s| {
            let ticker = tickers_by_symbol.get(&s.symbol);
            Instrument::from_parts(s, ticker)
        })
        .collect()
}

async fn fetch_catalog(
    source: &dyn MarketDataSource,
    quote_asset: &str,
) -> Result<Vec<Instrument>, ScreenerError> {
    let (exchange_info, tickers) =
        futures::try_join!(source.exchange_info(), source.tickers_24h())?;
    Ok(build_catalog(exchange_info, tickers, quote_asset))
}

/// Lists every screenable instrument quoted in `quote_asset`.
///
/// Transport failures are logged and produce an empty list.
pub async fn list_instruments(source: &dyn MarketDataSource, quote_asset: &str) -> Vec<Instrument> {
    match fetch_catalog(source, quote_asset).await {
        Ok(instruments) => {
            info!("Found {} {} symbols to screen", instruments.len(), quote_asset);
            instruments
        }
        Err(e) => {
            error!("Failed to fetch the {} symbol list: {}", quote_asset, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_config::Interval;
    use crate::exchange::RawKline;
    use async_trait::async_trait;
    use serde_json::json;

    fn exchange_info() -> ExchangeInfo {
        serde_json::from_value(json!({
            "symbols": [
                { "symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT", "isSpotTradingAllowed": true },
                { "symbol": "ETHBTC", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "BTC", "isSpotTradingAllowed": true },
                { "symbol": "LUNAUSDT", "status": "BREAK", "baseAsset": "LUNA", "quoteAsset": "USDT", "isSpotTradingAllowed": true },
                { "symbol": "BTCUPUSDT", "status": "TRADING", "baseAsset": "BTCUP", "quoteAsset": "USDT", "isSpotTradingAllowed": true },
                { "symbol": "ETHDOWNUSDT", "status": "TRADING", "baseAsset": "ETHDOWN", "quoteAsset": "USDT", "isSpotTradingAllowed": true },
                { "symbol": "USDCUSDT", "status": "TRADING", "baseAsset": "USDC", "quoteAsset": "USDT", "isSpotTradingAllowed": true },
                { "symbol": "MARGUSDT", "status": "TRADING", "baseAsset": "MARG", "quoteAsset": "USDT", "isSpotTradingAllowed": false },
                { "symbol": "SOLUSDT", "status": "TRADING", "baseAsset": "SOL", "quoteAsset": "USDT", "isSpotTradingAllowed": true, "permissions": ["SPOT"], "onboardDate": 1600000000000_i64 }
            ]
        }))
        .unwrap()
    }

    fn tickers() -> Vec<Ticker24h> {
        serde_json::from_value(json!([
            { "symbol": "SOLUSDT", "volume": "1000", "quoteVolume": "150000", "count": 42, "priceChange": "3.5", "priceChangePercent": "2.4" },
            { "symbol": "ETHBTC", "volume": "5", "quoteVolume": "0.2", "count": 1, "priceChange": "0", "priceChangePercent": "0" }
        ]))
        .unwrap()
    }

    #[test]
    fn catalog_keeps_only_screenable_symbols() {
        let catalog = build_catalog(exchange_info(), tickers(), "USDT");
        let symbols: Vec<&str> = catalog.iter().map(|i| i.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "SOLUSDT"]);
    }

    #[test]
    fn missing_ticker_means_zero_stats() {
        let catalog = build_catalog(exchange_info(), tickers(), "USDT");
        let btc = &catalog[0];
        assert_eq!(btc.quote_volume_24h, 0.0);
        assert_eq!(btc.count_24h, 0);

        let sol = &catalog[1];
        assert_eq!(sol.volume_24h, 1000.0);
        assert_eq!(sol.quote_volume_24h, 150000.0);
        assert_eq!(sol.count_24h, 42);
        assert_eq!(sol.price_change_percent_24h, 2.4);
        assert_eq!(sol.permissions, vec!["SPOT"]);
        assert!(sol.listed_at().is_some());
    }

    struct BrokenSource;

    #[async_trait]
    impl MarketDataSource for BrokenSource {
        async fn exchange_info(&self) -> Result<ExchangeInfo, ScreenerError> {
            Err(ScreenerError::Transport("connection refused".into()))
        }

        async fn tickers_24h(&self) -> Result<Vec<Ticker24h>, ScreenerError> {
            Ok(Vec::new())
        }

        async fn klines(
            &self,
            _symbol: &str,
            _interval: Interval,
            _start_ms: i64,
            _end_ms: Option<i64>,
        ) -> Result<Vec<RawKline>, ScreenerError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn transport_failure_yields_empty_list() {
        assert!(list_instruments(&BrokenSource, "USDT").await.is_empty());
    }
}
