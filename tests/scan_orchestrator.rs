// tests/scan_orchestrator.rs
//
// Drives the background scanner against an in-memory exchange.
// A gate on one symbol lets the tests act while the scan is mid-flight.

use async_trait::async_trait;
use momentum_screener::analysis::{ScanState, Scanner};
use momentum_screener::errors::ScreenerError;
use momentum_screener::exchange::{ExchangeInfo, MarketDataSource, RawKline, Ticker24h};
use momentum_screener::filter_utils::Category;
use momentum_screener::scan_config::{Interval, ScanConfig};
use momentum_screener::signal::SignalResult;
use momentum_screener::storage_utils::AsyncStorageManager;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const HOUR_MS: i64 = 3_600_000;

#[derive(Clone, Copy)]
enum Profile {
    /// Zig-zag uptrend whose last bar trades `last_volume` against a base of 9.
    Bullish { last_volume: f64 },
    Flat,
    Failing,
}

struct Gate {
    symbol: String,
    entered: Notify,
    release: Notify,
}

struct FakeExchange {
    symbols: Vec<(String, Profile)>,
    catalog_fails: bool,
    gate: Option<Gate>,
    requested: Mutex<Vec<String>>,
}

impl FakeExchange {
    fn new(symbols: &[(&str, Profile)]) -> Self {
        Self {
            symbols: symbols
                .iter()
                .map(|(s, p)| (s.to_string(), *p))
                .collect(),
            catalog_fails: false,
            gate: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    fn gated_on(mut self, symbol: &str) -> Self {
        self.gate = Some(Gate {
            symbol: symbol.to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        self
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    fn gate(&self) -> &Gate {
        self.gate.as_ref().unwrap()
    }
}

fn history(profile: Profile, start_ms: i64) -> Vec<RawKline> {
    let mut close = 100.0;
    (0..300)
        .map(|i| {
            let volume = match profile {
                Profile::Bullish { last_volume } if i == 299 => last_volume,
                _ => 9.0,
            };
            if i > 0 {
                if let Profile::Bullish { .. } = profile {
                    close += if i % 2 == 1 { 3.0 } else { -2.0 };
                }
            }
            let open_ms = start_ms + i as i64 * HOUR_MS;
            let price = close.to_string();
            serde_json::from_value(json!([
                open_ms, price, price, price, price, volume.to_string(),
                open_ms + HOUR_MS - 1, "0", 1, "0", "0", "0"
            ]))
            .unwrap()
        })
        .collect()
}

#[async_trait]
impl MarketDataSource for FakeExchange {
    async fn exchange_info(&self) -> Result<ExchangeInfo, ScreenerError> {
        if self.catalog_fails {
            return Err(ScreenerError::Transport("connection reset".into()));
        }
        let symbols: Vec<_> = self
            .symbols
            .iter()
            .map(|(symbol, _)| {
                json!({
                    "symbol": symbol,
                    "status": "TRADING",
                    "baseAsset": symbol.trim_end_matches("USDT"),
                    "quoteAsset": "USDT",
                    "isSpotTradingAllowed": true
                })
            })
            .collect();
        Ok(serde_json::from_value(json!({ "symbols": symbols })).unwrap())
    }

    async fn tickers_24h(&self) -> Result<Vec<Ticker24h>, ScreenerError> {
        let tickers: Vec<_> = self
            .symbols
            .iter()
            .enumerate()
            .map(|(i, (symbol, _))| {
                json!({
                    "symbol": symbol,
                    "volume": "10",
                    "quoteVolume": format!("{}", 1_000_000 - i * 1000),
                    "count": 100,
                    "priceChange": "0.1",
                    "priceChangePercent": "1.5"
                })
            })
            .collect();
        Ok(serde_json::from_value(json!(tickers)).unwrap())
    }

    async fn klines(
        &self,
        symbol: &str,
        _interval: Interval,
        start_ms: i64,
        _end_ms: Option<i64>,
    ) -> Result<Vec<RawKline>, ScreenerError> {
        self.requested.lock().unwrap().push(symbol.to_string());

        if let Some(gate) = self.gate.as_ref().filter(|g| g.symbol == symbol) {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        match self.symbols.iter().find(|(s, _)| s == symbol) {
            Some((_, Profile::Failing)) => Err(ScreenerError::Transport("timeout".into())),
            Some((_, profile)) => Ok(history(*profile, start_ms)),
            None => Ok(Vec::new()),
        }
    }
}

struct Harness {
    exchange: Arc<FakeExchange>,
    scanner: Scanner,
    storage: AsyncStorageManager,
    _dir: tempfile::TempDir,
}

async fn harness(exchange: FakeExchange) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = AsyncStorageManager::new(dir.path().join("results"))
        .await
        .unwrap();
    let exchange = Arc::new(exchange);
    let scanner = Scanner::new(exchange.clone(), storage.clone(), "USDT");
    Harness {
        exchange,
        scanner,
        storage,
        _dir: dir,
    }
}

fn config(category: Category) -> ScanConfig {
    ScanConfig {
        interval: Interval::OneHour,
        lookback_days: 30,
        category,
    }
}

async fn within_timeout<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

#[tokio::test]
async fn completed_scan_ranks_and_persists_results() {
    let h = harness(FakeExchange::new(&[
        ("AAAUSDT", Profile::Bullish { last_volume: 19.0 }),
        ("BBBUSDT", Profile::Flat),
        ("CCCUSDT", Profile::Bullish { last_volume: 30.0 }),
        ("DDDUSDT", Profile::Failing),
    ]))
    .await;

    let handle = h.scanner.start_scan(config(Category::All)).unwrap();
    within_timeout(handle).await.unwrap();

    let status = h.scanner.status();
    assert_eq!(status.state, ScanState::Completed);
    assert!(!status.is_running);
    assert_eq!(status.progress, 100);
    assert_eq!(status.total_symbols, 4);
    assert_eq!(status.error, None);

    let ranked: Vec<&str> = status.results.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(ranked, vec!["CCCUSDT", "AAAUSDT"]);
    assert!(status.results[0].score > status.results[1].score);
    assert!((status.results[1].volume_ratio - 2.0).abs() < 1e-9);

    let file = status.results_file.clone().unwrap();
    assert!(file.exists());
    let (latest, saved) = h.storage.latest_scan_results().await.unwrap().unwrap();
    assert_eq!(latest, file);
    let saved: Vec<&str> = saved.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(saved, ranked);

    assert_eq!(
        h.exchange.requested(),
        vec!["AAAUSDT", "BBBUSDT", "CCCUSDT", "DDDUSDT"]
    );
}

#[tokio::test]
async fn running_scan_rejects_a_second_start_and_cancels_at_symbol_boundary() {
    let h = harness(
        FakeExchange::new(&[
            ("AAAUSDT", Profile::Bullish { last_volume: 19.0 }),
            ("BBBUSDT", Profile::Bullish { last_volume: 30.0 }),
            ("CCCUSDT", Profile::Bullish { last_volume: 25.0 }),
            ("DDDUSDT", Profile::Bullish { last_volume: 22.0 }),
        ])
        .gated_on("BBBUSDT"),
    )
    .await;

    let handle = h.scanner.start_scan(config(Category::All)).unwrap();
    within_timeout(h.exchange.gate().entered.notified()).await;

    let status = h.scanner.status();
    assert!(status.is_running);
    assert_eq!(status.state, ScanState::Running);
    assert_eq!(status.current_symbol, "BBBUSDT");
    assert_eq!(status.progress, 25);
    assert_eq!(status.results.len(), 1);

    let other = ScanConfig {
        interval: Interval::OneDay,
        lookback_days: 90,
        category: Category::Top10,
    };
    assert!(matches!(
        h.scanner.start_scan(other),
        Err(ScreenerError::ScanAlreadyRunning)
    ));
    assert_eq!(h.scanner.status().config, config(Category::All));

    assert!(h.scanner.cancel());
    let status = h.scanner.status();
    assert!(!status.is_running);
    assert_eq!(status.state, ScanState::Cancelled);

    h.exchange.gate().release.notify_one();
    within_timeout(handle).await.unwrap();

    let status = h.scanner.status();
    assert_eq!(status.state, ScanState::Cancelled);
    assert_eq!(status.progress, 25);
    let kept: Vec<&str> = status.results.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(kept, vec!["BBBUSDT", "AAAUSDT"]);
    assert!(status.results_file.unwrap().exists());
    assert_eq!(h.exchange.requested(), vec!["AAAUSDT", "BBBUSDT"]);

    assert!(!h.scanner.cancel());
}

#[tokio::test]
async fn a_new_scan_can_start_after_cancellation() {
    let h = harness(FakeExchange::new(&[(
        "AAAUSDT",
        Profile::Bullish { last_volume: 19.0 },
    )]))
    .await;

    let first = h.scanner.start_scan(config(Category::All)).unwrap();
    h.scanner.cancel();
    within_timeout(first).await.unwrap();

    let second = h.scanner.start_scan(config(Category::Top10)).unwrap();
    within_timeout(second).await.unwrap();
    let status = h.scanner.status();
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.config.category, Category::Top10);
    assert_eq!(status.results.len(), 1);
}

fn gated_trio() -> FakeExchange {
    FakeExchange::new(&[
        ("AAAUSDT", Profile::Bullish { last_volume: 19.0 }),
        ("BBBUSDT", Profile::Bullish { last_volume: 30.0 }),
        ("CCCUSDT", Profile::Bullish { last_volume: 25.0 }),
    ])
    .gated_on("BBBUSDT")
}

fn saved_symbols(results: &[SignalResult]) -> Vec<&str> {
    results.iter().map(|r| r.symbol.as_str()).collect()
}

#[tokio::test]
async fn rejected_start_is_not_touched_by_a_cancelled_run() {
    let h = harness(gated_trio()).await;

    let first = h.scanner.start_scan(config(Category::All)).unwrap();
    within_timeout(h.exchange.gate().entered.notified()).await;
    assert!(h.scanner.cancel());

    let too_long = ScanConfig {
        interval: Interval::OneMinute,
        lookback_days: 30,
        category: Category::Top10,
    };
    assert!(matches!(
        h.scanner.start_scan(too_long.clone()),
        Err(ScreenerError::InvalidConfig(_))
    ));

    h.exchange.gate().release.notify_one();
    within_timeout(first).await.unwrap();

    let status = h.scanner.status();
    assert_eq!(status.state, ScanState::Idle);
    assert!(status.results.is_empty());
    assert!(status.results_file.is_none());
    assert_eq!(status.config, too_long);
    assert_eq!(
        status.error.as_deref(),
        Some("max 7 days for sub-minute/1-minute intervals")
    );

    // The cancelled run still saved everything it found.
    let (path, saved) = h.storage.latest_scan_results().await.unwrap().unwrap();
    assert!(path.to_string_lossy().contains("screener_all_1h_30days_"));
    assert_eq!(saved_symbols(&saved), vec!["BBBUSDT", "AAAUSDT"]);
}

#[tokio::test]
async fn cancelled_run_persists_even_after_a_restart() {
    let h = harness(gated_trio()).await;

    let first = h.scanner.start_scan(config(Category::All)).unwrap();
    within_timeout(h.exchange.gate().entered.notified()).await;
    assert!(h.scanner.cancel());

    let second = h.scanner.start_scan(config(Category::New)).unwrap();
    within_timeout(second).await.unwrap();

    h.exchange.gate().release.notify_one();
    within_timeout(first).await.unwrap();

    let status = h.scanner.status();
    assert_eq!(status.state, ScanState::Failed);
    assert_eq!(status.config.category, Category::New);
    assert_eq!(status.error.as_deref(), Some("no symbols for category 'new'"));
    assert!(status.results.is_empty());

    let file = h.storage.latest_results_file().await.unwrap().unwrap();
    assert!(file.to_string_lossy().contains("screener_all_1h_30days_"));
    let (_, saved) = h.storage.latest_scan_results().await.unwrap().unwrap();
    assert_eq!(saved_symbols(&saved), vec!["BBBUSDT", "AAAUSDT"]);
    assert_eq!(h.exchange.requested(), vec!["AAAUSDT", "BBBUSDT"]);
}

#[tokio::test]
async fn unreachable_catalog_fails_the_scan() {
    let mut exchange = FakeExchange::new(&[("AAAUSDT", Profile::Flat)]);
    exchange.catalog_fails = true;
    let h = harness(exchange).await;

    let handle = h.scanner.start_scan(config(Category::All)).unwrap();
    within_timeout(handle).await.unwrap();

    let status = h.scanner.status();
    assert_eq!(status.state, ScanState::Failed);
    assert!(!status.is_running);
    assert_eq!(
        status.error.as_deref(),
        Some("could not retrieve the instrument list")
    );
    assert!(h.exchange.requested().is_empty());
}

#[tokio::test]
async fn empty_category_fails_the_scan() {
    // No listing dates are reported, so nothing counts as new.
    let h = harness(FakeExchange::new(&[("AAAUSDT", Profile::Flat)])).await;

    let handle = h.scanner.start_scan(config(Category::New)).unwrap();
    within_timeout(handle).await.unwrap();

    let status = h.scanner.status();
    assert_eq!(status.state, ScanState::Failed);
    assert_eq!(status.error.as_deref(), Some("no symbols for category 'new'"));
    assert!(status.results_file.is_none());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_any_work() {
    let h = harness(FakeExchange::new(&[("AAAUSDT", Profile::Flat)])).await;

    let too_long = ScanConfig {
        interval: Interval::OneMinute,
        lookback_days: 30,
        category: Category::All,
    };
    assert!(matches!(
        h.scanner.start_scan(too_long),
        Err(ScreenerError::InvalidConfig(_))
    ));

    let status = h.scanner.status();
    assert_eq!(status.state, ScanState::Idle);
    assert!(!status.is_running);
    assert!(status.error.is_some());
    assert!(h.exchange.requested().is_empty());
}

#[tokio::test]
async fn single_symbol_check_normalizes_and_reports_missing_data() {
    let h = harness(FakeExchange::new(&[(
        "AAAUSDT",
        Profile::Bullish { last_volume: 19.0 },
    )]))
    .await;

    let result = h
        .scanner
        .scan_single_symbol("aaa", Interval::OneHour, 30)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.symbol, "AAAUSDT");
    assert!((result.volume_ratio - 2.0).abs() < 1e-9);

    assert!(matches!(
        h.scanner
            .scan_single_symbol("zzz", Interval::OneHour, 30)
            .await,
        Err(ScreenerError::NoData(symbol)) if symbol == "ZZZUSDT"
    ));
    assert!(matches!(
        h.scanner
            .scan_single_symbol("aaa", Interval::OneHour, 10)
            .await,
        Err(ScreenerError::InvalidConfig(_))
    ));

    // One-off checks never touch the scan run.
    assert_eq!(h.scanner.status().state, ScanState::Idle);
}
