//! Background scan orchestration: catalog -> history -> indicators -> signal,
//! with progress tracking and cooperative cancellation.

use crate::errors::ScreenerError;
use crate::exchange::MarketDataSource;
use crate::filter_utils::filter_by_category;
use crate::find_tickers::list_instruments;
use crate::indicators::compute_indicators;
use crate::klines::fetch_history;
use crate::scan_config::{Interval, ScanConfig, check_lookback_days};
use crate::signal::{SignalResult, evaluate_signal, rank_results};
use crate::storage_utils::AsyncStorageManager;
use chrono::{Local, Utc};
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Snapshot of the current (or last) scan run.
#[derive(Serialize, Debug, Clone)]
pub struct ScanStatus {
    pub state: ScanState,
    pub is_running: bool,
    /// Percentage of symbols started, 0..=100.
    pub progress: u8,
    pub total_symbols: usize,
    pub current_symbol: String,
    pub results: Vec<SignalResult>,
    pub error: Option<String>,
    pub config: ScanConfig,
    pub results_file: Option<PathBuf>,
}

impl ScanStatus {
    fn idle(config: ScanConfig) -> Self {
        Self {
            state: ScanState::Idle,
            is_running: false,
            progress: 0,
            total_symbols: 0,
            current_symbol: String::new(),
            results: Vec::new(),
            error: None,
            config,
            results_file: None,
        }
    }

    fn running(config: ScanConfig) -> Self {
        Self {
            state: ScanState::Running,
            is_running: true,
            ..Self::idle(config)
        }
    }
}

struct Shared {
    status: ScanStatus,
    /// Cancel flag of the run that owns `status`.
    cancel: Arc<AtomicBool>,
}

/// Owns the single scan run of the process.
///
/// Cloning is cheap and every clone drives the same run.
#[derive(Clone)]
pub struct Scanner {
    source: Arc<dyn MarketDataSource>,
    storage: AsyncStorageManager,
    quote_asset: String,
    shared: Arc<Mutex<Shared>>,
}

impl Scanner {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        storage: AsyncStorageManager,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            source,
            storage,
            quote_asset: quote_asset.into(),
            shared: Arc::new(Mutex::new(Shared {
                status: ScanStatus::idle(ScanConfig::default()),
                cancel: Arc::new(AtomicBool::new(false)),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Status writes are plain field assignments, so a poisoned lock still
        // holds a consistent record.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to the status if `cancel` still identifies the current run.
    fn update_run(&self, cancel: &Arc<AtomicBool>, f: impl FnOnce(&mut ScanStatus)) -> bool {
        let mut shared = self.lock();
        if !Arc::ptr_eq(&shared.cancel, cancel) {
            return false;
        }
        f(&mut shared.status);
        true
    }

    /// A copy of the current run state. Never blocks on scan work.
    pub fn status(&self) -> ScanStatus {
        self.lock().status.clone()
    }

    /// Starts a background scan.
    ///
    /// Rejected while another scan is running, in which case nothing about
    /// the running scan changes. An invalid config is recorded as the status
    /// error and the scanner stays idle.
    pub fn start_scan(&self, config: ScanConfig) -> Result<JoinHandle<()>, ScreenerError> {
        let cancel = {
            let mut shared = self.lock();
            if shared.status.is_running {
                warn!("Scan request rejected: a scan is already in progress");
                return Err(ScreenerError::ScanAlreadyRunning);
            }

            // A new record always gets a new flag, so a cancelled task that
            // is still winding down can no longer write into it.
            let cancel = Arc::new(AtomicBool::new(false));
            shared.cancel = Arc::clone(&cancel);

            if let Err(e) = config.check() {
                warn!("Scan request rejected: {}", e);
                let mut status = ScanStatus::idle(config);
                status.error = Some(e.to_string());
                shared.status = status;
                return Err(e);
            }

            shared.status = ScanStatus::running(config.clone());
            cancel
        };

        info!(
            "Starting scan: category={}, interval={}, days={}",
            config.category, config.interval, config.lookback_days
        );
        let scanner = self.clone();
        Ok(tokio::spawn(async move { scanner.run(config, cancel).await }))
    }

    /// Stops the running scan at the next symbol boundary.
    ///
    /// Returns false when there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut shared = self.lock();
        if !shared.status.is_running {
            return false;
        }
        shared.cancel.store(true, Ordering::Relaxed);
        shared.status.is_running = false;
        shared.status.state = ScanState::Cancelled;
        info!("Scan cancellation requested");
        true
    }

    async fn run(self, config: ScanConfig, cancel: Arc<AtomicBool>) {
        let outcome = AssertUnwindSafe(self.scan_symbols(&config, &cancel))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("scan aborted unexpectedly: {}", panic_message(&*panic)),
        };

        error!("Scan failed: {}", failure);
        self.update_run(&cancel, |status| {
            status.state = ScanState::Failed;
            status.is_running = false;
            status.error = Some(failure);
        });
    }

    async fn scan_symbols(
        &self,
        config: &ScanConfig,
        cancel: &Arc<AtomicBool>,
    ) -> Result<(), ScreenerError> {
        let instruments = list_instruments(self.source.as_ref(), &self.quote_asset).await;
        if instruments.is_empty() {
            return Err(ScreenerError::EmptyCatalog);
        }

        let symbols = filter_by_category(&instruments, config.category, Utc::now());
        if symbols.is_empty() {
            return Err(ScreenerError::NoSymbolsForCategory(
                config.category.to_string(),
            ));
        }

        let total = symbols.len();
        self.update_run(cancel, |status| status.total_symbols = total);
        info!("Scanning {} symbols ({})", total, config.category);

        let mut results = Vec::new();
        for (index, symbol) in symbols.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                info!("Scan cancelled after {} of {} symbols", index, total);
                break;
            }

            self.update_run(cancel, |status| {
                status.current_symbol = symbol.clone();
                status.progress = progress_pct(index, total);
            });

            match evaluate_symbol(
                self.source.as_ref(),
                symbol,
                config.interval,
                config.lookback_days,
            )
            .await
            {
                Ok(Some(result)) => {
                    info!("Candidate found: {} (score {:.2})", symbol, result.score);
                    self.update_run(cancel, |status| status.results.push(result.clone()));
                    results.push(result);
                }
                Ok(None) => {}
                Err(e) => debug!("Skipping {}: {}", symbol, e),
            }
        }

        self.finish(config, cancel, results).await
    }

    /// Ranks and persists the run's own results. The file is written even
    /// when a newer run has taken over the status.
    async fn finish(
        &self,
        config: &ScanConfig,
        cancel: &Arc<AtomicBool>,
        mut results: Vec<SignalResult>,
    ) -> Result<(), ScreenerError> {
        rank_results(&mut results);

        // Ranked results go into the status before persisting so they
        // survive a failed write.
        self.update_run(cancel, |status| status.results = results.clone());

        let results_file = if results.is_empty() {
            info!("Scan finished without candidates");
            None
        } else {
            Some(
                self.storage
                    .save_scan_results(config, &results, Local::now())
                    .await?,
            )
        };

        let cancelled = cancel.load(Ordering::Relaxed);
        self.update_run(cancel, |status| {
            status.results_file = results_file;
            status.is_running = false;
            if cancelled {
                status.state = ScanState::Cancelled;
            } else {
                status.state = ScanState::Completed;
                status.progress = 100;
            }
        });
        info!("Scan finished with {} candidates", results.len());
        Ok(())
    }

    /// One-off check of a single symbol, independent of the scan run.
    ///
    /// `symbol` may omit the quote asset (`sol` -> `SOLUSDT`).
    pub async fn scan_single_symbol(
        &self,
        symbol: &str,
        interval: Interval,
        lookback_days: u32,
    ) -> Result<Option<SignalResult>, ScreenerError> {
        check_lookback_days(lookback_days)?;
        let symbol = normalize_symbol(symbol, &self.quote_asset);
        evaluate_symbol(self.source.as_ref(), &symbol, interval, lookback_days).await
    }
}

/// History -> indicators -> signal for one symbol.
/// Empty history is reported as [`ScreenerError::NoData`].
pub async fn evaluate_symbol(
    source: &dyn MarketDataSource,
    symbol: &str,
    interval: Interval,
    lookback_days: u32,
) -> Result<Option<SignalResult>, ScreenerError> {
    let candles = fetch_history(source, symbol, interval, lookback_days).await;
    if candles.is_empty() {
        return Err(ScreenerError::NoData(symbol.to_string()));
    }
    let rows = compute_indicators(&candles);
    Ok(evaluate_signal(&rows).map(|details| details.for_symbol(symbol)))
}

pub fn normalize_symbol(symbol: &str, quote_asset: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if symbol.ends_with(quote_asset) {
        symbol
    } else {
        format!("{}{}", symbol, quote_asset)
    }
}

fn progress_pct(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (index * 100 / total).min(100) as u8
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
