use crate::errors::ScreenerError;
use crate::filter_utils::Category;
use crate::scan_config::ScanConfig;
use crate::signal::SignalResult;
use chrono::{DateTime, Local};
use log::{debug, info};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Every results file starts with this, so stray CSVs in the folder are ignored.
pub const RESULTS_FILE_PREFIX: &str = "screener_";

// CONFIGURATION STRUCTS
// Every field has a default so a partial config.json still loads.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,    // e.g., "https://api.binance.com"
    pub quote_asset: String, // e.g., "USDT"
    pub request_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            quote_asset: "USDT".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScanDefaults {
    pub interval: String, // e.g., "1d", "4h"
    pub lookback_days: u32,
    pub category: String, // e.g., "all", "top100"
}

impl Default for ScanDefaults {
    fn default() -> Self {
        Self {
            interval: "1d".to_string(),
            lookback_days: 350,
            category: "all".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// How many of the top-ranked symbols get sent for assessment.
    pub max_candidates: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            max_candidates: 20,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub scan: ScanDefaults,
    pub ai: AiConfig,
    /// Sub-directory of the storage folder that receives result CSVs.
    pub results_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            scan: ScanDefaults::default(),
            ai: AiConfig::default(),
            results_dir: "results".to_string(),
        }
    }
}

impl AppConfig {
    /// Resolves the scan defaults, with optional overrides, into a validated
    /// [`ScanConfig`].
    ///
    /// A category in the config file nobody recognises falls back to `all`;
    /// an unknown override is an error.
    pub fn scan_config(
        &self,
        interval: Option<&str>,
        lookback_days: Option<u32>,
        category: Option<&str>,
    ) -> Result<ScanConfig, ScreenerError> {
        let category = match category {
            Some(label) => label.parse()?,
            None => Category::from_label(&self.scan.category),
        };
        ScanConfig::new(
            interval.unwrap_or(&self.scan.interval),
            lookback_days.unwrap_or(self.scan.lookback_days),
            category,
        )
    }
}

// STORAGE MANAGER

#[derive(Debug, Clone)]
pub struct AsyncStorageManager {
    // Absolute path of the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage rooted next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> Result<Self, ScreenerError> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| ScreenerError::Storage("could not find binary directory".to_string()))?
            .join(relative_path);
        Self::new(base_dir).await
    }

    /// Storage rooted at an explicit directory, created if missing.
    pub async fn new<P: Into<PathBuf>>(base_dir: P) -> Result<Self, ScreenerError> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    pub async fn subdir(&self, name: &str) -> Result<Self, ScreenerError> {
        Self::new(self.base_dir.join(name)).await
    }

    /// Serializes `data` to `<filename>.json`, writing through a temp file so a
    /// crash mid-write never leaves a truncated document behind.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<(), ScreenerError> {
        let json_bytes = serde_json::to_vec_pretty(data)?;
        self.write_atomic(&format!("{}.json", filename), &json_bytes)
            .await?;
        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T, ScreenerError> {
        let path = self.base_dir.join(format!("{}.json", filename));
        let content = fs::read(path).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads `config.json`, writing the defaults first if it does not exist yet.
    pub async fn load_or_init_config(&self) -> Result<AppConfig, ScreenerError> {
        if !self.base_dir.join("config.json").exists() {
            let config = AppConfig::default();
            self.save("config", &config).await?;
            info!("Wrote default configuration to {:?}", self.base_dir);
            return Ok(config);
        }
        self.load("config").await
    }

    async fn write_atomic(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ScreenerError> {
        let final_path = self.base_dir.join(file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, &final_path).await?;
        Ok(final_path)
    }

    // --- Ranked scan results (CSV) ---

    /// Writes a ranked result set, tagged with the scan parameters and time.
    pub async fn save_scan_results(
        &self,
        config: &ScanConfig,
        results: &[SignalResult],
        taken_at: DateTime<Local>,
    ) -> Result<PathBuf, ScreenerError> {
        let file_name = results_file_name(config, taken_at);
        let bytes = results_to_csv(results)?;
        let path = self.write_atomic(&file_name, &bytes).await?;
        info!("Saved {} ranked results to {:?}", results.len(), path);
        Ok(path)
    }

    /// Most recently written results file, by modification time then name.
    pub async fn latest_results_file(&self) -> Result<Option<PathBuf>, ScreenerError> {
        let mut entries = fs::read_dir(&self.base_dir).await?;
        let mut latest: Option<(SystemTime, String, PathBuf)> = None;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(RESULTS_FILE_PREFIX) || !name.ends_with(".csv") {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            let is_newer = latest
                .as_ref()
                .is_none_or(|(t, n, _)| (modified, &name) > (*t, n));
            if is_newer {
                latest = Some((modified, name, entry.path()));
            }
        }

        Ok(latest.map(|(_, _, path)| path))
    }

    pub async fn load_scan_results(&self, path: &Path) -> Result<Vec<SignalResult>, ScreenerError> {
        let content = fs::read(path).await?;
        let mut reader = csv::Reader::from_reader(content.as_slice());
        let results = reader
            .deserialize::<SignalResult>()
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Loaded {} results from {:?}", results.len(), path);
        Ok(results)
    }

    /// The latest persisted result set, independent of any in-memory scan.
    pub async fn latest_scan_results(
        &self,
    ) -> Result<Option<(PathBuf, Vec<SignalResult>)>, ScreenerError> {
        match self.latest_results_file().await? {
            Some(path) => {
                let results = self.load_scan_results(&path).await?;
                Ok(Some((path, results)))
            }
            None => Ok(None),
        }
    }
}

pub fn results_file_name(config: &ScanConfig, taken_at: DateTime<Local>) -> String {
    format!(
        "{}{}_{}_{}days_{}.csv",
        RESULTS_FILE_PREFIX,
        config.category.as_str(),
        config.interval.as_str(),
        config.lookback_days,
        taken_at.format("%Y-%m-%d_%H-%M-%S")
    )
}

fn results_to_csv(results: &[SignalResult]) -> Result<Vec<u8>, ScreenerError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["symbol", "score", "close_price", "rsi", "volume_ratio"])?;
    for r in results {
        wtr.write_record([
            r.symbol.clone(),
            format!("{:.2}", r.score),
            format!("{:.2}", r.close_price),
            format!("{:.2}", r.rsi),
            format!("{:.2}", r.volume_ratio),
        ])?;
    }
    wtr.into_inner()
        .map_err(|e| ScreenerError::Csv(e.to_string()))
}
