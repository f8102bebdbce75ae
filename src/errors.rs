/// Errors raised by the screening pipeline, grouped by where they come from.
#[derive(Debug, thiserror::Error)]
pub enum ScreenerError {
    // ── Exchange / transport ──
    #[error("request to the exchange failed: {0}")]
    Transport(String),

    #[error("rate limited by the exchange, banned for another {wait_ms} ms")]
    RateLimited { wait_ms: u64 },

    #[error("unexpected response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    // ── Configuration ──
    #[error("unsupported interval: {0}")]
    UnsupportedInterval(String),

    #[error("{0}")]
    InvalidConfig(String),

    #[error("unknown category: {0}")]
    InvalidCategory(String),

    // ── Scan ──
    #[error("a scan is already in progress")]
    ScanAlreadyRunning,

    #[error("could not retrieve the instrument list")]
    EmptyCatalog,

    #[error("no symbols for category '{0}'")]
    NoSymbolsForCategory(String),

    #[error("no market data available for {0}")]
    NoData(String),

    // ── Persistence ──
    #[error("storage error: {0}")]
    Storage(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── AI enrichment ──
    #[error("AI analysis failed: {0}")]
    AiAnalysis(String),
}

impl From<reqwest::Error> for ScreenerError {
    fn from(err: reqwest::Error) -> Self {
        ScreenerError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ScreenerError {
    fn from(err: serde_json::Error) -> Self {
        ScreenerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ScreenerError {
    fn from(err: std::io::Error) -> Self {
        ScreenerError::Storage(err.to_string())
    }
}

impl From<csv::Error> for ScreenerError {
    fn from(err: csv::Error) -> Self {
        ScreenerError::Csv(err.to_string())
    }
}
