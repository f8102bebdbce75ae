pub mod ai_analysis;
pub mod analysis;
pub mod comfy_table;
pub mod errors;
pub mod exchange;
pub mod filter_utils;
pub mod find_tickers;
pub mod indicators;
pub mod klines;
pub mod scan_config;
pub mod signal;
pub mod storage_utils;
pub mod tui;
