use anyhow::{Result, anyhow};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use momentum_screener::ai_analysis::{GeminiClient, assess_symbols};
use momentum_screener::analysis::{ScanState, Scanner};
use momentum_screener::comfy_table::{render_assessments, render_instruments, render_results};
use momentum_screener::exchange::BinanceClient;
use momentum_screener::filter_utils::{Category, filter_by_category};
use momentum_screener::find_tickers::list_instruments;
use momentum_screener::scan_config::{ScanConfig, validate};
use momentum_screener::signal::rank_results;
use momentum_screener::storage_utils::{AppConfig, AsyncStorageManager};
use momentum_screener::tui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Spot momentum screener for Binance", long_about = None)]
struct Cli {
    /// Storage directory for config and results (default: `storage/` next to the binary)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Clone, Default)]
struct ScanArgs {
    /// Kline interval, e.g. 1d, 4h, 15m
    #[arg(short, long)]
    interval: Option<String>,
    /// Days of history to request
    #[arg(short, long)]
    days: Option<u32>,
    /// Category label (see `categories`)
    #[arg(short, long)]
    category: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scan in the foreground; Ctrl-C cancels and keeps partial results
    Scan(ScanArgs),
    /// Evaluate a single symbol right now
    Check {
        symbol: String,
        #[arg(short, long)]
        interval: Option<String>,
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Show the most recently saved results
    Latest,
    /// List the available categories
    Categories,
    /// List the instruments of a category with 24h statistics
    Symbols {
        #[arg(short, long, default_value = "all")]
        category: String,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Ask the AI model about the top candidates of the latest results
    Enrich {
        #[arg(short, long)]
        top: Option<usize>,
    },
    /// Interactive dashboard (default)
    Tui(ScanArgs),
}

fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn scan_config(args: &ScanArgs, config: &AppConfig) -> Result<ScanConfig> {
    let scan = config.scan_config(
        args.interval.as_deref(),
        args.days,
        args.category.as_deref(),
    )?;
    Ok(scan)
}

async fn open_storage(storage_dir: Option<PathBuf>) -> Result<AsyncStorageManager> {
    let storage = match storage_dir {
        Some(dir) => AsyncStorageManager::new(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    Ok(storage)
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        storage_dir,
        command,
    } = Cli::parse();
    let command = command.unwrap_or_else(|| Command::Tui(ScanArgs::default()));

    init_logging(if matches!(command, Command::Tui(_)) {
        "warn"
    } else {
        "info"
    });

    let storage = open_storage(storage_dir).await?;
    let config = storage.load_or_init_config().await?;
    let results_storage = storage.subdir(&config.results_dir).await?;
    let client = Arc::new(BinanceClient::new(&config.exchange)?);
    let scanner = Scanner::new(
        client.clone(),
        results_storage.clone(),
        &config.exchange.quote_asset,
    );

    match command {
        Command::Scan(args) => run_scan(&scanner, scan_config(&args, &config)?).await,
        Command::Check {
            symbol,
            interval,
            days,
        } => {
            let days = days.unwrap_or(config.scan.lookback_days);
            let interval = validate(interval.as_deref().unwrap_or(&config.scan.interval), days)?;
            match scanner.scan_single_symbol(&symbol, interval, days).await? {
                Some(result) => println!("{}", render_results(&[result])),
                None => println!("{}: no buy signal on {} candles", symbol, interval),
            }
            Ok(())
        }
        Command::Latest => {
            match results_storage.latest_scan_results().await? {
                Some((path, results)) => {
                    println!("\n(Results from {})\n{}", path.display(), render_results(&results))
                }
                None => println!("No saved results yet. Run a scan first."),
            }
            Ok(())
        }
        Command::Categories => {
            for (i, category) in Category::ALL.iter().enumerate() {
                println!("{}. {:<16} {}", i + 1, category.as_str(), category.description());
            }
            Ok(())
        }
        Command::Symbols { category, limit } => {
            let category: Category = category.parse()?;
            let instruments = list_instruments(client.as_ref(), &config.exchange.quote_asset).await;
            let by_symbol: HashMap<&str, _> = instruments
                .iter()
                .map(|i| (i.symbol.as_str(), i))
                .collect();
            let selected: Vec<_> = filter_by_category(&instruments, category, chrono::Utc::now())
                .iter()
                .filter_map(|s| by_symbol.get(s.as_str()).copied())
                .take(limit)
                .collect();
            println!(
                "\n{} ({} shown)\n{}",
                category.description(),
                selected.len(),
                render_instruments(&selected)
            );
            Ok(())
        }
        Command::Enrich { top } => run_enrichment(&results_storage, &config, top).await,
        Command::Tui(args) => {
            let defaults = scan_config(&args, &config)?;
            tui::run_tui(scanner, defaults).await
        }
    }
}

async fn run_scan(scanner: &Scanner, config: ScanConfig) -> Result<()> {
    let mut handle = scanner.start_scan(config)?;
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    let mut last_progress = None;

    loop {
        tokio::select! {
            joined = &mut handle => {
                joined?;
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                if scanner.cancel() {
                    warn!("Ctrl-C received, stopping after the current symbol");
                }
            }
            _ = ticker.tick() => {
                let status = scanner.status();
                if status.is_running && last_progress != Some(status.progress) {
                    last_progress = Some(status.progress);
                    info!(
                        "{}% of {} symbols, checking {} ({} candidates so far)",
                        status.progress,
                        status.total_symbols,
                        status.current_symbol,
                        status.results.len()
                    );
                }
            }
        }
    }

    let status = scanner.status();
    if !status.results.is_empty() {
        let mut ranked = status.results.clone();
        rank_results(&mut ranked);
        println!("\n{}", render_results(&ranked));
    }
    if let Some(file) = &status.results_file {
        println!("Results saved to {}", file.display());
    }

    match status.state {
        ScanState::Failed => Err(anyhow!(
            status.error.unwrap_or_else(|| "scan failed".to_string())
        )),
        ScanState::Cancelled => {
            println!("Scan cancelled with {} candidates.", status.results.len());
            Ok(())
        }
        _ => {
            println!("Scan complete: {} candidates.", status.results.len());
            Ok(())
        }
    }
}

async fn run_enrichment(
    results_storage: &AsyncStorageManager,
    config: &AppConfig,
    top: Option<usize>,
) -> Result<()> {
    let Some((path, results)) = results_storage.latest_scan_results().await? else {
        println!("No saved results yet. Run a scan first.");
        return Ok(());
    };

    let top = top.unwrap_or(config.ai.max_candidates);
    let symbols: Vec<String> = results.iter().take(top).map(|r| r.symbol.clone()).collect();
    info!("Enriching {} candidates from {}", symbols.len(), path.display());

    let generator = GeminiClient::from_env(&config.ai)?;
    let assessments = assess_symbols(&generator, &symbols, &config.exchange.quote_asset).await;
    println!("\n{}", render_assessments(&assessments));

    let report_name = format!("ai_report_{}", Local::now().format("%Y-%m-%d_%H-%M"));
    results_storage.save(&report_name, &assessments).await?;
    println!("Report saved to {}.json", results_storage.base_dir.join(report_name).display());
    Ok(())
}
