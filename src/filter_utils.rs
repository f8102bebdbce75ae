use crate::errors::ScreenerError;
use crate::find_tickers::Instrument;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const POPULAR_COUNT: usize = 50;
const TOP10_COUNT: usize = 10;
const TOP100_COUNT: usize = 100;
const LOW_VOLUME_COUNT: usize = 100;
const NEW_LISTING_DAYS: i64 = 30;
const HIGH_VOLATILITY_PCT: f64 = 10.0;

/// Named rule for picking a subset of the instrument catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    All,
    Popular,
    Top10,
    Top100,
    New,
    LowVolume,
    HighVolatility,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::All,
        Category::Popular,
        Category::Top10,
        Category::Top100,
        Category::New,
        Category::LowVolume,
        Category::HighVolatility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Popular => "popular",
            Category::Top10 => "top10",
            Category::Top100 => "top100",
            Category::New => "new",
            Category::LowVolume => "low_volume",
            Category::HighVolatility => "high_volatility",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Category::All => "All symbols",
            Category::Popular => "Top 50 by quote volume",
            Category::Top10 => "Top 10 by quote volume",
            Category::Top100 => "Top 100 by quote volume",
            Category::New => "Listed in the last 30 days",
            Category::LowVolume => "Lowest 100 by quote volume (hidden gems)",
            Category::HighVolatility => "High volatility (>10% 24h change)",
        }
    }

    /// Lenient lookup: labels nobody knows about select everything.
    pub fn from_label(label: &str) -> Category {
        label.parse().unwrap_or(Category::All)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ScreenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ScreenerError::InvalidCategory(s.to_string()))
    }
}

/// Selects the symbols belonging to `category`.
///
/// Volume-ranked categories use a stable descending sort on 24h quote volume,
/// so instruments with equal volume keep their catalog order.
pub fn filter_by_category(
    instruments: &[Instrument],
    category: Category,
    now: DateTime<Utc>,
) -> Vec<String> {
    match category {
        Category::All => instruments.iter().map(|i| i.symbol.clone()).collect(),
        Category::Popular => symbols_of(&take_top(instruments, POPULAR_COUNT)),
        Category::Top10 => symbols_of(&take_top(instruments, TOP10_COUNT)),
        Category::Top100 => symbols_of(&take_top(instruments, TOP100_COUNT)),
        Category::New => {
            let cutoff = now - Duration::days(NEW_LISTING_DAYS);
            instruments
                .iter()
                .filter(|i| i.listed_at().is_some_and(|listed| listed >= cutoff))
                .map(|i| i.symbol.clone())
                .collect()
        }
        Category::LowVolume => {
            let ranked = by_volume_desc(instruments);
            let skip = ranked.len().saturating_sub(LOW_VOLUME_COUNT);
            symbols_of(&ranked[skip..])
        }
        Category::HighVolatility => instruments
            .iter()
            .filter(|i| i.price_change_percent_24h.abs() > HIGH_VOLATILITY_PCT)
            .map(|i| i.symbol.clone())
            .collect(),
    }
}

fn symbols_of(items: &[&Instrument]) -> Vec<String> {
    items.iter().map(|i| i.symbol.clone()).collect()
}

fn by_volume_desc(instruments: &[Instrument]) -> Vec<&Instrument> {
    let mut ranked: Vec<&Instrument> = instruments.iter().collect();
    ranked.sort_by(|a, b| {
        b.quote_volume_24h
            .partial_cmp(&a.quote_volume_24h)
            .unwrap_or(Ordering::Equal)
    });
    ranked
}

fn take_top(instruments: &[Instrument], n: usize) -> Vec<&Instrument> {
    let mut ranked = by_volume_desc(instruments);
    ranked.truncate(n);
    ranked
}
