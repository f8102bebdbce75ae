//! Scan parameters and the interval/lookback rules that guard them.

use crate::errors::ScreenerError;
use crate::filter_utils::Category;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_LOOKBACK_DAYS: u32 = 30;
pub const MAX_LOOKBACK_DAYS: u32 = 1000;

/// Kline intervals accepted by the Binance spot API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    OneSecond,
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
    ThreeDays,
    OneWeek,
    OneMonth,
}

impl Interval {
    pub const ALL: [Interval; 16] = [
        Interval::OneSecond,
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::FourHours,
        Interval::SixHours,
        Interval::EightHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::ThreeDays,
        Interval::OneWeek,
        Interval::OneMonth,
    ];

    /// Label used by the exchange API (`1s`, `15m`, `1M`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneSecond => "1s",
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::SixHours => "6h",
            Interval::EightHours => "8h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::ThreeDays => "3d",
            Interval::OneWeek => "1w",
            Interval::OneMonth => "1M",
        }
    }

    /// Longest lookback allowed for this interval, if it is restricted at all.
    fn max_lookback(&self) -> Option<(u32, &'static str)> {
        match self {
            Interval::OneSecond | Interval::OneMinute => {
                Some((7, "max 7 days for sub-minute/1-minute intervals"))
            }
            Interval::ThreeMinutes | Interval::FiveMinutes => {
                Some((30, "max 30 days for small intervals"))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ScreenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Case matters: "1m" is a minute, "1M" a month.
        Interval::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| ScreenerError::UnsupportedInterval(s.to_string()))
    }
}

impl TryFrom<String> for Interval {
    type Error = ScreenerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.as_str().to_string()
    }
}

/// Checks an interval label against the lookback window it would be scanned with.
///
/// Only the per-interval caps live here; the global 30..=1000 bound is the
/// caller's job (see [`check_lookback_days`]).
pub fn validate(interval: &str, lookback_days: u32) -> Result<Interval, ScreenerError> {
    let interval: Interval = interval.parse()?;
    validate_interval(interval, lookback_days)?;
    Ok(interval)
}

pub fn validate_interval(interval: Interval, lookback_days: u32) -> Result<(), ScreenerError> {
    match interval.max_lookback() {
        Some((max_days, reason)) if lookback_days > max_days => {
            Err(ScreenerError::InvalidConfig(reason.to_string()))
        }
        _ => Ok(()),
    }
}

pub fn check_lookback_days(lookback_days: u32) -> Result<(), ScreenerError> {
    if (MIN_LOOKBACK_DAYS..=MAX_LOOKBACK_DAYS).contains(&lookback_days) {
        Ok(())
    } else {
        Err(ScreenerError::InvalidConfig(format!(
            "lookback days must be between {} and {}",
            MIN_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS
        )))
    }
}

/// Everything a scan run needs to know up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub interval: Interval,
    pub lookback_days: u32,
    pub category: Category,
}

impl ScanConfig {
    /// Builds a config from an interval label, rejecting anything a scan
    /// should never start with.
    pub fn new(interval: &str, lookback_days: u32, category: Category) -> Result<Self, ScreenerError> {
        check_lookback_days(lookback_days)?;
        let interval = validate(interval, lookback_days)?;
        Ok(Self {
            interval,
            lookback_days,
            category,
        })
    }

    /// Re-checks the lookback bounds and the interval cap.
    pub fn check(&self) -> Result<(), ScreenerError> {
        check_lookback_days(self.lookback_days)?;
        validate_interval(self.interval, self.lookback_days)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: Interval::OneDay,
            lookback_days: 350,
            category: Category::All,
        }
    }
}
