//! Core types used throughout PerpWatch
//!
//! Defines data sources, timeframes, candles and market metadata shared by
//! the oracle, indicator and signal layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market data source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Bybit,
    Kucoin,
    Okx,
}

impl SourceId {
    /// Default priority order used when no list is configured
    pub const DEFAULT_PRIORITY: [SourceId; 3] = [SourceId::Bybit, SourceId::Kucoin, SourceId::Okx];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Bybit => "bybit",
            SourceId::Kucoin => "kucoin",
            SourceId::Okx => "okx",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bybit" => Ok(SourceId::Bybit),
            "kucoin" => Ok(SourceId::Kucoin),
            "okx" => Ok(SourceId::Okx),
            other => Err(format!("unknown data source '{other}'")),
        }
    }
}

/// Supported candle timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour12,
    Day1,
}

impl Timeframe {
    /// Length of one candle in minutes
    pub fn minutes(&self) -> u64 {
        match self {
            Timeframe::Min1 => 1,
            Timeframe::Min3 => 3,
            Timeframe::Min5 => 5,
            Timeframe::Min15 => 15,
            Timeframe::Min30 => 30,
            Timeframe::Hour1 => 60,
            Timeframe::Hour2 => 120,
            Timeframe::Hour4 => 240,
            Timeframe::Hour6 => 360,
            Timeframe::Hour12 => 720,
            Timeframe::Day1 => 1440,
        }
    }

    /// Get duration in seconds
    pub fn duration_secs(&self) -> u64 {
        self.minutes() * 60
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min3 => "3m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Min30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour2 => "2h",
            Timeframe::Hour4 => "4h",
            Timeframe::Hour6 => "6h",
            Timeframe::Hour12 => "12h",
            Timeframe::Day1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(Timeframe::Min1),
            "3m" => Ok(Timeframe::Min3),
            "5m" => Ok(Timeframe::Min5),
            "15m" | "15min" => Ok(Timeframe::Min15),
            "30m" => Ok(Timeframe::Min30),
            "1h" | "1hour" => Ok(Timeframe::Hour1),
            "2h" => Ok(Timeframe::Hour2),
            "4h" => Ok(Timeframe::Hour4),
            "6h" => Ok(Timeframe::Hour6),
            "12h" => Ok(Timeframe::Hour12),
            "1d" => Ok(Timeframe::Day1),
            other => Err(format!("unsupported timeframe '{other}'")),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.as_str().to_string()
    }
}

/// OHLCV candle, timestamps in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time (start of period)
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume in contracts or base currency, as the exchange reports it
    pub volume: f64,
}

/// One entry of a source's market catalog
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    /// Exchange-native instrument id (e.g. `BTCUSDT`, `XBTUSDTM`, `BTC-USDT-SWAP`)
    pub id: String,
    /// Unified symbol (e.g. `BTC/USDT:USDT`)
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub settle: Option<String>,
    pub is_swap: bool,
    pub is_linear: bool,
    pub active: bool,
}

/// Identity of one indicator series: who answered, for which market, at which timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub source: SourceId,
    pub market_symbol: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(source: SourceId, market_symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            source,
            market_symbol: market_symbol.into(),
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.source, self.market_symbol, self.timeframe)
    }
}

/// Split a `BASE/QUOTE` pair into its components.
pub fn split_pair(symbol: &str) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once('/')?;
    if base.is_empty() || quote.is_empty() || quote.contains('/') {
        return None;
    }
    Some((base, quote))
}

/// Build a unified derivative symbol (`BASE/QUOTE:SETTLE`).
pub fn unified_symbol(base: &str, quote: &str, settle: &str) -> String {
    format!("{}/{}:{}", base, quote, settle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parse_and_display() {
        assert_eq!("5m".parse::<Timeframe>(), Ok(Timeframe::Min5));
        assert_eq!(" 1H ".parse::<Timeframe>(), Ok(Timeframe::Hour1));
        assert_eq!(Timeframe::Hour4.to_string(), "4h");
        assert_eq!(Timeframe::Min15.duration_secs(), 900);
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_source_id_parse() {
        assert_eq!("OKX".parse::<SourceId>(), Ok(SourceId::Okx));
        assert_eq!(SourceId::Kucoin.to_string(), "kucoin");
        assert!("binance".parse::<SourceId>().is_err());
    }

    #[test]
    fn test_split_pair() {
        assert_eq!(split_pair("BTC/USDT"), Some(("BTC", "USDT")));
        assert_eq!(split_pair("BTCUSDT"), None);
        assert_eq!(split_pair("BTC/"), None);
        assert_eq!(split_pair("A/B/C"), None);
    }

    #[test]
    fn test_series_key_display() {
        let key = SeriesKey::new(SourceId::Bybit, "BTC/USDT:USDT", Timeframe::Min5);
        assert_eq!(key.to_string(), "bybit|BTC/USDT:USDT|5m");
    }
}
