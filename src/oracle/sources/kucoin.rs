//! KuCoin Futures REST client
//!
//! Contracts come from `/api/v1/contracts/active`, candles from
//! `/api/v1/kline/query` (granularity in minutes, time range in ms).

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{
    normalize_candles, parse_ohlcv_rows, HttpTransport, MarketCatalog, MarketDataProvider,
    SourceResult, TransportSettings,
};
use crate::error::SourceError;
use crate::types::{unified_symbol, Candle, MarketInfo, SourceId, Timeframe};

const KUCOIN_FUTURES_URL: &str = "https://api-futures.kucoin.com";
const KUCOIN_MIN_INTERVAL: Duration = Duration::from_millis(75);
const KUCOIN_MAX_KLINES: usize = 500;
const KUCOIN_OK: &str = "200000";
/// Perpetual contract type
const KUCOIN_PERPETUAL: &str = "FFWCSX";

#[derive(Debug, Clone, Deserialize)]
struct KucoinResponse<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KucoinContract {
    symbol: String,
    #[serde(rename = "type", default)]
    contract_type: String,
    base_currency: String,
    quote_currency: String,
    #[serde(default)]
    settle_currency: Option<String>,
    #[serde(default)]
    is_inverse: bool,
    #[serde(default)]
    status: String,
}

#[derive(Debug)]
pub struct KucoinClient {
    transport: HttpTransport,
    catalog: MarketCatalog,
    base_url: String,
}

impl KucoinClient {
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(SourceId::Kucoin, settings, KUCOIN_MIN_INTERVAL)?,
            catalog: MarketCatalog::new(),
            base_url: KUCOIN_FUTURES_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Granularity in minutes; KuCoin has no 3m or 6h bars.
    fn granularity(timeframe: Timeframe) -> Option<u64> {
        match timeframe {
            Timeframe::Min3 | Timeframe::Hour6 => None,
            other => Some(other.minutes()),
        }
    }

    fn unwrap_data<T>(response: KucoinResponse<T>) -> SourceResult<Option<T>> {
        if response.code != KUCOIN_OK {
            return Err(classify_code(&response.code, response.msg.as_deref().unwrap_or("")));
        }
        Ok(response.data)
    }
}

#[async_trait]
impl MarketDataProvider for KucoinClient {
    fn id(&self) -> SourceId {
        SourceId::Kucoin
    }

    async fn list_active_markets(&self) -> SourceResult<Vec<MarketInfo>> {
        let url = format!("{}/api/v1/contracts/active", self.base_url);
        let response: KucoinResponse<Vec<KucoinContract>> =
            self.transport.get_json(&url, &[]).await?;
        let contracts = Self::unwrap_data(response)?.unwrap_or_default();

        let markets: Vec<MarketInfo> = contracts.iter().map(contract_to_market).collect();
        self.catalog.replace(&markets).await;
        tracing::info!(source = %"kucoin", markets = markets.len(), "📥 Market catalog loaded");
        Ok(markets)
    }

    async fn fetch_recent_candles(
        &self,
        market_symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> SourceResult<Vec<Candle>> {
        let granularity = Self::granularity(timeframe).ok_or_else(|| {
            SourceError::other(
                SourceId::Kucoin,
                format!("timeframe {} not offered by kucoin futures", timeframe),
            )
        })?;
        let native_id = self.catalog.native_id(SourceId::Kucoin, market_symbol).await?;
        let limit = limit.min(KUCOIN_MAX_KLINES);

        let (from, to) = kline_window(chrono::Utc::now().timestamp_millis(), timeframe, limit);

        let url = format!("{}/api/v1/kline/query", self.base_url);
        let query = [
            ("symbol", native_id),
            ("granularity", granularity.to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ];

        let response: KucoinResponse<Vec<Vec<serde_json::Value>>> =
            self.transport.get_json(&url, &query).await?;
        parse_klines(response, limit)
    }
}

/// `(from, to)` in milliseconds covering `limit` bars plus the one still forming.
fn kline_window(to_ms: i64, timeframe: Timeframe, limit: usize) -> (i64, i64) {
    let span_ms = (limit as i64 + 1) * timeframe.duration_secs() as i64 * 1000;
    (to_ms - span_ms, to_ms)
}

fn parse_klines(
    response: KucoinResponse<Vec<Vec<serde_json::Value>>>,
    limit: usize,
) -> SourceResult<Vec<Candle>> {
    let rows = KucoinClient::unwrap_data(response)?.unwrap_or_default();
    Ok(normalize_candles(parse_ohlcv_rows(&rows), limit))
}

/// KuCoin lists bitcoin as XBT.
fn common_currency(code: &str) -> String {
    match code {
        "XBT" => "BTC".to_string(),
        other => other.to_string(),
    }
}

fn contract_to_market(contract: &KucoinContract) -> MarketInfo {
    let base = common_currency(&contract.base_currency);
    let quote = common_currency(&contract.quote_currency);
    let settle = contract
        .settle_currency
        .as_deref()
        .map(common_currency)
        .unwrap_or_else(|| quote.clone());
    let is_swap = contract.contract_type == KUCOIN_PERPETUAL;
    let mut symbol = unified_symbol(&base, &quote, &settle);
    if !is_swap {
        symbol = format!("{}-{}", symbol, contract.symbol);
    }

    MarketInfo {
        id: contract.symbol.clone(),
        symbol,
        base,
        quote,
        settle: Some(settle),
        is_swap,
        is_linear: !contract.is_inverse,
        active: contract.status == "Open",
    }
}

fn classify_code(code: &str, message: &str) -> SourceError {
    let text = format!("code {}: {}", code, message);
    let lower = message.to_lowercase();
    if code == "429000" || code.starts_with('5') {
        SourceError::transient(SourceId::Kucoin, text)
    } else if lower.contains("contract") {
        SourceError::stale(SourceId::Kucoin, text)
    } else {
        SourceError::classify(SourceId::Kucoin, text)
    }
}
