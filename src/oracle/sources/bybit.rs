//! Bybit REST client for perpetual-swap candles
//!
//! Uses the Bybit V5 public market endpoints (linear category).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use super::{
    normalize_candles, parse_ohlcv_rows, HttpTransport, MarketCatalog, MarketDataProvider,
    SourceResult, TransportSettings,
};
use crate::error::SourceError;
use crate::types::{unified_symbol, Candle, MarketInfo, SourceId, Timeframe};

const BYBIT_REST_URL: &str = "https://api.bybit.com";
const BYBIT_MIN_INTERVAL: Duration = Duration::from_millis(20);
const BYBIT_MAX_KLINES: usize = 1000;
const BYBIT_MAX_PAGES: usize = 10;

#[derive(Debug, Clone, Deserialize)]
struct BybitResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct InstrumentsResult {
    #[serde(default)]
    list: Vec<BybitInstrument>,
    #[serde(rename = "nextPageCursor", default)]
    next_page_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitInstrument {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    status: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    settle_coin: String,
    #[serde(default)]
    delivery_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug)]
pub struct BybitClient {
    transport: HttpTransport,
    catalog: MarketCatalog,
    base_url: String,
}

impl BybitClient {
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(SourceId::Bybit, settings, BYBIT_MIN_INTERVAL)?,
            catalog: MarketCatalog::new(),
            base_url: BYBIT_REST_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn interval(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::Min1 => "1",
            Timeframe::Min3 => "3",
            Timeframe::Min5 => "5",
            Timeframe::Min15 => "15",
            Timeframe::Min30 => "30",
            Timeframe::Hour1 => "60",
            Timeframe::Hour2 => "120",
            Timeframe::Hour4 => "240",
            Timeframe::Hour6 => "360",
            Timeframe::Hour12 => "720",
            Timeframe::Day1 => "D",
        }
    }

    fn unwrap_result<T: Default>(response: BybitResponse<T>) -> SourceResult<T> {
        if response.ret_code != 0 {
            return Err(classify_ret_code(response.ret_code, &response.ret_msg));
        }
        Ok(response.result.unwrap_or_default())
    }
}

#[async_trait]
impl MarketDataProvider for BybitClient {
    fn id(&self) -> SourceId {
        SourceId::Bybit
    }

    async fn list_active_markets(&self) -> SourceResult<Vec<MarketInfo>> {
        let endpoint = format!("{}/v5/market/instruments-info", self.base_url);
        let url = endpoint.as_str();
        let instruments = collect_instrument_pages(BYBIT_MAX_PAGES, move |cursor| {
            let mut query = vec![
                ("category", "linear".to_string()),
                ("limit", "1000".to_string()),
            ];
            if let Some(c) = cursor {
                query.push(("cursor", c));
            }
            async move {
                let response: BybitResponse<InstrumentsResult> =
                    self.transport.get_json(url, &query).await?;
                Self::unwrap_result(response)
            }
        })
        .await?;
        let markets: Vec<MarketInfo> = instruments.iter().map(instrument_to_market).collect();

        self.catalog.replace(&markets).await;
        tracing::info!(source = %"bybit", markets = markets.len(), "📥 Market catalog loaded");
        Ok(markets)
    }

    async fn fetch_recent_candles(
        &self,
        market_symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> SourceResult<Vec<Candle>> {
        let native_id = self.catalog.native_id(SourceId::Bybit, market_symbol).await?;
        let limit = limit.min(BYBIT_MAX_KLINES);

        let url = format!("{}/v5/market/kline", self.base_url);
        let query = [
            ("category", "linear".to_string()),
            ("symbol", native_id),
            ("interval", Self::interval(timeframe).to_string()),
            ("limit", limit.to_string()),
        ];

        let response: BybitResponse<KlineResult> = self.transport.get_json(&url, &query).await?;
        let result = Self::unwrap_result(response)?;

        // [startTime, open, high, low, close, volume, turnover], newest first
        Ok(normalize_candles(parse_ohlcv_rows(&result.list), limit))
    }
}

fn instrument_to_market(inst: &BybitInstrument) -> MarketInfo {
    let settle = if inst.settle_coin.is_empty() {
        inst.quote_coin.clone()
    } else {
        inst.settle_coin.clone()
    };
    let is_swap = inst.contract_type.ends_with("Perpetual");
    let mut symbol = unified_symbol(&inst.base_coin, &inst.quote_coin, &settle);
    if !is_swap {
        if let Some(expiry) = delivery_suffix(inst.delivery_time.as_deref()) {
            symbol = format!("{}-{}", symbol, expiry);
        } else {
            symbol = format!("{}-{}", symbol, inst.symbol);
        }
    }

    MarketInfo {
        id: inst.symbol.clone(),
        symbol,
        base: inst.base_coin.clone(),
        quote: inst.quote_coin.clone(),
        settle: Some(settle.clone()),
        is_swap,
        is_linear: inst.contract_type.starts_with("Linear") || settle == inst.quote_coin,
        active: inst.status == "Trading",
    }
}

/// `yymmdd` suffix for dated futures.
fn delivery_suffix(delivery_time: Option<&str>) -> Option<String> {
    let ms: i64 = delivery_time?.parse().ok().filter(|ms| *ms > 0)?;
    let dt = Utc.timestamp_millis_opt(ms).single()?;
    Some(dt.format("%y%m%d").to_string())
}

fn classify_ret_code(code: i64, message: &str) -> SourceError {
    let text = format!("retCode {}: {}", code, message);
    match code {
        // server timeout, server error, too many visits, IP rate limit
        10000 | 10016 | 10006 | 10018 => SourceError::transient(SourceId::Bybit, text),
        _ => SourceError::classify(SourceId::Bybit, text),
    }
}

/// Follow `nextPageCursor` until it runs out or `max_pages` pages are read.
async fn collect_instrument_pages<F, Fut>(
    max_pages: usize,
    mut fetch_page: F,
) -> SourceResult<Vec<BybitInstrument>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = SourceResult<InstrumentsResult>>,
{
    let mut instruments = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..max_pages {
        let page = fetch_page(cursor.take()).await?;
        instruments.extend(page.list);

        match page.next_page_cursor.filter(|c| !c.is_empty()) {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(instruments)
}
