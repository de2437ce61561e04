//! OKX REST client for SWAP instruments

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

const OKX_REST_URL: &str = "https://www.okx.com";
const OKX_MIN_INTERVAL: Duration = Duration::from_millis(110);
const OKX_MAX_CANDLES: usize = 300;

#[derive(Debug, Clone, Deserialize)]
struct OkxResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxInstrument {
    inst_id: String,
    #[serde(default)]
    uly: String,
    #[serde(default)]
    inst_family: String,
    #[serde(default)]
    settle_ccy: String,
    #[serde(default)]
    ct_type: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug)]
pub struct OkxClient {
    transport: HttpTransport,
    catalog: MarketCatalog,
    base_url: String,
}

impl OkxClient {
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(SourceId::Okx, settings, OKX_MIN_INTERVAL)?,
            catalog: MarketCatalog::new(),
            base_url: OKX_REST_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn bar(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::Min1 => "1m",
            Timeframe::Min3 => "3m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Min30 => "30m",
            Timeframe::Hour1 => "1H",
            Timeframe::Hour2 => "2H",
            Timeframe::Hour4 => "4H",
            Timeframe::Hour6 => "6H",
            Timeframe::Hour12 => "12H",
            Timeframe::Day1 => "1D",
        }
    }

    fn unwrap_data<T>(response: OkxResponse<T>) -> SourceResult<Vec<T>> {
        if response.code != "0" {
            return Err(classify_code(&response.code, &response.msg));
        }
        Ok(response.data)
    }
}

#[async_trait]
impl MarketDataProvider for OkxClient {
    fn id(&self) -> SourceId {
        SourceId::Okx
    }

    async fn list_active_markets(&self) -> SourceResult<Vec<MarketInfo>> {
        let url = format!("{}/api/v5/public/instruments", self.base_url);
        let query = [("instType", "SWAP".to_string())];
        let response: OkxResponse<OkxInstrument> = self.transport.get_json(&url, &query).await?;
        let instruments = Self::unwrap_data(response)?;

        let markets: Vec<MarketInfo> = instruments
            .iter()
            .filter_map(instrument_to_market)
            .collect();
        self.catalog.replace(&markets).await;
        tracing::info!(source = %"okx", markets = markets.len(), "📥 Market catalog loaded");
        Ok(markets)
    }

    async fn fetch_recent_candles(
        &self,
        market_symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> SourceResult<Vec<Candle>> {
        let native_id = self.catalog.native_id(SourceId::Okx, market_symbol).await?;
        let limit = limit.min(OKX_MAX_CANDLES);

        let url = format!("{}/api/v5/market/candles", self.base_url);
        let query = [
            ("instId", native_id),
            ("bar", Self::bar(timeframe).to_string()),
            ("limit", limit.to_string()),
        ];

        // [ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm], newest first
        let response: OkxResponse<Vec<serde_json::Value>> =
            self.transport.get_json(&url, &query).await?;
        let rows = Self::unwrap_data(response)?;

        Ok(normalize_candles(parse_ohlcv_rows(&rows), limit))
    }
}

/// Underlying is `BASE-QUOTE`; instruments without one are skipped.
fn instrument_to_market(inst: &OkxInstrument) -> Option<MarketInfo> {
    let underlying = if inst.uly.is_empty() {
        &inst.inst_family
    } else {
        &inst.uly
    };
    let (base, quote) = underlying.split_once('-')?;
    let settle = if inst.settle_ccy.is_empty() {
        quote.to_string()
    } else {
        inst.settle_ccy.clone()
    };

    Some(MarketInfo {
        id: inst.inst_id.clone(),
        symbol: unified_symbol(base, quote, &settle),
        base: base.to_string(),
        quote: quote.to_string(),
        settle: Some(settle),
        is_swap: inst.inst_id.ends_with("-SWAP"),
        is_linear: inst.ct_type == "linear",
        active: inst.state == "live",
    })
}

fn classify_code(code: &str, message: &str) -> SourceError {
    let text = format!("code {}: {}", code, message);
    match code {
        // service unavailable, timeout, rate limit, system busy
        "50001" | "50004" | "50011" | "50013" => SourceError::transient(SourceId::Okx, text),
        // instrument does not exist
        "51001" => SourceError::stale(SourceId::Okx, text),
        _ => SourceError::classify(SourceId::Okx, text),
    }
}
