//! Market data provider implementations (Bybit, KuCoin, OKX)
//!
//! Every exchange is reached through [`MarketDataProvider`]. Adapters own a
//! [`MarketCatalog`] that maps unified symbols (`BTC/USDT:USDT`) to the
//! exchange-native instrument id and classify their own failures.

mod bybit;
mod http;
mod kucoin;
mod okx;

pub use bybit::BybitClient;
pub use http::{HttpTransport, RequestThrottle, TransportSettings};
pub use kucoin::KucoinClient;
pub use okx::OkxClient;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::SourceError;
use crate::types::{Candle, MarketInfo, SourceId, Timeframe};

/// Convenience alias for provider results.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Constructed providers keyed by source identifier.
pub type ProviderMap = HashMap<SourceId, Arc<dyn MarketDataProvider>>;

/// Trait for candle data sources
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Source this provider answers for
    fn id(&self) -> SourceId;

    /// Load the market catalog (refreshes the provider's symbol mapping)
    async fn list_active_markets(&self) -> SourceResult<Vec<MarketInfo>>;

    /// Fetch the `limit` most recent candles, ordered oldest to newest
    async fn fetch_recent_candles(
        &self,
        market_symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> SourceResult<Vec<Candle>>;
}

/// Unified symbol -> native id mapping, refreshed on every catalog load.
#[derive(Debug, Default)]
pub struct MarketCatalog {
    ids: RwLock<HashMap<String, String>>,
}

impl MarketCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, markets: &[MarketInfo]) {
        let mut ids = self.ids.write().await;
        ids.clear();
        for market in markets {
            ids.insert(market.symbol.clone(), market.id.clone());
        }
    }

    /// Native id for a unified symbol. An unknown symbol means the caller's
    /// mapping predates the last catalog load.
    pub async fn native_id(&self, source_id: SourceId, symbol: &str) -> SourceResult<String> {
        self.ids.read().await.get(symbol).cloned().ok_or_else(|| {
            SourceError::stale(source_id, format!("unknown market symbol {}", symbol))
        })
    }

    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }
}

/// Build one provider per configured source, in priority order.
pub fn build_providers(priority: &[SourceId], settings: &TransportSettings) -> Result<ProviderMap> {
    let mut providers: ProviderMap = HashMap::new();
    for &source in priority {
        if providers.contains_key(&source) {
            continue;
        }
        let provider: Arc<dyn MarketDataProvider> = match source {
            SourceId::Bybit => Arc::new(BybitClient::new(settings)?),
            SourceId::Kucoin => Arc::new(KucoinClient::new(settings)?),
            SourceId::Okx => Arc::new(OkxClient::new(settings)?),
        };
        tracing::debug!(source = %source, "Market data provider constructed");
        providers.insert(source, provider);
    }
    Ok(providers)
}

/// Sort by open time, drop duplicate periods and keep the newest `limit`.
pub(crate) fn normalize_candles(mut candles: Vec<Candle>, limit: usize) -> Vec<Candle> {
    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    if candles.len() > limit {
        let excess = candles.len() - limit;
        candles.drain(..excess);
    }
    candles
}

/// Read a JSON number or numeric string as f64.
pub(crate) fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read a JSON number or numeric string as i64.
pub(crate) fn value_as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Parse `[ts, open, high, low, close, volume, ...]` rows.
pub(crate) fn parse_ohlcv_rows(rows: &[Vec<serde_json::Value>]) -> Vec<Candle> {
    rows.iter()
        .filter_map(|row| {
            if row.len() < 6 {
                return None;
            }
            Some(Candle {
                open_time: value_as_i64(&row[0])?,
                open: value_as_f64(&row[1])?,
                high: value_as_f64(&row[2])?,
                low: value_as_f64(&row[3])?,
                close: value_as_f64(&row[4])?,
                volume: value_as_f64(&row[5])?,
            })
        })
        .collect()
}
