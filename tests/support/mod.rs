//! Shared fixtures for integration tests: scripted providers and a recording sink

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use perpwatch::alerts::AlertSink;
use perpwatch::error::{SourceError, SourceErrorKind};
use perpwatch::oracle::sources::{MarketDataProvider, ProviderMap, SourceResult};
use perpwatch::types::{Candle, MarketInfo, SourceId, Timeframe};

pub const SYMBOL: &str = "BTC/USDT";
pub const MARKET: &str = "BTC/USDT:USDT";

pub fn candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            open_time: 1_700_000_000_000 + i as i64 * 60_000,
            open: close,
            high: close,
            low: close,
            close,
            volume: 10.0,
        })
        .collect()
}

/// Alternating closes; RSI(3) ends around 40 → 60.
pub fn choppy() -> Vec<f64> {
    [10.0, 11.0].repeat(5)
}

/// RSI(3) goes ~52 → ~85 on the last bar.
pub fn spike_up() -> Vec<f64> {
    let mut closes = choppy();
    closes.extend([10.0, 10.5, 14.0]);
    closes
}

/// RSI(3) goes ~44 → ~11 on the last bar.
pub fn spike_down() -> Vec<f64> {
    let mut closes = choppy();
    closes.extend([11.0, 10.5, 7.0]);
    closes
}

pub fn perp_market(source: SourceId) -> MarketInfo {
    let id = match source {
        SourceId::Bybit => "BTCUSDT",
        SourceId::Kucoin => "XBTUSDTM",
        SourceId::Okx => "BTC-USDT-SWAP",
    };
    MarketInfo {
        id: id.to_string(),
        symbol: MARKET.to_string(),
        base: "BTC".to_string(),
        quote: "USDT".to_string(),
        settle: Some("USDT".to_string()),
        is_swap: true,
        is_linear: true,
        active: true,
    }
}

/// Provider answering from a queue of scripted candle responses.
///
/// Once the queue is empty every call returns the fallback response.
pub struct ScriptedProvider {
    id: SourceId,
    markets: Vec<MarketInfo>,
    script: Mutex<VecDeque<SourceResult<Vec<Candle>>>>,
    fallback: Mutex<SourceResult<Vec<Candle>>>,
    catalog_delay: Option<Duration>,
    catalog_calls: AtomicUsize,
    candle_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            markets: vec![perp_market(id)],
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(candles(&choppy()))),
            catalog_delay: None,
            catalog_calls: AtomicUsize::new(0),
            candle_calls: AtomicUsize::new(0),
        }
    }

    /// Catalog without any market for the watched pair.
    pub fn without_markets(mut self) -> Self {
        self.markets.clear();
        self
    }

    /// Catalog loads sleep for `delay` before answering.
    pub fn with_catalog_delay(mut self, delay: Duration) -> Self {
        self.catalog_delay = Some(delay);
        self
    }

    pub fn then(self, response: SourceResult<Vec<Candle>>) -> Self {
        self.push(response);
        self
    }

    pub fn then_fail(self, kind: SourceErrorKind, message: &str) -> Self {
        let id = self.id;
        self.then(Err(SourceError::new(id, kind, message)))
    }

    pub fn push(&self, response: SourceResult<Vec<Candle>>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn set_fallback(&self, response: SourceResult<Vec<Candle>>) {
        *self.fallback.lock().unwrap() = response;
    }

    pub fn fail_always(&self, kind: SourceErrorKind, message: &str) {
        self.set_fallback(Err(SourceError::new(self.id, kind, message)));
    }

    pub fn succeed_with(&self, closes: &[f64]) {
        self.set_fallback(Ok(candles(closes)));
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    pub fn candle_calls(&self) -> usize {
        self.candle_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    fn id(&self) -> SourceId {
        self.id
    }

    async fn list_active_markets(&self) -> SourceResult<Vec<MarketInfo>> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.catalog_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.markets.clone())
    }

    async fn fetch_recent_candles(
        &self,
        market_symbol: &str,
        _timeframe: Timeframe,
        limit: usize,
    ) -> SourceResult<Vec<Candle>> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        if !self.markets.iter().any(|m| m.symbol == market_symbol) {
            return Err(SourceError::stale(
                self.id,
                format!("unknown market symbol {}", market_symbol),
            ));
        }
        let next = self.script.lock().unwrap().pop_front();
        let response = next.unwrap_or_else(|| self.fallback.lock().unwrap().clone());
        response.map(|mut c| {
            if c.len() > limit {
                c.drain(..c.len() - limit);
            }
            c
        })
    }
}

pub fn provider_map(providers: &[Arc<ScriptedProvider>]) -> ProviderMap {
    providers
        .iter()
        .map(|p| {
            let provider: Arc<dyn MarketDataProvider> = p.clone();
            (p.id(), provider)
        })
        .collect()
}

/// Sink that keeps every delivered message.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
