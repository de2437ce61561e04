//! Market Resolver - maps a `BASE/QUOTE` pair to a source's perpetual market
//!
//! The catalog is loaded only on a cache miss; entries stay until the
//! failover fetcher evicts them. Concurrent misses on the same
//! (source, symbol) share one catalog load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ResolveError, SourceError};
use crate::oracle::sources::MarketDataProvider;
use crate::types::{split_pair, MarketInfo, SourceId};

pub struct MarketResolver {
    /// (source, base symbol) -> resolved market symbol
    cache: Mutex<HashMap<(SourceId, String), String>>,
    /// Per-key gate held for the duration of a catalog load
    inflight: Mutex<HashMap<(SourceId, String), Arc<Mutex<()>>>>,
    request_timeout: Duration,
}

impl MarketResolver {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            request_timeout,
        }
    }

    /// Resolve the tradable perpetual market for `base_symbol` on `provider`.
    pub async fn resolve(
        &self,
        provider: &dyn MarketDataProvider,
        base_symbol: &str,
    ) -> Result<String, ResolveError> {
        let source = provider.id();
        let key = (source, base_symbol.to_string());

        if let Some(hit) = self.cached(source, base_symbol).await {
            debug!(source = %source, symbol = %base_symbol, market = %hit, "Market cache hit");
            return Ok(hit);
        }

        let gate = self
            .inflight
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone();
        let _loading = gate.lock().await;

        // another task may have filled the entry while we waited
        if let Some(hit) = self.cached(source, base_symbol).await {
            return Ok(hit);
        }

        let not_found = || ResolveError::MarketNotFound {
            source_id: source,
            symbol: base_symbol.to_string(),
        };

        if split_pair(base_symbol).is_none() {
            return Err(not_found());
        }

        let markets = tokio::time::timeout(self.request_timeout, provider.list_active_markets())
            .await
            .map_err(|_| {
                SourceError::transient(
                    source,
                    format!(
                        "market catalog request timed out after {}ms",
                        self.request_timeout.as_millis()
                    ),
                )
            })??;

        let chosen = select_perp_market(&markets, base_symbol).ok_or_else(not_found)?;

        info!(
            source = %source,
            symbol = %base_symbol,
            market = %chosen,
            "🎯 Perpetual market resolved"
        );
        self.cache.lock().await.insert(key, chosen.clone());
        Ok(chosen)
    }

    /// Drop the cached entry so the next resolve reloads the catalog.
    pub async fn evict(&self, source: SourceId, base_symbol: &str) -> Option<String> {
        let removed = self
            .cache
            .lock()
            .await
            .remove(&(source, base_symbol.to_string()));
        if let Some(market) = removed.as_ref() {
            info!(
                source = %source,
                symbol = %base_symbol,
                market = %market,
                "Market cache entry evicted"
            );
        }
        removed
    }

    pub async fn cached(&self, source: SourceId, base_symbol: &str) -> Option<String> {
        self.cache
            .lock()
            .await
            .get(&(source, base_symbol.to_string()))
            .cloned()
    }
}

/// Pick the perpetual market for `base_symbol` from a catalog.
///
/// Candidates are active swaps whose base/quote match the pair. A linear
/// candidate wins, otherwise the first in catalog order. With no swap
/// candidate, an active market literally named `base_symbol` is accepted.
pub fn select_perp_market(markets: &[MarketInfo], base_symbol: &str) -> Option<String> {
    let (base, quote) = split_pair(base_symbol)?;

    let candidates: Vec<&MarketInfo> = markets
        .iter()
        .filter(|m| m.active && m.is_swap && m.base == base && m.quote == quote)
        .collect();

    if candidates.is_empty() {
        return markets
            .iter()
            .find(|m| m.active && m.symbol == base_symbol)
            .map(|m| m.symbol.clone());
    }

    candidates
        .iter()
        .find(|m| m.is_linear)
        .or_else(|| candidates.first())
        .map(|m| m.symbol.clone())
}
