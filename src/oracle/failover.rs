//! Failover Fetcher - first-success candle fetch across pinned / prioritized sources
//!
//! One attempt per eligible source per call, in registry order. Success pins
//! the source; failures are handled by kind:
//! - transient: source goes into cooldown
//! - stale market mapping: resolver cache entry evicted, no cooldown
//! - symbol not found / other: skip to the next candidate

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{FetchError, SourceError, SourceErrorKind};
use crate::oracle::registry::SourceRegistry;
use crate::oracle::resolver::MarketResolver;
use crate::oracle::sources::{MarketDataProvider, ProviderMap};
use crate::types::{Candle, SourceId, Timeframe};

/// Fetcher tuning
#[derive(Debug, Clone)]
pub struct FailoverSettings {
    /// Bound on each provider call (catalog load or candle fetch)
    pub request_timeout: Duration,
    /// How long a source sits out after a transient failure
    pub cooldown: Duration,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(15_000),
            cooldown: Duration::from_secs(120),
        }
    }
}

/// Pin moved from one source to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failover {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub from: SourceId,
    pub to: SourceId,
}

/// Successful fetch with provenance
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub source: SourceId,
    pub market_symbol: String,
    pub candles: Vec<Candle>,
    /// Set when this success replaced a different pinned source
    pub failover: Option<Failover>,
}

pub struct FailoverFetcher {
    providers: HashMap<SourceId, Arc<dyn MarketDataProvider>>,
    resolver: MarketResolver,
    registry: Mutex<SourceRegistry>,
    settings: FailoverSettings,
}

impl FailoverFetcher {
    /// Sources in `priority` without a constructed provider are dropped.
    pub fn new(providers: ProviderMap, priority: &[SourceId], settings: FailoverSettings) -> Self {
        let usable: Vec<SourceId> = priority
            .iter()
            .copied()
            .filter(|source| {
                let known = providers.contains_key(source);
                if !known {
                    warn!(source = %source, "No provider for prioritized source, skipping");
                }
                known
            })
            .collect();

        Self {
            providers,
            resolver: MarketResolver::new(settings.request_timeout),
            registry: Mutex::new(SourceRegistry::new(usable)),
            settings,
        }
    }

    pub fn resolver(&self) -> &MarketResolver {
        &self.resolver
    }

    /// Lock the registry (tests and diagnostics).
    pub async fn registry(&self) -> MutexGuard<'_, SourceRegistry> {
        self.registry.lock().await
    }

    pub fn settings(&self) -> &FailoverSettings {
        &self.settings
    }

    /// Fetch `limit` candles for (base_symbol, timeframe) from the first source that answers.
    pub async fn fetch(
        &self,
        base_symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<FetchOutcome, FetchError> {
        let candidates = self
            .registry
            .lock()
            .await
            .candidate_order(base_symbol, timeframe, Instant::now());

        debug!(
            symbol = %base_symbol,
            timeframe = %timeframe,
            candidates = ?candidates,
            "Candidate order"
        );

        let mut attempted = Vec::with_capacity(candidates.len());
        let mut last_error: Option<SourceError> = None;

        for source in candidates {
            let Some(provider) = self.providers.get(&source) else {
                continue;
            };
            attempted.push(source);

            match self.attempt(provider.as_ref(), base_symbol, timeframe, limit).await {
                Ok((market_symbol, candles)) => {
                    let previous = self
                        .registry
                        .lock()
                        .await
                        .mark_success(base_symbol, timeframe, source);

                    let failover = previous.map(|from| Failover {
                        symbol: base_symbol.to_string(),
                        timeframe,
                        from,
                        to: source,
                    });

                    if let Some(f) = failover.as_ref() {
                        info!(
                            symbol = %base_symbol,
                            timeframe = %timeframe,
                            from = %f.from,
                            to = %f.to,
                            "🔁 Failover: pinned source changed"
                        );
                    }

                    debug!(
                        source = %source,
                        market = %market_symbol,
                        timeframe = %timeframe,
                        candles = candles.len(),
                        "✅ Candles fetched"
                    );

                    return Ok(FetchOutcome {
                        source,
                        market_symbol,
                        candles,
                        failover,
                    });
                }
                Err(err) => {
                    self.handle_failure(source, &err, base_symbol, timeframe).await;
                    last_error = Some(err);
                }
            }
        }

        Err(FetchError::AllSourcesExhausted {
            symbol: base_symbol.to_string(),
            timeframe,
            attempted,
            last_error,
        })
    }

    async fn attempt(
        &self,
        provider: &dyn MarketDataProvider,
        base_symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<(String, Vec<Candle>), SourceError> {
        let source = provider.id();
        let market_symbol = self
            .resolver
            .resolve(provider, base_symbol)
            .await
            .map_err(SourceError::from)?;

        let candles = tokio::time::timeout(
            self.settings.request_timeout,
            provider.fetch_recent_candles(&market_symbol, timeframe, limit),
        )
        .await
        .map_err(|_| {
            SourceError::transient(
                source,
                format!(
                    "candle request timed out after {}ms",
                    self.settings.request_timeout.as_millis()
                ),
            )
        })??;

        Ok((market_symbol, candles))
    }

    /// Apply the failure policy to `source`, the provider that was tried.
    async fn handle_failure(
        &self,
        source: SourceId,
        err: &SourceError,
        base_symbol: &str,
        timeframe: Timeframe,
    ) {
        match effective_kind(err) {
            SourceErrorKind::Transient => {
                let until = self.registry.lock().await.mark_cooldown(
                    source,
                    Instant::now(),
                    self.settings.cooldown,
                );
                warn!(
                    source = %source,
                    symbol = %base_symbol,
                    timeframe = %timeframe,
                    error = %err,
                    cooldown_secs = until.saturating_duration_since(Instant::now()).as_secs(),
                    "🧊 Source failed, cooling down"
                );
            }
            SourceErrorKind::MarketMappingStale => {
                self.resolver.evict(source, base_symbol).await;
                warn!(
                    source = %source,
                    symbol = %base_symbol,
                    timeframe = %timeframe,
                    error = %err,
                    "Market mapping looks stale, trying next source"
                );
            }
            SourceErrorKind::SymbolNotFound | SourceErrorKind::Other => {
                warn!(
                    source = %source,
                    symbol = %base_symbol,
                    timeframe = %timeframe,
                    error = %err,
                    "Source failed, trying next source"
                );
            }
        }
    }
}

/// Providers that could not type an error get the text heuristic.
fn effective_kind(err: &SourceError) -> SourceErrorKind {
    match err.kind {
        SourceErrorKind::Other => SourceError::classify(err.source_id, err.message.clone()).kind,
        kind => kind,
    }
}
