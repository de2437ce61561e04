//! Failover Fetcher behaviour across scripted sources

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use perpwatch::error::{FetchError, SourceError, SourceErrorKind};
use perpwatch::oracle::sources::{MarketDataProvider, ProviderMap, SourceResult};
use perpwatch::oracle::{Failover, FailoverFetcher, FailoverSettings};
use perpwatch::types::{Candle, MarketInfo, SourceId, Timeframe};
use support::{perp_market, provider_map, ScriptedProvider, MARKET, SYMBOL};
use tokio::time::Instant;

const TF: Timeframe = Timeframe::Min5;
const LIMIT: usize = 100;

fn settings() -> FailoverSettings {
    FailoverSettings {
        request_timeout: Duration::from_secs(1),
        cooldown: Duration::from_secs(120),
    }
}

struct Setup {
    bybit: Arc<ScriptedProvider>,
    kucoin: Arc<ScriptedProvider>,
    okx: Arc<ScriptedProvider>,
    fetcher: FailoverFetcher,
}

fn setup_with(bybit: ScriptedProvider, kucoin: ScriptedProvider, okx: ScriptedProvider) -> Setup {
    let bybit = Arc::new(bybit);
    let kucoin = Arc::new(kucoin);
    let okx = Arc::new(okx);
    let providers = provider_map(&[bybit.clone(), kucoin.clone(), okx.clone()]);
    let fetcher = FailoverFetcher::new(providers, &SourceId::DEFAULT_PRIORITY, settings());
    Setup {
        bybit,
        kucoin,
        okx,
        fetcher,
    }
}

fn setup() -> Setup {
    setup_with(
        ScriptedProvider::new(SourceId::Bybit),
        ScriptedProvider::new(SourceId::Kucoin),
        ScriptedProvider::new(SourceId::Okx),
    )
}

#[tokio::test]
async fn test_first_success_pins_source() {
    let s = setup();

    let outcome = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(outcome.source, SourceId::Bybit);
    assert_eq!(outcome.market_symbol, MARKET);
    assert!(outcome.failover.is_none());
    assert!(!outcome.candles.is_empty());

    assert_eq!(s.fetcher.registry().await.pin(SYMBOL, TF), Some(SourceId::Bybit));
    assert_eq!(s.kucoin.candle_calls(), 0);
    assert_eq!(s.okx.candle_calls(), 0);

    // cached market: the catalog is not reloaded
    s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(s.bybit.catalog_calls(), 1);
    assert_eq!(s.bybit.candle_calls(), 2);
}

#[tokio::test]
async fn test_transient_failure_moves_pin_and_reports_failover() {
    let s = setup();
    s.bybit.fail_always(SourceErrorKind::Transient, "503 service unavailable");

    // no prior pin: kucoin takes over silently
    let first = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(first.source, SourceId::Kucoin);
    assert!(first.failover.is_none());
    assert!(s
        .fetcher
        .registry()
        .await
        .is_cooling_down(SourceId::Bybit, Instant::now()));

    // pinned kucoin fails; bybit is still cooling down, okx answers
    s.kucoin.push(Err(SourceError::transient(
        SourceId::Kucoin,
        "connection reset",
    )));
    let second = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(second.source, SourceId::Okx);
    assert_eq!(
        second.failover,
        Some(Failover {
            symbol: SYMBOL.to_string(),
            timeframe: TF,
            from: SourceId::Kucoin,
            to: SourceId::Okx,
        })
    );
    assert_eq!(s.bybit.candle_calls(), 1);
    assert_eq!(s.fetcher.registry().await.pin(SYMBOL, TF), Some(SourceId::Okx));
}

#[tokio::test]
async fn test_pins_are_per_timeframe() {
    let s = setup();
    s.fetcher.fetch(SYMBOL, Timeframe::Min5, LIMIT).await.unwrap();

    s.bybit.fail_always(SourceErrorKind::Transient, "429 too many requests");
    let hourly = s.fetcher.fetch(SYMBOL, Timeframe::Hour1, LIMIT).await.unwrap();
    assert_eq!(hourly.source, SourceId::Kucoin);
    assert!(hourly.failover.is_none());

    let registry = s.fetcher.registry().await;
    assert_eq!(registry.pin(SYMBOL, Timeframe::Min5), Some(SourceId::Bybit));
    assert_eq!(registry.pin(SYMBOL, Timeframe::Hour1), Some(SourceId::Kucoin));
}

#[tokio::test]
async fn test_exhaustion_then_empty_cycle() {
    let s = setup();
    for p in [&s.bybit, &s.kucoin, &s.okx] {
        p.fail_always(SourceErrorKind::Transient, "timed out");
    }

    let err = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap_err();
    let FetchError::AllSourcesExhausted {
        attempted,
        last_error,
        ..
    } = err;
    assert_eq!(attempted, SourceId::DEFAULT_PRIORITY.to_vec());
    assert_eq!(last_error.map(|e| e.source_id), Some(SourceId::Okx));

    // everything is cooling down: nothing is attempted
    let err = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap_err();
    let FetchError::AllSourcesExhausted {
        attempted,
        last_error,
        ..
    } = err;
    assert!(attempted.is_empty());
    assert!(last_error.is_none());
    for p in [&s.bybit, &s.kucoin, &s.okx] {
        assert_eq!(p.candle_calls(), 1);
    }
    assert_eq!(s.fetcher.registry().await.pin(SYMBOL, TF), None);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_expires() {
    let s = setup();
    s.bybit
        .push(Err(SourceError::transient(SourceId::Bybit, "403 forbidden")));

    let first = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(first.source, SourceId::Kucoin);
    let until = s.fetcher.registry().await.cooldown_until(SourceId::Bybit).unwrap();

    tokio::time::advance(Duration::from_secs(119)).await;
    assert!(s
        .fetcher
        .registry()
        .await
        .is_cooling_down(SourceId::Bybit, Instant::now()));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(Instant::now() >= until);
    assert!(!s
        .fetcher
        .registry()
        .await
        .is_cooling_down(SourceId::Bybit, Instant::now()));

    // recovered bybit is eligible again, behind the kucoin pin
    s.kucoin.push(Err(SourceError::transient(
        SourceId::Kucoin,
        "502 bad gateway",
    )));
    let outcome = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(outcome.source, SourceId::Bybit);
    assert_eq!(
        outcome.failover.map(|f| (f.from, f.to)),
        Some((SourceId::Kucoin, SourceId::Bybit))
    );
}

#[tokio::test]
async fn test_stale_mapping_evicts_without_cooldown() {
    let s = setup_with(
        ScriptedProvider::new(SourceId::Bybit)
            .then_fail(SourceErrorKind::MarketMappingStale, "symbol invalid"),
        ScriptedProvider::new(SourceId::Kucoin),
        ScriptedProvider::new(SourceId::Okx),
    );

    let first = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(first.source, SourceId::Kucoin);
    assert_eq!(s.fetcher.resolver().cached(SourceId::Bybit, SYMBOL).await, None);
    assert!(!s
        .fetcher
        .registry()
        .await
        .is_cooling_down(SourceId::Bybit, Instant::now()));

    // pinned kucoin breaks; bybit re-resolves from a fresh catalog
    s.kucoin.push(Err(SourceError::transient(
        SourceId::Kucoin,
        "timeout",
    )));
    let second = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(second.source, SourceId::Bybit);
    assert_eq!(s.bybit.catalog_calls(), 2);
    assert_eq!(
        s.fetcher.resolver().cached(SourceId::Bybit, SYMBOL).await.as_deref(),
        Some(MARKET)
    );
}

#[tokio::test]
async fn test_untyped_error_is_classified_by_text() {
    let s = setup_with(
        ScriptedProvider::new(SourceId::Bybit)
            .then_fail(SourceErrorKind::Other, "Access restricted in your region"),
        ScriptedProvider::new(SourceId::Kucoin),
        ScriptedProvider::new(SourceId::Okx),
    );

    let outcome = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(outcome.source, SourceId::Kucoin);
    assert!(s
        .fetcher
        .registry()
        .await
        .is_cooling_down(SourceId::Bybit, Instant::now()));
}

#[tokio::test]
async fn test_missing_market_skips_source_without_cooldown() {
    let s = setup_with(
        ScriptedProvider::new(SourceId::Bybit).without_markets(),
        ScriptedProvider::new(SourceId::Kucoin),
        ScriptedProvider::new(SourceId::Okx),
    );

    let outcome = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(outcome.source, SourceId::Kucoin);
    assert_eq!(s.bybit.candle_calls(), 0);
    assert!(!s
        .fetcher
        .registry()
        .await
        .is_cooling_down(SourceId::Bybit, Instant::now()));

    // failures are not cached: the next attempt reloads the catalog
    s.kucoin.push(Err(SourceError::transient(
        SourceId::Kucoin,
        "timeout",
    )));
    let outcome = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(outcome.source, SourceId::Okx);
    assert_eq!(s.bybit.catalog_calls(), 2);
}

#[tokio::test]
async fn test_failure_is_charged_to_the_source_that_was_tried() {
    // bybit reports an error tagged with another source id
    let s = setup_with(
        ScriptedProvider::new(SourceId::Bybit).then(Err(SourceError::transient(
            SourceId::Okx,
            "503 service unavailable",
        ))),
        ScriptedProvider::new(SourceId::Kucoin),
        ScriptedProvider::new(SourceId::Okx),
    );

    let outcome = s.fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(outcome.source, SourceId::Kucoin);

    let registry = s.fetcher.registry().await;
    assert!(registry.is_cooling_down(SourceId::Bybit, Instant::now()));
    assert!(!registry.is_cooling_down(SourceId::Okx, Instant::now()));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_catalog_load() {
    let s = setup_with(
        ScriptedProvider::new(SourceId::Bybit)
            .with_catalog_delay(Duration::from_millis(50)),
        ScriptedProvider::new(SourceId::Kucoin),
        ScriptedProvider::new(SourceId::Okx),
    );

    let timeframes = [Timeframe::Min5, Timeframe::Min15, Timeframe::Hour1];
    let outcomes = join_all(
        timeframes
            .iter()
            .map(|&tf| s.fetcher.fetch(SYMBOL, tf, LIMIT)),
    )
    .await;

    for outcome in outcomes {
        assert_eq!(outcome.unwrap().source, SourceId::Bybit);
    }
    assert_eq!(s.bybit.catalog_calls(), 1);
    assert_eq!(s.bybit.candle_calls(), 3);
}

struct HangingProvider;

#[async_trait]
impl MarketDataProvider for HangingProvider {
    fn id(&self) -> SourceId {
        SourceId::Bybit
    }

    async fn list_active_markets(&self) -> SourceResult<Vec<MarketInfo>> {
        Ok(vec![perp_market(SourceId::Bybit)])
    }

    async fn fetch_recent_candles(
        &self,
        _market_symbol: &str,
        _timeframe: Timeframe,
        _limit: usize,
    ) -> SourceResult<Vec<Candle>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_transient() {
    let okx = Arc::new(ScriptedProvider::new(SourceId::Okx));
    let mut providers = ProviderMap::new();
    providers.insert(SourceId::Bybit, Arc::new(HangingProvider));
    providers.insert(SourceId::Okx, okx.clone());
    let fetcher = FailoverFetcher::new(providers, &[SourceId::Bybit, SourceId::Okx], settings());

    let outcome = fetcher.fetch(SYMBOL, TF, LIMIT).await.unwrap();
    assert_eq!(outcome.source, SourceId::Okx);
    assert!(fetcher
        .registry()
        .await
        .is_cooling_down(SourceId::Bybit, Instant::now()));
}
