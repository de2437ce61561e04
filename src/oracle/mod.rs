//! Oracle module - Multi-exchange candle access
//!
//! Resolves the perpetual market on each exchange, tracks source health and
//! pins, and fetches candles from the first source that answers.

pub mod failover;
pub mod registry;
pub mod resolver;
pub mod sources;

pub use failover::{Failover, FailoverFetcher, FailoverSettings, FetchOutcome};
pub use registry::SourceRegistry;
pub use resolver::{select_perp_market, MarketResolver};
pub use sources::{build_providers, MarketDataProvider, ProviderMap};
