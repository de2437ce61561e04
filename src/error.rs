//! Error taxonomy for data acquisition and signal evaluation
//!
//! Provider adapters classify their own failures into a [`SourceErrorKind`];
//! the failover fetcher decides cooldown / cache eviction from that kind alone.

use thiserror::Error;

use crate::types::{SourceId, Timeframe};

/// How a failed source attempt should be treated by the failover fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Network failure, timeout, rate limit, unavailable or access-restricted.
    /// Puts the source in cooldown.
    Transient,
    /// The requested market does not exist on this source. No cooldown.
    SymbolNotFound,
    /// A candle fetch rejected a previously resolved market symbol.
    /// Evicts the resolver cache entry. No cooldown.
    MarketMappingStale,
    /// Anything else (bad payload, unexpected API error).
    Other,
}

impl std::fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SourceErrorKind::Transient => "transient",
            SourceErrorKind::SymbolNotFound => "symbol not found",
            SourceErrorKind::MarketMappingStale => "stale market mapping",
            SourceErrorKind::Other => "error",
        };
        f.write_str(label)
    }
}

/// Failure reported by one market data provider.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{source_id} {kind}: {message}")]
pub struct SourceError {
    pub source_id: SourceId,
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(source_id: SourceId, kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            source_id,
            kind,
            message: message.into(),
        }
    }

    pub fn transient(source_id: SourceId, message: impl Into<String>) -> Self {
        Self::new(source_id, SourceErrorKind::Transient, message)
    }

    pub fn symbol_not_found(source_id: SourceId, message: impl Into<String>) -> Self {
        Self::new(source_id, SourceErrorKind::SymbolNotFound, message)
    }

    pub fn stale(source_id: SourceId, message: impl Into<String>) -> Self {
        Self::new(source_id, SourceErrorKind::MarketMappingStale, message)
    }

    pub fn other(source_id: SourceId, message: impl Into<String>) -> Self {
        Self::new(source_id, SourceErrorKind::Other, message)
    }

    /// Text-based classification for failures an adapter cannot type itself.
    ///
    /// Access restrictions count as transient (the source is cooled down, not
    /// dropped). Wording about symbols, markets or instruments is read as a
    /// stale market mapping.
    pub fn classify(source_id: SourceId, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let kind = if lower.contains("restricted")
            || lower.contains("forbidden")
            || lower.contains("403")
        {
            SourceErrorKind::Transient
        } else if lower.contains("symbol")
            || lower.contains("market")
            || lower.contains("instrument")
        {
            SourceErrorKind::MarketMappingStale
        } else {
            SourceErrorKind::Other
        };
        Self::new(source_id, kind, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == SourceErrorKind::Transient
    }
}

/// Market resolution failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("perpetual market for {symbol} not found on {source_id}")]
    MarketNotFound { source_id: SourceId, symbol: String },

    #[error(transparent)]
    Provider(#[from] SourceError),
}

impl From<ResolveError> for SourceError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::MarketNotFound { source_id, .. } => {
                SourceError::symbol_not_found(source_id, err.to_string())
            }
            ResolveError::Provider(inner) => inner,
        }
    }
}

/// Failover fetch failure for one (symbol, timeframe).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error(
        "no source answered for {symbol} {timeframe}; attempted [{}]; last error: {}",
        join_sources(.attempted),
        describe_last(.last_error)
    )]
    AllSourcesExhausted {
        symbol: String,
        timeframe: Timeframe,
        attempted: Vec<SourceId>,
        last_error: Option<SourceError>,
    },
}

fn join_sources(sources: &[SourceId]) -> String {
    sources
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_last(err: &Option<SourceError>) -> String {
    match err {
        Some(e) => e.to_string(),
        None => "none (no eligible source)".to_string(),
    }
}

/// Indicator evaluation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndicatorError {
    #[error("insufficient data: need {required} candles, got {available}")]
    InsufficientData { required: usize, available: usize },
}

/// Failure of one timeframe within a monitor tick. Never fatal to the loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),
}
