//! Indicator Evaluator - RSI over fetched candles
//!
//! Reports the second-to-last RSI as `previous` and the last as `current`.
//! The last candle is usually still forming, so the pair lags one bar.

mod rsi;

pub use rsi::rsi;

use crate::error::IndicatorError;
use crate::types::{Candle, SeriesKey, SourceId, Timeframe};

/// Previous / current indicator pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorReading {
    pub previous: f64,
    pub current: f64,
}

/// A reading tagged with the series that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub key: SeriesKey,
    pub previous: f64,
    pub current: f64,
}

#[derive(Debug, Clone)]
pub struct IndicatorEvaluator {
    period: usize,
}

impl IndicatorEvaluator {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Candles needed for a previous/current pair
    pub fn required_candles(&self) -> usize {
        self.period + 2
    }

    pub fn evaluate(&self, candles: &[Candle]) -> Result<IndicatorReading, IndicatorError> {
        let required = self.required_candles();
        let insufficient = || IndicatorError::InsufficientData {
            required,
            available: candles.len(),
        };

        if candles.len() < required {
            tracing::debug!(
                candle_count = candles.len(),
                required,
                "RSI: Not enough candles"
            );
            return Err(insufficient());
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let values = rsi(&closes, self.period);

        match &values[values.len() - 2..] {
            [Some(previous), Some(current)] => Ok(IndicatorReading {
                previous: *previous,
                current: *current,
            }),
            _ => Err(insufficient()),
        }
    }

    /// Evaluate and attach provenance.
    pub fn observe(
        &self,
        source: SourceId,
        market_symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<Observation, IndicatorError> {
        let reading = self.evaluate(candles)?;
        Ok(Observation {
            key: SeriesKey::new(source, market_symbol, timeframe),
            previous: reading.previous,
            current: reading.current,
        })
    }
}

impl Default for IndicatorEvaluator {
    fn default() -> Self {
        Self::new(14)
    }
}
