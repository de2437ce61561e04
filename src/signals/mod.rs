//! Cross-Detection Engine - threshold crossings per indicator series
//!
//! The first observation of a series only records a baseline. Later
//! observations are checked with the freshly computed previous/current pair:
//! - below: `previous > low && current <= low`
//! - above: `previous < high && current >= high`

use std::collections::HashMap;
use std::fmt;

use crate::indicators::Observation;
use crate::types::SeriesKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossDirection {
    /// Downward through the low threshold
    Below,
    /// Upward through the high threshold
    Above,
}

impl fmt::Display for CrossDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrossDirection::Below => write!(f, "BELOW"),
            CrossDirection::Above => write!(f, "ABOVE"),
        }
    }
}

/// Threshold cross on one series
#[derive(Debug, Clone, PartialEq)]
pub struct CrossEvent {
    pub key: SeriesKey,
    pub direction: CrossDirection,
    pub threshold: f64,
    pub previous: f64,
    pub current: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: 30.0,
            high: 70.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrossDetector {
    thresholds: Thresholds,
    last_values: HashMap<SeriesKey, f64>,
}

impl CrossDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            last_values: HashMap::new(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Last stored value for a series, if it has been observed.
    pub fn last_value(&self, key: &SeriesKey) -> Option<f64> {
        self.last_values.get(key).copied()
    }

    pub fn is_tracking(&self, key: &SeriesKey) -> bool {
        self.last_values.contains_key(key)
    }

    /// Feed one observation; returns the crosses it produced.
    ///
    /// Threshold ordering is not checked.
    pub fn observe(&mut self, obs: &Observation) -> Vec<CrossEvent> {
        let Thresholds { low, high } = self.thresholds;

        let Some(stored) = self.last_values.get_mut(&obs.key) else {
            tracing::debug!(series = %obs.key, rsi = obs.current, "Baseline recorded");
            self.last_values.insert(obs.key.clone(), obs.current);
            return Vec::new();
        };
        *stored = obs.current;

        let mut events = Vec::new();
        if obs.previous > low && obs.current <= low {
            events.push(self.event(obs, CrossDirection::Below, low));
        }
        if obs.previous < high && obs.current >= high {
            events.push(self.event(obs, CrossDirection::Above, high));
        }
        events
    }

    fn event(&self, obs: &Observation, direction: CrossDirection, threshold: f64) -> CrossEvent {
        CrossEvent {
            key: obs.key.clone(),
            direction,
            threshold,
            previous: obs.previous,
            current: obs.current,
        }
    }
}

impl Default for CrossDetector {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
