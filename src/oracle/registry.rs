//! Source Registry - priority order, cooldowns and pins
//!
//! Holds the fixed source priority, per-source cooldown expiry and the
//! pinned source per (symbol, timeframe). Owned by the failover fetcher.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{SourceId, Timeframe};

#[derive(Debug, Clone)]
pub struct SourceRegistry {
    priority: Vec<SourceId>,
    cooldown_until: HashMap<SourceId, Instant>,
    pins: HashMap<(String, Timeframe), SourceId>,
}

impl SourceRegistry {
    /// Build from a priority list; repeated entries keep their first position.
    pub fn new(priority: impl IntoIterator<Item = SourceId>) -> Self {
        let mut ordered = Vec::new();
        for source in priority {
            if !ordered.contains(&source) {
                ordered.push(source);
            }
        }
        Self {
            priority: ordered,
            cooldown_until: HashMap::new(),
            pins: HashMap::new(),
        }
    }

    pub fn priority(&self) -> &[SourceId] {
        &self.priority
    }

    /// Try order for (symbol, timeframe): pinned source first, then the rest
    /// by priority, minus anything still cooling down at `now`.
    ///
    /// An empty result means no source is currently eligible.
    pub fn candidate_order(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: Instant,
    ) -> Vec<SourceId> {
        let mut order = Vec::with_capacity(self.priority.len());

        if let Some(pinned) = self.pin(symbol, timeframe) {
            if self.priority.contains(&pinned) {
                order.push(pinned);
            }
        }

        for &source in &self.priority {
            if !order.contains(&source) {
                order.push(source);
            }
        }

        order.retain(|source| !self.is_cooling_down(*source, now));
        order
    }

    pub fn pin(&self, symbol: &str, timeframe: Timeframe) -> Option<SourceId> {
        self.pins.get(&(symbol.to_string(), timeframe)).copied()
    }

    /// Pin `source` for (symbol, timeframe).
    ///
    /// Returns the previously pinned source when it differs (a failover).
    pub fn mark_success(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        source: SourceId,
    ) -> Option<SourceId> {
        let previous = self.pins.insert((symbol.to_string(), timeframe), source);
        previous.filter(|prev| *prev != source)
    }

    /// Exclude `source` until `now + duration`. Returns the expiry.
    pub fn mark_cooldown(&mut self, source: SourceId, now: Instant, duration: Duration) -> Instant {
        let until = now + duration;
        self.cooldown_until.insert(source, until);
        until
    }

    pub fn cooldown_until(&self, source: SourceId) -> Option<Instant> {
        self.cooldown_until.get(&source).copied()
    }

    pub fn is_cooling_down(&self, source: SourceId, now: Instant) -> bool {
        self.cooldown_until
            .get(&source)
            .map(|until| now < *until)
            .unwrap_or(false)
    }
}
