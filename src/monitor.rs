//! Polling scheduler
//!
//! One tick evaluates every watched timeframe concurrently:
//! fetch (with failover) → RSI → cross detection → alerts.
//! Shared state sits behind async mutexes inside the fetcher and here.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::alerts::{self, AlertSink};
use crate::config::AppConfig;
use crate::error::CycleError;
use crate::indicators::IndicatorEvaluator;
use crate::oracle::failover::{Failover, FailoverFetcher};
use crate::signals::{CrossDetector, CrossEvent, Thresholds};
use crate::types::{SeriesKey, Timeframe};

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub symbol: String,
    pub timeframes: Vec<Timeframe>,
    pub poll_interval: Duration,
    pub candle_limit: usize,
    pub rsi_period: usize,
    pub thresholds: Thresholds,
    /// Bound on a single alert delivery
    pub alert_timeout: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            symbol: config.watch.symbol.clone(),
            timeframes: config.watch.timeframes.clone(),
            poll_interval: Duration::from_secs(config.watch.poll_interval_secs),
            candle_limit: config.watch.candle_limit,
            rsi_period: config.rsi.period,
            thresholds: config.rsi.thresholds(),
            alert_timeout: config.telegram.timeout(),
        }
    }
}

/// Result of one timeframe cycle
#[derive(Debug, Clone)]
pub struct TimeframeReport {
    pub key: SeriesKey,
    pub previous: f64,
    pub current: f64,
    /// First sample of this series; no cross evaluated
    pub baseline: bool,
    pub events: Vec<CrossEvent>,
    pub failover: Option<Failover>,
}

/// Per-timeframe outcomes of one tick, in configured order
#[derive(Debug)]
pub struct TickReport {
    pub outcomes: Vec<(Timeframe, Result<TimeframeReport, CycleError>)>,
}

impl TickReport {
    pub fn outcome(&self, timeframe: Timeframe) -> Option<&Result<TimeframeReport, CycleError>> {
        self.outcomes
            .iter()
            .find(|(tf, _)| *tf == timeframe)
            .map(|(_, outcome)| outcome)
    }

    pub fn events(&self) -> impl Iterator<Item = &CrossEvent> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().ok())
            .flat_map(|report| report.events.iter())
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_err()).count()
    }
}

pub struct Monitor {
    settings: MonitorSettings,
    fetcher: Arc<FailoverFetcher>,
    evaluator: IndicatorEvaluator,
    detector: Mutex<CrossDetector>,
    sink: Arc<dyn AlertSink>,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        fetcher: Arc<FailoverFetcher>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            evaluator: IndicatorEvaluator::new(settings.rsi_period),
            detector: Mutex::new(CrossDetector::new(settings.thresholds)),
            settings,
            fetcher,
            sink,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn fetcher(&self) -> &FailoverFetcher {
        &self.fetcher
    }

    /// Send the startup banner and configuration summary.
    pub async fn announce_start(&self) {
        let priority = self.fetcher.registry().await.priority().to_vec();
        let summary = alerts::format_startup_summary(
            &self.settings.symbol,
            &self.settings.timeframes,
            &priority,
            self.fetcher.settings().cooldown,
        );
        self.alert(&alerts::format_startup_banner()).await;
        self.alert(&summary).await;
    }

    /// Run one cycle over every timeframe and wait for all of them.
    pub async fn tick(&self) -> TickReport {
        let cycles = self
            .settings
            .timeframes
            .iter()
            .map(|&tf| async move { (tf, self.process_timeframe(tf).await) });

        let outcomes = join_all(cycles).await;

        for (timeframe, outcome) in &outcomes {
            if let Err(e) = outcome {
                warn!(
                    symbol = %self.settings.symbol,
                    timeframe = %timeframe,
                    error = %e,
                    "Cycle failed"
                );
            }
        }

        TickReport { outcomes }
    }

    async fn process_timeframe(&self, timeframe: Timeframe) -> Result<TimeframeReport, CycleError> {
        let outcome = self
            .fetcher
            .fetch(&self.settings.symbol, timeframe, self.settings.candle_limit)
            .await?;

        if let Some(failover) = outcome.failover.as_ref() {
            self.alert(&alerts::format_failover(failover)).await;
        }

        let obs = self.evaluator.observe(
            outcome.source,
            &outcome.market_symbol,
            timeframe,
            &outcome.candles,
        )?;

        let (baseline, events) = {
            let mut detector = self.detector.lock().await;
            let baseline = !detector.is_tracking(&obs.key);
            (baseline, detector.observe(&obs))
        };

        debug!(
            series = %obs.key,
            previous = obs.previous,
            current = obs.current,
            baseline,
            "RSI evaluated"
        );

        for event in &events {
            info!(
                series = %event.key,
                direction = %event.direction,
                threshold = event.threshold,
                rsi = event.current,
                "📈 RSI cross"
            );
            self.alert(&alerts::format_cross(event)).await;
        }

        Ok(TimeframeReport {
            key: obs.key,
            previous: obs.previous,
            current: obs.current,
            baseline,
            events,
            failover: outcome.failover,
        })
    }

    async fn alert(&self, text: &str) {
        alerts::deliver(self.sink.as_ref(), text, self.settings.alert_timeout).await;
    }

    /// Tick forever at the poll interval. Overrunning ticks delay the next one.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            symbol = %self.settings.symbol,
            every_secs = self.settings.poll_interval.as_secs(),
            "🚀 Monitor loop started"
        );

        loop {
            interval.tick().await;
            let report = self.tick().await;
            debug!(
                timeframes = report.outcomes.len(),
                failures = report.failures(),
                events = report.events().count(),
                "Tick complete"
            );
        }
    }
}
