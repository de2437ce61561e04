//! Alert Sink - user-facing notifications
//!
//! Every message goes through an [`AlertSink`]. Delivery failures are logged
//! and never propagate into the polling cycle.

mod telegram;

pub use telegram::TelegramSink;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::oracle::failover::Failover;
use crate::signals::{CrossDirection, CrossEvent};
use crate::types::{SourceId, Timeframe};

/// Destination for alert text
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn send(&self, text: &str) -> Result<()>;
}

/// Writes alerts to the log only; used when no messenger is configured.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, text: &str) -> Result<()> {
        info!(alert = %text, "📣 Alert");
        Ok(())
    }
}

/// Send `text` through `sink`, bounded by `timeout`. Returns whether it was delivered.
pub async fn deliver(sink: &dyn AlertSink, text: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, sink.send(text)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(sink = sink.name(), error = %e, "Alert delivery failed");
            false
        }
        Err(_) => {
            warn!(
                sink = sink.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Alert delivery timed out"
            );
            false
        }
    }
}

pub fn format_cross(event: &CrossEvent) -> String {
    let (icon, word) = match event.direction {
        CrossDirection::Below => ("🔻", "BELOW"),
        CrossDirection::Above => ("🔺", "ABOVE"),
    };
    format!(
        "{} RSI CROSSED {}\n{}\nTF: {}\nRSI: {:.2}\nEX: {}",
        icon,
        word,
        event.key.market_symbol,
        event.key.timeframe,
        event.current,
        event.key.source
    )
}

pub fn format_failover(failover: &Failover) -> String {
    format!(
        "🔁 Failover: {} TF {} switched from {} → {}",
        failover.symbol, failover.timeframe, failover.from, failover.to
    )
}

pub fn format_startup_banner() -> String {
    "🤖 RSI perp multi-exchange bot (pinned) started.".to_string()
}

pub fn format_startup_summary(
    symbol: &str,
    timeframes: &[Timeframe],
    priority: &[SourceId],
    cooldown: Duration,
) -> String {
    let tfs: Vec<&str> = timeframes.iter().map(|t| t.as_str()).collect();
    let order: Vec<&str> = priority.iter().map(|s| s.as_str()).collect();
    format!(
        "📌 Base: {}\n⏱️ TFs: {}\n🔁 Priority: {}\n🧊 Cooldown: {}s",
        symbol,
        tfs.join(", "),
        order.join(" → "),
        cooldown.as_secs()
    )
}
