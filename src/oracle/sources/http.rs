//! Shared REST transport for exchange adapters
//!
//! Wraps a `reqwest` client with a bounded timeout, an optional request
//! throttle, and error classification for transport and HTTP status failures.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::SourceResult;
use crate::error::SourceError;
use crate::types::SourceId;

/// Settings shared by every adapter's transport
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Space requests by the exchange's minimum interval
    pub enable_rate_limit: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(15_000),
            enable_rate_limit: true,
        }
    }
}

/// Spaces outgoing requests by a minimum interval.
#[derive(Debug)]
pub struct RequestThrottle {
    min_interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the next free slot and reserve it.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let wait = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let start = (*next).max(now);
            *next = start + self.min_interval;
            start - now
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// HTTP GET + JSON decode with source-aware error classification
#[derive(Debug)]
pub struct HttpTransport {
    source_id: SourceId,
    client: Client,
    throttle: RequestThrottle,
}

impl HttpTransport {
    pub fn new(
        source_id: SourceId,
        settings: &TransportSettings,
        min_interval: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let throttle = if settings.enable_rate_limit {
            RequestThrottle::new(min_interval)
        } else {
            RequestThrottle::disabled()
        };

        Ok(Self {
            source_id,
            client,
            throttle,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> SourceResult<T> {
        self.throttle.acquire().await;

        tracing::debug!(source = %self.source_id, url = %url, "GET");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| classify_transport(self.source_id, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(self.source_id, status, &body));
        }

        response.json::<T>().await.map_err(|e| {
            SourceError::other(self.source_id, format!("failed to decode response: {}", e))
        })
    }
}

fn classify_transport(source_id: SourceId, err: &reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::transient(source_id, format!("request timed out: {}", err))
    } else if err.is_connect() || err.is_request() {
        SourceError::transient(source_id, format!("network error: {}", err))
    } else {
        SourceError::classify(source_id, err.to_string())
    }
}

/// Map a non-2xx status to an error kind.
pub(crate) fn classify_status(source_id: SourceId, status: StatusCode, body: &str) -> SourceError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            SourceError::transient(source_id, message)
        }
        s if s.is_server_error() => SourceError::transient(source_id, message),
        _ => SourceError::classify(source_id, message),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
