//! Telegram Bot API sink

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::AlertSink;

const API_BASE: &str = "https://api.telegram.org";

/// Posts alerts to a chat via `sendMessage`.
pub struct TelegramSink {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(
        token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            client,
            base_url: API_BASE.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("base_url", &self.base_url)
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, text: &str) -> Result<()> {
        let form = [("chat_id", self.chat_id.as_str()), ("text", text)];
        // reqwest errors carry the URL, which embeds the token
        let response = self
            .client
            .post(self.endpoint())
            .form(&form)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Telegram request failed: {}", e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            check_status(status, &body)?;
        }

        debug!(chat_id = %self.chat_id, "Telegram message sent");
        Ok(())
    }
}

/// Any non-2xx answer is a failed delivery.
fn check_status(status: StatusCode, body: &str) -> Result<()> {
    if !status.is_success() {
        bail!(
            "Telegram sendMessage returned {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        );
    }
    Ok(())
}
