use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::WebhookSender;
use crate::models::WebhookTarget;

/// Posts `{"content": ...}` to Discord-compatible webhooks.
pub struct DiscordWebhook {
    client: reqwest::Client,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

impl DiscordWebhook {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create webhook HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for DiscordWebhook {
    fn name(&self) -> &'static str {
        "discord"
    }

    #[instrument(skip(self, target, message), fields(
        notifier = "discord",
        message_len = message.len()
    ))]
    async fn send(&self, target: &WebhookTarget, message: &str) -> Result<()> {
        let start = Instant::now();

        let response = self
            .client
            .post(&target.url)
            .json(&WebhookPayload { content: message })
            .send()
            .await
            .context("Failed to send webhook request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(
                status_code = status.as_u16(),
                error = %error_text,
                "Webhook rejected the message"
            );
            bail!("Webhook error (HTTP {}): {}", status, error_text);
        }

        debug!(
            status_code = status.as_u16(),
            duration_ms = start.elapsed().as_millis(),
            "Webhook accepted the message"
        );
        Ok(())
    }
}
