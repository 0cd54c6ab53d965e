mod console;
mod discord;

pub use console::ConsoleSender;
pub use discord::DiscordWebhook;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::models::{DeliveryResult, WebhookTarget};

const SECURE_SCHEME: &str = "https://";

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Get the name of this sender for logging
    fn name(&self) -> &'static str;

    /// Post `message` to a single target
    async fn send(&self, target: &WebhookTarget, message: &str) -> Result<()>;
}

/// Split a webhook list on commas, semicolons and newlines, keeping only
/// `https://` entries with something after the scheme.
pub fn parse_webhook_targets(raw: &str) -> Vec<WebhookTarget> {
    raw.split([',', ';', '\n', '\r'])
        .map(str::trim)
        .filter(|url| {
            let valid = url.len() > SECURE_SCHEME.len() && url.starts_with(SECURE_SCHEME);
            if !valid && !url.is_empty() {
                debug!(entry = %url, "Discarding malformed webhook entry");
            }
            valid
        })
        .map(WebhookTarget::new)
        .collect()
}

/// Fans one message out to every target. A failing target never stops the
/// others from being tried.
pub struct Dispatcher {
    sender: Box<dyn WebhookSender>,
}

impl Dispatcher {
    pub fn new<S: WebhookSender + 'static>(sender: S) -> Self {
        Self {
            sender: Box::new(sender),
        }
    }

    #[instrument(skip(self, message, targets), fields(
        sender = self.sender.name(),
        targets = targets.len(),
        message_len = message.len()
    ))]
    pub async fn send(&self, message: &str, targets: &[WebhookTarget]) -> DeliveryResult {
        let mut result = DeliveryResult::default();
        let total = targets.len();

        for (i, target) in targets.iter().enumerate() {
            match self.sender.send(target, message).await {
                Ok(()) => {
                    result.succeeded += 1;
                    info!(index = i + 1, total = total, "Webhook delivery succeeded");
                }
                Err(e) => {
                    result.failed += 1;
                    warn!(index = i + 1, total = total, error = %e, "Webhook delivery failed");
                }
            }
        }

        if result.is_success() {
            info!(
                succeeded = result.succeeded,
                failed = result.failed,
                "Dispatch completed"
            );
        } else {
            warn!(failed = result.failed, "No webhook delivery succeeded");
        }

        result
    }
}
