use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, instrument};

use super::WebhookSender;
use crate::models::WebhookTarget;

/// Prints messages instead of posting them (`--dry-run`).
pub struct ConsoleSender;

impl ConsoleSender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookSender for ConsoleSender {
    fn name(&self) -> &'static str {
        "console"
    }

    #[instrument(skip(self, target, message), fields(notifier = "console"))]
    async fn send(&self, target: &WebhookTarget, message: &str) -> Result<()> {
        println!("\n{}", "=".repeat(60));
        println!("-> {}", redact(&target.url));
        println!("{}", "-".repeat(60));
        println!("{}", message);
        println!("{}", "=".repeat(60));

        info!(
            message_len = message.len(),
            "Dry run, message printed instead of sent"
        );
        Ok(())
    }
}

/// Webhook URLs embed their secret token in the last path segment.
fn redact(url: &str) -> String {
    match url.rfind('/') {
        Some(pos) if pos + 1 < url.len() => format!("{}/***", &url[..pos]),
        _ => url.to_string(),
    }
}
