//! Telegram Bot API sink

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::NotificationSink;
use crate::config::TelegramConfig;
use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

/// Sends notifications through `sendMessage`
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    timeout: Duration,
}

impl TelegramNotifier {
    /// Build a notifier; fails when the token or chat id is missing
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let bot_token = config
            .bot_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Config("telegram.bot_token is not set".to_string()))?;
        let chat_id = config
            .chat_id
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Config("telegram.chat_id is not set".to_string()))?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
            timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    async fn deliver(&self, text: &str) -> Result<()> {
        let body = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Delivery(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!("HTTP {}: {}", status, detail)));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn send(&self, text: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.deliver(text)).await {
            Ok(Ok(())) => {
                debug!("Telegram notification delivered");
                true
            }
            Ok(Err(e)) => {
                error!("Telegram notification failed: {}", e);
                false
            }
            Err(_) => {
                warn!("{}", Error::DeliveryTimeout(self.timeout.as_secs()));
                false
            }
        }
    }
}
