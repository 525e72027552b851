use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::news::USER_AGENT;

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends operator alerts to a Telegram chat. Delivery failures are logged
/// and never reach the caller.
pub struct Notifier {
    client: Client,
    telegram: Option<TelegramConfig>,
}

impl Notifier {
    pub fn new(telegram: Option<TelegramConfig>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, telegram })
    }

    pub fn is_enabled(&self) -> bool {
        self.telegram.is_some()
    }

    pub async fn send(&self, text: &str) {
        let Some(telegram) = &self.telegram else {
            debug!("Telegram not configured, dropping alert: {}", text);
            return;
        };

        if let Err(e) = self.deliver(telegram, text).await {
            warn!("Telegram error: {}", e);
        }
    }

    async fn deliver(&self, telegram: &TelegramConfig, text: &str) -> anyhow::Result<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            telegram.base_url.trim_end_matches('/'),
            telegram.bot_token
        );

        self.client
            .post(url)
            .json(&SendMessage {
                chat_id: &telegram.chat_id,
                text,
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            // The URL carries the bot token
            .map_err(reqwest::Error::without_url)?;

        info!("Sent Telegram alert to chat {}", telegram.chat_id);
        Ok(())
    }
}
