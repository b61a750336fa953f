//! Notifier - outbound alerts
//!
//! Telegram is the only real backend; the trait exists so the pipeline can
//! run with notifications disabled and so tests can capture what would have
//! been sent. Notification failures are never allowed to affect detection.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::json;
use std::time::Duration;

/// Outbound alert interface
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
    /// Send a message with a JPEG attached
    async fn send_photo(&self, text: &str, jpeg: &[u8]) -> Result<()>;
}

/// Telegram Bot API notifier
pub struct TelegramNotifier {
    client: reqwest::Client,
    base_url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        if bot_token.is_empty() || chat_id.is_empty() {
            return Err(Error::Config(
                "telegram bot token and chat id are required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("https://api.telegram.org/bot{}", bot_token),
            chat_id: chat_id.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::service(
                "telegram",
                format!("sendMessage returned {}", resp.status()),
            ));
        }
        tracing::debug!("Notification sent");
        Ok(())
    }

    async fn send_photo(&self, text: &str, jpeg: &[u8]) -> Result<()> {
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", text.to_string())
            .part(
                "photo",
                Part::bytes(jpeg.to_vec())
                    .file_name("snapshot.jpg")
                    .mime_str("image/jpeg")?,
            );

        let resp = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::service(
                "telegram",
                format!("sendPhoto returned {}", resp.status()),
            ));
        }
        tracing::debug!("Photo notification sent");
        Ok(())
    }
}

/// Sink used when notifications are disabled; alerts only reach the log
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        tracing::info!(text, "Notification (log only)");
        Ok(())
    }

    async fn send_photo(&self, text: &str, jpeg: &[u8]) -> Result<()> {
        tracing::info!(text, photo_bytes = jpeg.len(), "Notification (log only)");
        Ok(())
    }
}
