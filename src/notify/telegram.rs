//! Telegram Bot API integration.
//!
//! Only the three methods the agent needs: `sendMessage` for alerts and
//! command replies, `getUpdates` long-polling and `deleteWebhook` for the
//! command listener.
//!
//! API docs: https://core.telegram.org/bots/api

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::Notifier;

const API_BASE: &str = "https://api.telegram.org";

/// Request timeout for regular calls. Long polls add their own hold time.
const REQUEST_TIMEOUT_SECS: u64 = 15;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TelegramClient {
    http: Client,
    api_base: String,
    token: SecretString,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(token: SecretString, chat_id: String) -> Result<Self> {
        Self::with_base(API_BASE, token, chat_id)
    }

    /// Point the client at a different API host.
    pub fn with_base(api_base: &str, token: SecretString, chat_id: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS + 60))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            chat_id,
        })
    }

    /// The configured operator chat.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token.expose_secret(), method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Option<T>> {
        let resp = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .form(params)
            .send()
            .await
            // Strip the URL: it embeds the bot token.
            .map_err(|e| anyhow::anyhow!("Telegram {method} request failed: {}", e.without_url()))?;

        let status = resp.status();
        let body: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {method} response"))?;

        if !body.ok {
            bail!(
                "Telegram {method} error {status}: {}",
                body.description.unwrap_or_default()
            );
        }
        Ok(body.result)
    }

    /// Send a text message to `chat_id`.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        self.call::<serde_json::Value>(
            "sendMessage",
            &[("chat_id", chat_id.to_string()), ("text", text.to_string())],
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
        .await?;
        debug!(chat_id, "Telegram message sent");
        Ok(())
    }

    /// Drop any webhook so that `getUpdates` works, discarding queued updates.
    pub async fn delete_webhook(&self) -> Result<()> {
        self.call::<bool>(
            "deleteWebhook",
            &[("drop_pending_updates", "true".to_string())],
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
        .await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, hold_secs: u64) -> Result<Vec<Update>> {
        let updates = self
            .call::<Vec<Update>>(
                "getUpdates",
                &[
                    ("offset", offset.to_string()),
                    ("timeout", hold_secs.to_string()),
                    ("allowed_updates", r#"["message"]"#.to_string()),
                ],
                Duration::from_secs(REQUEST_TIMEOUT_SECS + hold_secs),
            )
            .await?;
        Ok(updates.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Delivers alerts to the operator chat.
pub struct TelegramNotifier {
    client: std::sync::Arc<TelegramClient>,
}

impl TelegramNotifier {
    pub fn new(client: std::sync::Arc<TelegramClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        self.client.send_message(self.client.chat_id(), text).await
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
