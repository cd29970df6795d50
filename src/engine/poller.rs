//! History poller.
//!
//! Fetches a watched account's transactions from an Etherscan-compatible
//! block explorer, starting at the account's cursor block (inclusive) in
//! ascending order.
//!
//! Polling never fails: an unreachable explorer, an HTTP error or a
//! non-success envelope all come back as an empty list so the scheduler
//! simply tries again next tick.
//!
//! API docs: https://docs.etherscan.io/api-endpoints/accounts

use alloy::primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExplorerConfig;
use crate::types::RawTx;

/// The explorer's status message when an account has no matching rows.
const NO_TRANSACTIONS: &str = "No transactions found";

/// Source of a watched account's transaction history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Transactions involving `address` with block number >= `cursor`,
    /// oldest first. Empty on any failure.
    async fn poll(&self, address: Address, cursor: u64) -> Vec<RawTx>;
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// `{status, message, result}`. `result` is an array on success and a
/// string (error text) otherwise.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

/// Parse an explorer response body into transactions.
///
/// Rows that do not match the expected shape are skipped individually.
pub fn parse_envelope(body: &str) -> Vec<RawTx> {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "Explorer response is not a valid envelope");
            return Vec::new();
        }
    };

    if envelope.status != "1" {
        if envelope.message.starts_with(NO_TRANSACTIONS) {
            debug!("Explorer reports no new transactions");
        } else {
            warn!(
                status = %envelope.status,
                message = %envelope.message,
                detail = %envelope.result,
                "Explorer returned non-success status"
            );
        }
        return Vec::new();
    }

    let serde_json::Value::Array(rows) = envelope.result else {
        warn!("Explorer success envelope without a result list");
        return Vec::new();
    };

    let total = rows.len();
    let txs: Vec<RawTx> = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect();
    if txs.len() < total {
        debug!(skipped = total - txs.len(), "Skipped unparseable explorer rows");
    }
    txs
}

// ---------------------------------------------------------------------------
// Etherscan client
// ---------------------------------------------------------------------------

pub struct EtherscanClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    action: String,
    chain_id: Option<u64>,
}

impl EtherscanClient {
    pub fn new(config: &ExplorerConfig, api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build explorer HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key,
            action: config.action.clone(),
            chain_id: config.chain_id,
        })
    }

    /// Full request URL for one poll.
    fn request_url(&self, address: Address, cursor: u64) -> String {
        let mut url = format!(
            "{}?module=account&action={}&address={}&startblock={}&endblock=latest&sort=asc&apikey={}",
            self.base_url,
            urlencoding::encode(&self.action),
            address.to_string().to_lowercase(),
            cursor,
            urlencoding::encode(self.api_key.expose_secret()),
        );
        if let Some(chain_id) = self.chain_id {
            url.push_str(&format!("&chainid={chain_id}"));
        }
        url
    }

    async fn fetch(&self, address: Address, cursor: u64) -> Result<String> {
        let resp = self
            .http
            .get(self.request_url(address, cursor))
            .send()
            .await
            // The URL carries the API key.
            .map_err(|e| anyhow::anyhow!("Explorer request failed: {}", e.without_url()))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Explorer HTTP {status}");
        }
        resp.text().await.context("Failed to read explorer response")
    }
}

#[async_trait]
impl HistorySource for EtherscanClient {
    async fn poll(&self, address: Address, cursor: u64) -> Vec<RawTx> {
        match self.fetch(address, cursor).await {
            Ok(body) => {
                let txs = parse_envelope(&body);
                debug!(%address, cursor, count = txs.len(), "Explorer poll complete");
                txs
            }
            Err(e) => {
                warn!(%address, cursor, error = %e, "Explorer poll failed");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
