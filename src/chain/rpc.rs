//! JSON-RPC ledger client over an alloy HTTP provider.
//!
//! Every call is wrapped in a per-call timeout so that a stuck node cannot
//! hold a scheduler tick indefinitely.

use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, RootProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::abi::{IUniswapV2Router02, IERC20};
use super::{LedgerClient, ReceiptInfo};
use crate::types::ChainError;

/// Ledger client backed by a node's HTTP JSON-RPC endpoint.
#[derive(Clone)]
pub struct RpcLedger {
    provider: RootProvider,
    timeout: Duration,
}

impl RpcLedger {
    /// Connect to an HTTP RPC endpoint. No request is made until first use.
    pub fn connect(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(rpc_url).context("Invalid RPC URL")?;
        Ok(Self {
            provider: RootProvider::new_http(url),
            timeout,
        })
    }

    /// Chain id reported by the node.
    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        self.bounded(async { self.provider.get_chain_id().await }).await
    }

    async fn bounded<T, E, F>(&self, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ChainError::Rpc(e.to_string())),
            Err(_) => Err(ChainError::Timeout(self.timeout.as_secs())),
        }
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.bounded(async { self.provider.get_block_number().await })
            .await
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError> {
        self.bounded(async { self.provider.get_balance(owner).await })
            .await
    }

    async fn nonce(&self, owner: Address) -> Result<u64, ChainError> {
        self.bounded(async { self.provider.get_transaction_count(owner).pending().await })
            .await
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.bounded(async { self.provider.get_gas_price().await })
            .await
    }

    async fn amounts_out(
        &self,
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> Result<Vec<U256>, ChainError> {
        let contract = IUniswapV2Router02::new(router, self.provider.clone());
        self.bounded(async move { contract.getAmountsOut(amount_in, path).call().await })
            .await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        let contract = IERC20::new(token, self.provider.clone());
        self.bounded(async move { contract.balanceOf(owner).call().await })
            .await
    }

    async fn send_raw(&self, raw: Vec<u8>) -> Result<B256, ChainError> {
        let pending = self
            .bounded(async { self.provider.send_raw_transaction(&raw).await })
            .await?;
        let hash = *pending.tx_hash();
        debug!(%hash, "Raw transaction broadcast");
        Ok(hash)
    }

    async fn receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, ChainError> {
        let receipt = self
            .bounded(async { self.provider.get_transaction_receipt(hash).await })
            .await?;
        Ok(receipt.map(|r| ReceiptInfo {
            success: ReceiptResponse::status(&r),
            gas_used: ReceiptResponse::gas_used(&r),
            effective_gas_price: ReceiptResponse::effective_gas_price(&r),
        }))
    }
}
