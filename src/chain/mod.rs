//! Ledger client.
//!
//! Defines the `LedgerClient` trait (everything the engine reads from or
//! writes to the chain) and provides:
//! - `RpcLedger`: JSON-RPC implementation over an alloy HTTP provider
//! - `Wallet`: local signer for the operator's transactions
//! - `abi`: router and ERC-20 bindings

pub mod abi;
pub mod rpc;
pub mod wallet;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::types::ChainError;

/// The parts of a transaction receipt the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

impl ReceiptInfo {
    /// Fee paid in wei.
    pub fn fee_wei(&self) -> U256 {
        U256::from(self.gas_used) * U256::from(self.effective_gas_price)
    }
}

/// Read/write access to the chain.
///
/// Every call is a suspension point and may fail transiently; callers
/// decide whether a failure skips the operation or aborts a trade.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Native balance of `owner`, in wei.
    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError>;

    /// Transaction count of `owner` (the next nonce).
    async fn nonce(&self, owner: Address) -> Result<u64, ChainError>;

    /// Current gas price, in wei.
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Router `getAmountsOut` view call.
    async fn amounts_out(
        &self,
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> Result<Vec<U256>, ChainError>;

    /// ERC-20 `balanceOf`.
    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// Broadcast a signed raw transaction and return its hash.
    async fn send_raw(&self, raw: Vec<u8>) -> Result<B256, ChainError>;

    /// Receipt for `hash`, or `None` while still pending.
    async fn receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, ChainError>;
}
