//! Operator wallet.
//!
//! Holds the private key and signs the operator's transactions. The key is
//! parsed once from a `SecretString` and never handed out.

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;

use crate::types::ChainError;

/// An unsigned call from the operator's wallet.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub to: Address,
    pub value: U256,
    pub input: Vec<u8>,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
}

/// A signed transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub raw: Vec<u8>,
    pub hash: B256,
}

pub struct Wallet {
    signer: PrivateKeySigner,
    chain_id: u64,
}

impl Wallet {
    /// Build a wallet from a hex private key (with or without `0x`).
    pub fn from_secret(key: &SecretString, chain_id: u64) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(key.expose_secret().trim())
            .context("Failed to parse wallet private key")?;
        Ok(Self { signer, chain_id })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Sign a legacy (gas-price) transaction with EIP-155 replay protection.
    pub fn sign(&self, call: CallRequest) -> Result<SignedTx, ChainError> {
        let mut tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: call.nonce,
            gas_price: call.gas_price,
            gas_limit: call.gas_limit,
            to: TxKind::Call(call.to),
            value: call.value,
            input: Bytes::from(call.input),
        };

        let sig = TxSignerSync::sign_transaction_sync(&self.signer, &mut tx)
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let signed: TxEnvelope = tx.into_signed(sig).into();

        Ok(SignedTx {
            raw: signed.encoded_2718(),
            hash: *signed.tx_hash(),
        })
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}
