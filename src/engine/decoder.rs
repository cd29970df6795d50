//! Swap decoder.
//!
//! Turns a raw explorer row into a buy, a sell or nothing. Only calls to
//! the configured router count, and only the selectors in `SWAP_TABLE`.
//! Call data is ABI-decoded rather than read at fixed offsets, so anything
//! malformed or truncated simply falls through as `Irrelevant`.

use alloy::primitives::{hex, Address};
use alloy::sol_types::SolCall;
use std::str::FromStr;
use tracing::debug;

use crate::chain::abi::IUniswapV2Router02::{swapExactETHForTokensCall, swapExactTokensForETHCall};
use crate::types::{Direction, RawTx, TradeIntent};

// ---------------------------------------------------------------------------
// Selector table
// ---------------------------------------------------------------------------

/// Router functions the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    /// Native currency in, token out. The token is the last path element.
    ExactEthForTokens,
    /// Token in, native currency out. The token is the first path element.
    ExactTokensForEth,
}

const SWAP_TABLE: &[([u8; 4], SwapKind)] = &[
    (swapExactETHForTokensCall::SELECTOR, SwapKind::ExactEthForTokens),
    (swapExactTokensForETHCall::SELECTOR, SwapKind::ExactTokensForEth),
];

impl SwapKind {
    pub fn from_selector(selector: &[u8]) -> Option<Self> {
        SWAP_TABLE
            .iter()
            .find(|(known, _)| known.as_slice() == selector)
            .map(|(_, kind)| *kind)
    }

    pub fn direction(self) -> Direction {
        match self {
            SwapKind::ExactEthForTokens => Direction::Buy,
            SwapKind::ExactTokensForEth => Direction::Sell,
        }
    }

    /// Extract the traded token from full call data (selector included).
    fn token(self, data: &[u8]) -> Option<Address> {
        match self {
            SwapKind::ExactEthForTokens => swapExactETHForTokensCall::abi_decode(data)
                .ok()
                .and_then(|call| call.path.last().copied()),
            SwapKind::ExactTokensForEth => swapExactTokensForETHCall::abi_decode(data)
                .ok()
                .and_then(|call| call.path.first().copied()),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Buy(Address),
    Sell(Address),
    Irrelevant,
}

#[derive(Debug, Clone)]
pub struct SwapDecoder {
    router: Address,
}

impl SwapDecoder {
    pub fn new(router: Address) -> Self {
        Self { router }
    }

    pub fn classify(&self, tx: &RawTx) -> Classification {
        if tx.reverted() {
            return Classification::Irrelevant;
        }

        // Address parsing ignores checksum case, so this is a
        // case-insensitive comparison.
        match Address::from_str(tx.to.trim()) {
            Ok(to) if to == self.router => {}
            _ => return Classification::Irrelevant,
        }

        let Ok(data) = hex::decode(tx.input.trim()) else {
            debug!(hash = %tx.hash, "Call data is not valid hex");
            return Classification::Irrelevant;
        };
        let Some(kind) = data.get(..4).and_then(SwapKind::from_selector) else {
            return Classification::Irrelevant;
        };

        match (kind.direction(), kind.token(&data)) {
            (Direction::Buy, Some(token)) => Classification::Buy(token),
            (Direction::Sell, Some(token)) => Classification::Sell(token),
            (_, None) => {
                debug!(hash = %tx.hash, ?kind, "Malformed swap call data");
                Classification::Irrelevant
            }
        }
    }

    /// Classify and attach provenance.
    pub fn intent(&self, tx: &RawTx, source: Address) -> Option<TradeIntent> {
        let (direction, token) = match self.classify(tx) {
            Classification::Buy(token) => (Direction::Buy, token),
            Classification::Sell(token) => (Direction::Sell, token),
            Classification::Irrelevant => return None,
        };
        Some(TradeIntent {
            direction,
            token,
            observed_block: tx.block_number,
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
