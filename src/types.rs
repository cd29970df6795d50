//! Shared types for the SHADOW agent.
//!
//! These types form the data model used across all modules: watched
//! accounts and their cursors, decoded trade intents, open positions,
//! transaction outcomes, and the domain error enums.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Decimals assumed for both the base currency and mirrored tokens.
pub const BASE_DECIMALS: u32 = 18;

/// Decimal places kept on a position's entry ratio.
pub const ENTRY_RATIO_DP: u32 = 12;

// ---------------------------------------------------------------------------
// Unit conversion
// ---------------------------------------------------------------------------

/// Largest mantissa a `Decimal` can hold (2^96 - 1).
fn decimal_mantissa_max() -> U256 {
    U256::from(u128::MAX >> 32)
}

/// Convert an integer amount in smallest units into a `Decimal` with
/// `decimals` fractional digits.
///
/// Amounts too large for the 96-bit mantissa lose low-order digits rather
/// than overflowing; anything beyond `Decimal::MAX` saturates.
pub fn units_to_decimal(raw: U256, decimals: u32) -> Decimal {
    let ten = U256::from(10u8);
    let max = decimal_mantissa_max();
    let mut raw = raw;
    let mut scale = decimals.min(28);

    while raw > max && scale > 0 {
        raw /= ten;
        scale -= 1;
    }
    if raw > max {
        return Decimal::MAX;
    }

    Decimal::from_i128_with_scale(raw.saturating_to::<u128>() as i128, scale)
}

/// Wei → base currency.
pub fn wei_to_eth(wei: U256) -> Decimal {
    units_to_decimal(wei, BASE_DECIMALS)
}

/// Base currency → wei. Sub-wei precision is truncated; negatives map to 0.
pub fn eth_to_wei(eth: Decimal) -> U256 {
    if eth <= Decimal::ZERO {
        return U256::ZERO;
    }
    let scaled = eth.round_dp_with_strategy(BASE_DECIMALS, RoundingStrategy::ToZero);
    // mantissa is value * 10^scale; pad up to 18 decimals.
    let mantissa = scaled.mantissa().unsigned_abs();
    let pad = BASE_DECIMALS - scaled.scale().min(BASE_DECIMALS);
    U256::from(mantissa) * U256::from(10u8).pow(U256::from(pad))
}

/// Apply a slippage tolerance (basis points) to an expected output.
pub fn min_output(expected: U256, slippage_bps: u32) -> U256 {
    let bps = U256::from(10_000u32.saturating_sub(slippage_bps.min(10_000)));
    expected * bps / U256::from(10_000u32)
}

fn de_u64_from_str<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(u64),
    }

    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Num(n) => Ok(n),
        StrOrNum::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Watched accounts
// ---------------------------------------------------------------------------

/// An external account whose swaps are mirrored.
#[derive(Debug, Clone, Serialize)]
pub struct WatchedAddress {
    pub address: Address,
    /// Last block whose transactions have been processed. Never rewound.
    cursor: u64,
    /// Hashes already handled inside the cursor block. The explorer query is
    /// inclusive of `startblock`, so the cursor block is always re-fetched.
    #[serde(skip)]
    seen_at_cursor: HashSet<String>,
}

impl WatchedAddress {
    pub fn new(address: Address, cursor: u64) -> Self {
        Self {
            address,
            cursor,
            seen_at_cursor: HashSet::new(),
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Whether a fetched transaction still needs processing.
    pub fn is_new(&self, tx: &RawTx) -> bool {
        if tx.block_number < self.cursor {
            return false;
        }
        !(tx.block_number == self.cursor && self.seen_at_cursor.contains(&tx.key()))
    }

    /// Record a processed transaction. The cursor only moves forward.
    pub fn advance(&mut self, tx: &RawTx) {
        if tx.block_number > self.cursor {
            self.cursor = tx.block_number;
            self.seen_at_cursor.clear();
        }
        if tx.block_number == self.cursor {
            self.seen_at_cursor.insert(tx.key());
        }
    }
}

impl fmt::Display for WatchedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ block {}", self.address, self.cursor)
    }
}

/// One row of the block explorer's transaction list.
///
/// Kept in its wire shape; the decoder is responsible for interpreting
/// `to` and `input`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTx {
    #[serde(deserialize_with = "de_u64_from_str")]
    pub block_number: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub input: String,
    /// "1" when the transaction reverted.
    #[serde(default)]
    pub is_error: String,
}

impl RawTx {
    pub fn reverted(&self) -> bool {
        self.is_error == "1"
    }

    fn key(&self) -> String {
        self.hash.to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// Trade intents
// ---------------------------------------------------------------------------

/// Direction of an observed swap, relative to the base currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// A decoded observation derived from one watched transaction. Lives for a
/// single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeIntent {
    pub direction: Direction,
    pub token: Address,
    pub observed_block: u64,
    pub source: Address,
}

impl fmt::Display for TradeIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} by {} (block {})",
            self.direction, self.token, self.source, self.observed_block
        )
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// An open mirrored position. Created once per successful buy, never
/// averaged into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token: Address,
    /// Quoted output of the entry swap, in the token's smallest unit.
    pub quantity: U256,
    /// Base currency spent on entry.
    pub entry_value: Decimal,
    /// `entry_value` per whole token.
    pub entry_ratio: Decimal,
    pub entry_tx: String,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn open(
        token: Address,
        quantity: U256,
        entry_value: Decimal,
        entry_tx: impl Into<String>,
    ) -> Result<Self, PositionError> {
        if quantity.is_zero() {
            return Err(PositionError::ZeroQuantity);
        }
        if entry_value <= Decimal::ZERO {
            return Err(PositionError::InvalidEntryValue(entry_value));
        }

        let whole_tokens = units_to_decimal(quantity, BASE_DECIMALS);
        let entry_ratio = if whole_tokens.is_zero() {
            Decimal::ZERO
        } else {
            (entry_value / whole_tokens).round_dp(ENTRY_RATIO_DP)
        };

        Ok(Self {
            token,
            quantity,
            entry_value,
            entry_ratio,
            entry_tx: entry_tx.into(),
            opened_at: Utc::now(),
        })
    }

    /// Quantity in whole tokens (18 decimals assumed).
    pub fn whole_tokens(&self) -> Decimal {
        units_to_decimal(self.quantity, BASE_DECIMALS)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} qty={:.6} entry={:.6} ETH",
            self.token,
            self.whole_tokens(),
            self.entry_value,
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("Position quantity must be non-zero")]
    ZeroQuantity,
    #[error("Invalid entry value: {0}")]
    InvalidEntryValue(Decimal),
}

// ---------------------------------------------------------------------------
// Transaction outcomes
// ---------------------------------------------------------------------------

/// Fee paid by a transaction, when confirmation was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeePaid {
    Known(Decimal),
    Unknown,
}

impl FeePaid {
    pub fn known(&self) -> Option<Decimal> {
        match self {
            FeePaid::Known(fee) => Some(*fee),
            FeePaid::Unknown => None,
        }
    }
}

impl fmt::Display for FeePaid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeePaid::Known(fee) => write!(f, "{fee:.6} ETH"),
            FeePaid::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of submitting one signed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub hash: String,
    pub confirmed: bool,
    pub fee_paid: FeePaid,
}

impl TxOutcome {
    pub fn pending(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            confirmed: false,
            fee_paid: FeePaid::Unknown,
        }
    }

    /// Outcome for a transaction that was never broadcast.
    pub fn dry_run() -> Self {
        Self::pending(format!("dry-run-{}", uuid::Uuid::new_v4()))
    }

    pub fn is_dry_run(&self) -> bool {
        self.hash.starts_with("dry-run-")
    }

    /// Mined, paid for and failed.
    pub fn reverted(&self) -> bool {
        !self.confirmed && self.fee_paid.known().is_some()
    }
}

impl fmt::Display for TxOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.confirmed { "confirmed" } else { "pending" };
        write!(f, "{} ({state}, fee {})", self.hash, self.fee_paid)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures talking to the chain.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC call timed out after {0}s")]
    Timeout(u64),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

/// Reasons a single mirrored trade is abandoned. None of these stop the
/// scheduler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TradeError {
    #[error("Insufficient funds: need {needed:.6} ETH, have {available:.6} ETH")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("Gas price {current_gwei} gwei exceeds ceiling {ceiling_gwei} gwei")]
    GasPriceExceeded {
        current_gwei: Decimal,
        ceiling_gwei: Decimal,
    },

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    /// An exit whose approval went out but whose swap did not.
    #[error("Exit abandoned after approval {approval}: {reason}")]
    ExitAbandoned { approval: TxOutcome, reason: String },

    #[error("Ledger read failed: {0}")]
    Rpc(#[from] ChainError),

    #[error("Position rejected: {0}")]
    Position(#[from] PositionError),
}

impl TradeError {
    /// Fee already spent on chain by a trade that then failed.
    pub fn fee_spent(&self) -> Option<FeePaid> {
        match self {
            TradeError::ExitAbandoned { approval, .. } => Some(approval.fee_paid),
            _ => None,
        }
    }
}

/// Wei → gwei, for messages.
pub fn wei_to_gwei(wei: u128) -> Decimal {
    Decimal::from_i128_with_scale(wei.min(u128::MAX >> 32) as i128, 9).round_dp(3)
}

/// Reference take-profit threshold.
pub const DEFAULT_TAKE_PROFIT: Decimal = dec!(0.30);

/// Reference stop-loss threshold.
pub const DEFAULT_STOP_LOSS: Decimal = dec!(0.15);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
