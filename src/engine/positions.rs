//! Position ledger: the authoritative set of open mirrored positions.
//!
//! An unordered list. The same token may appear several times, one entry
//! per mirrored buy; entries are never merged or edited in place.

use alloy::primitives::Address;
use rust_decimal::Decimal;

use crate::types::Position;

#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    positions: Vec<Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, position: Position) {
        self.positions.push(position);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Remove the entry at `index`, if there is one.
    pub fn remove_at(&mut self, index: usize) -> Option<Position> {
        (index < self.positions.len()).then(|| self.positions.remove(index))
    }

    /// Remove the entry opened by transaction `entry_tx`.
    pub fn remove_entry(&mut self, entry_tx: &str) -> Option<Position> {
        let index = self.positions.iter().rposition(|p| p.entry_tx == entry_tx)?;
        Some(self.positions.remove(index))
    }

    /// Drop every position in `token`. Returns how many were removed.
    pub fn remove_token(&mut self, token: Address) -> usize {
        let before = self.positions.len();
        self.positions.retain(|p| p.token != token);
        before - self.positions.len()
    }

    /// Base currency committed across all open positions.
    pub fn total_entry_value(&self) -> Decimal {
        self.positions.iter().map(|p| p.entry_value).sum()
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.positions.clone()
    }
}
