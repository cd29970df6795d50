//! Core engine: the poll → decode → gate → mirror loop.
//!
//! `EngineState` is the single owner of all mutable trading state. Only the
//! scheduler holds it; everything else sees the immutable `EngineSnapshot`
//! it publishes after each tick.

pub mod budget;
pub mod decoder;
pub mod executor;
pub mod monitor;
pub mod poller;
pub mod positions;
pub mod scheduler;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{Position, WatchedAddress};
use budget::{BudgetGovernor, BudgetView};
use positions::PositionLedger;

/// Everything the engine mutates.
#[derive(Debug, Clone)]
pub struct EngineState {
    /// Watched accounts in configuration order.
    pub watched: Vec<WatchedAddress>,
    pub ledger: PositionLedger,
    pub budget: BudgetGovernor,
}

impl EngineState {
    pub fn new(watched: Vec<WatchedAddress>, budget: BudgetGovernor) -> Self {
        Self {
            watched,
            ledger: PositionLedger::new(),
            budget,
        }
    }
}

/// One watched account as seen from outside.
#[derive(Debug, Clone, Serialize)]
pub struct WatchedView {
    pub address: Address,
    pub cursor: u64,
}

/// Read-only copy of the engine state, published after every tick.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub agent_name: String,
    pub dry_run: bool,
    pub wallet: Address,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub positions: Vec<Position>,
    pub total_invested: Decimal,
    pub budget: BudgetView,
    pub watched: Vec<WatchedView>,
}

impl EngineSnapshot {
    /// Snapshot of `state` with the given run metadata.
    pub fn capture(state: &EngineState, meta: &RunMeta, now: DateTime<Utc>) -> Self {
        Self {
            agent_name: meta.agent_name.clone(),
            dry_run: meta.dry_run,
            wallet: meta.wallet,
            started_at: meta.started_at,
            updated_at: now,
            ticks: meta.ticks,
            failed_ticks: meta.failed_ticks,
            positions: state.ledger.snapshot(),
            total_invested: state.ledger.total_entry_value(),
            budget: state.budget.view(),
            watched: state
                .watched
                .iter()
                .map(|w| WatchedView {
                    address: w.address,
                    cursor: w.cursor(),
                })
                .collect(),
        }
    }
}

/// Run-level facts that are not trading state.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub agent_name: String,
    pub dry_run: bool,
    pub wallet: Address,
    pub started_at: DateTime<Utc>,
    pub ticks: u64,
    pub failed_ticks: u64,
}
