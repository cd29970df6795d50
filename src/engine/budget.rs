//! Budget governor.
//!
//! Caps the number of mirrored buys (and optionally the cumulative fee
//! spend) per calendar month. Exits are never gated here.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::types::FeePaid;

/// Calendar month a budget period covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn of(now: DateTime<Utc>) -> Self {
        Self {
            year: now.year(),
            month: now.month(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Counters for the current period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetState {
    pub trades_this_period: u32,
    /// Sum of known fees; unknown fees are excluded.
    pub fees_this_period: Decimal,
    pub invested_this_period: Decimal,
    pub period: Period,
}

impl BudgetState {
    fn fresh(period: Period) -> Self {
        Self {
            trades_this_period: 0,
            fees_this_period: Decimal::ZERO,
            invested_this_period: Decimal::ZERO,
            period,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BudgetStatus {
    Open,
    Exhausted,
}

impl fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetStatus::Open => write!(f, "OPEN"),
            BudgetStatus::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

/// Why a buy was not allowed. Not an error: the skip is deliberate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BudgetBlock {
    #[error("trade limit reached ({used}/{max} this period)")]
    TradeLimit { used: u32, max: u32 },

    #[error("fee budget spent ({spent} of {cap} ETH this period)")]
    FeeLimit { spent: Decimal, cap: Decimal },
}

/// Read-only view published in the engine snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetView {
    pub period: String,
    pub status: BudgetStatus,
    pub trades_used: u32,
    pub max_trades: u32,
    pub trades_remaining: u32,
    pub trade_size: Decimal,
    pub invested: Decimal,
    pub fees: Decimal,
    pub fee_cap: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BudgetGovernor {
    state: BudgetState,
    max_trades: u32,
    max_fee_budget: Option<Decimal>,
    trade_size: Decimal,
}

impl BudgetGovernor {
    pub fn new(
        max_trades: u32,
        max_fee_budget: Option<Decimal>,
        trade_size: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: BudgetState::fresh(Period::of(now)),
            max_trades,
            max_fee_budget,
            trade_size,
        }
    }

    /// Reset the counters if `now` falls in a different month.
    /// Returns `true` when a reset happened.
    pub fn roll_period(&mut self, now: DateTime<Utc>) -> bool {
        let current = Period::of(now);
        if current == self.state.period {
            return false;
        }
        info!(
            previous = %self.state.period,
            current = %current,
            trades = self.state.trades_this_period,
            fees = %self.state.fees_this_period,
            "Budget period rolled over"
        );
        self.state = BudgetState::fresh(current);
        true
    }

    pub fn status(&self) -> BudgetStatus {
        match self.check_buy() {
            Ok(()) => BudgetStatus::Open,
            Err(_) => BudgetStatus::Exhausted,
        }
    }

    /// Gate for a new buy.
    pub fn check_buy(&self) -> Result<(), BudgetBlock> {
        if self.state.trades_this_period >= self.max_trades {
            return Err(BudgetBlock::TradeLimit {
                used: self.state.trades_this_period,
                max: self.max_trades,
            });
        }
        if let Some(cap) = self.max_fee_budget {
            if self.state.fees_this_period > cap {
                return Err(BudgetBlock::FeeLimit {
                    spent: self.state.fees_this_period,
                    cap,
                });
            }
        }
        Ok(())
    }

    /// Account for a submitted buy.
    pub fn record_buy(&mut self, spent: Decimal, fee: FeePaid) {
        self.state.trades_this_period += 1;
        self.state.invested_this_period += spent;
        self.record_fee(fee);
        if self.status() == BudgetStatus::Exhausted {
            info!(
                period = %self.state.period,
                trades = self.state.trades_this_period,
                "Budget exhausted until next period"
            );
        }
    }

    /// Account for the fee of any other transaction (approval, sell).
    pub fn record_fee(&mut self, fee: FeePaid) {
        if let Some(fee) = fee.known() {
            self.state.fees_this_period += fee;
        }
    }

    pub fn trades_remaining(&self) -> u32 {
        self.max_trades.saturating_sub(self.state.trades_this_period)
    }

    pub fn trade_size(&self) -> Decimal {
        self.trade_size
    }

    pub fn state(&self) -> &BudgetState {
        &self.state
    }

    pub fn view(&self) -> BudgetView {
        BudgetView {
            period: self.state.period.to_string(),
            status: self.status(),
            trades_used: self.state.trades_this_period,
            max_trades: self.max_trades,
            trades_remaining: self.trades_remaining(),
            trade_size: self.trade_size,
            invested: self.state.invested_this_period,
            fees: self.state.fees_this_period,
            fee_cap: self.max_fee_budget,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
