//! Risk monitor.
//!
//! Revalues every open position once per tick and exits the ones that have
//! crossed the take-profit or stop-loss threshold.

use alloy::primitives::Address;
use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::engine::executor::{SellReport, TradeExecutor};
use crate::engine::positions::PositionLedger;
use crate::notify::Alerts;
use crate::types::{Position, TradeError};

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    Hold,
    TakeProfit,
    StopLoss,
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitSignal::Hold => write!(f, "HOLD"),
            ExitSignal::TakeProfit => write!(f, "TAKE-PROFIT"),
            ExitSignal::StopLoss => write!(f, "STOP-LOSS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskThresholds {
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    /// Decimal places kept on the value ratio.
    pub precision: u32,
}

impl From<&RiskConfig> for RiskThresholds {
    fn from(cfg: &RiskConfig) -> Self {
        Self {
            take_profit: cfg.take_profit,
            stop_loss: cfg.stop_loss,
            precision: cfg.ratio_precision,
        }
    }
}

impl RiskThresholds {
    /// `current / entry`, rounded half-to-even.
    pub fn ratio(&self, current: Decimal, entry: Decimal) -> Option<Decimal> {
        if entry <= Decimal::ZERO {
            return None;
        }
        current.checked_div(entry).map(|r| r.round_dp(self.precision))
    }

    /// Both bounds are inclusive.
    pub fn evaluate(&self, ratio: Decimal) -> ExitSignal {
        if ratio >= Decimal::ONE + self.take_profit {
            ExitSignal::TakeProfit
        } else if ratio <= Decimal::ONE - self.stop_loss {
            ExitSignal::StopLoss
        } else {
            ExitSignal::Hold
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// One triggered exit. The position is gone from the ledger whatever
/// `sell` says.
#[derive(Debug)]
pub struct ExitRecord {
    pub position: Position,
    pub signal: ExitSignal,
    pub ratio: Decimal,
    pub current_value: Decimal,
    pub sell: Result<Option<SellReport>, TradeError>,
}

#[derive(Debug, Default)]
pub struct MonitorReport {
    pub held: usize,
    /// Positions kept because their quote failed.
    pub unpriced: usize,
    pub exits: Vec<ExitRecord>,
}

impl MonitorReport {
    pub fn exited_tokens(&self) -> impl Iterator<Item = Address> + '_ {
        self.exits.iter().map(|e| e.position.token)
    }
}

#[derive(Debug, Clone)]
pub struct RiskMonitor {
    thresholds: RiskThresholds,
}

impl RiskMonitor {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Revalue all positions, sell the breaching ones and keep the rest.
    pub async fn run(
        &self,
        ledger: &mut PositionLedger,
        executor: &TradeExecutor,
        alerts: &Alerts,
    ) -> MonitorReport {
        let mut report = MonitorReport::default();
        // Index of `position` in the live ledger. Only this loop removes
        // entries, so it stays in step with the snapshot.
        let mut index = 0;

        for position in ledger.snapshot() {
            let current_value = match executor
                .quote_value(position.token, position.quantity)
                .await
            {
                Ok(value) => value,
                Err(e) => {
                    warn!(token = %position.token, error = %e, "Revaluation quote failed, keeping position");
                    report.unpriced += 1;
                    index += 1;
                    continue;
                }
            };

            let Some(ratio) = self.thresholds.ratio(current_value, position.entry_value) else {
                report.held += 1;
                index += 1;
                continue;
            };

            let signal = self.thresholds.evaluate(ratio);
            if signal == ExitSignal::Hold {
                debug!(token = %position.token, %ratio, "Position held");
                report.held += 1;
                index += 1;
                continue;
            }

            info!(
                token = %position.token,
                %ratio,
                entry = %position.entry_value,
                current = %current_value,
                %signal,
                "Exit triggered"
            );
            alerts.trade(format!(
                "{signal} on {} ratio {ratio} (entry {:.6} ETH, now {:.6} ETH)",
                position.token, position.entry_value, current_value
            ));

            let sell = executor.replicate_sell(position.token).await;
            match &sell {
                Ok(Some(sold)) => alerts.trade(format!("Exit {sold}")),
                Ok(None) => {
                    alerts.warn(format!("Exit of {} found no balance to sell", position.token))
                }
                Err(e) => alerts.error(format!("Exit of {} failed: {e}", position.token)),
            }

            ledger.remove_at(index);
            report.exits.push(ExitRecord {
                position,
                signal,
                ratio,
                current_value,
                sell,
            });
        }

        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
