//! Scheduler: the fixed-interval control loop.
//!
//! Each tick runs strictly in order:
//! 1. budget period roll-over check
//! 2. risk monitor pass over all open positions
//! 3. for each watched account, in configuration order:
//!    poll → classify → budget gate (buys) → mirror → advance cursor
//! 4. publish a fresh `EngineSnapshot`
//! 5. heartbeat / daily summary checks
//!
//! Ticks never overlap: the next one starts only after every remote call of
//! the previous one has returned. A panic inside a tick is caught, reported
//! and followed by the error back-off.

use alloy::primitives::Address;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use futures::FutureExt;
use rust_decimal::Decimal;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::decoder::{Classification, SwapDecoder};
use super::executor::TradeExecutor;
use super::monitor::RiskMonitor;
use super::poller::HistorySource;
use super::{EngineSnapshot, EngineState, RunMeta};
use crate::notify::Alerts;
use crate::types::{wei_to_eth, RawTx};

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

/// A wall-clock boundary check: due once `now` reaches the next fire time,
/// which then moves forward by whole periods.
#[derive(Debug, Clone)]
pub struct Cadence {
    next: DateTime<Utc>,
    period: TimeDelta,
}

impl Cadence {
    pub fn starting_at(first: DateTime<Utc>, period: TimeDelta) -> Self {
        Self { next: first, period }
    }

    /// Next `hour:00` UTC strictly after `now`, then every 24 hours.
    pub fn daily_at(now: DateTime<Utc>, hour: u32) -> Self {
        let today = now
            .date_naive()
            .and_hms_opt(hour.min(23), 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);
        let first = if today > now {
            today
        } else {
            today + TimeDelta::days(1)
        };
        Self::starting_at(first, TimeDelta::days(1))
    }

    pub fn next(&self) -> DateTime<Utc> {
        self.next
    }

    /// Fires at most once per call, skipping any periods missed entirely.
    pub fn due(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.next {
            return false;
        }
        while self.next <= now {
            self.next += self.period;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Settings and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub agent_name: String,
    pub tick_interval: Duration,
    pub error_backoff: Duration,
    pub heartbeat_interval: Duration,
    pub summary_hour_utc: u32,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub exits: usize,
    pub polled: usize,
    pub buys: usize,
    pub sells: usize,
    pub budget_skips: usize,
    pub failed_trades: usize,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    state: EngineState,
    meta: RunMeta,
    executor: TradeExecutor,
    history: Arc<dyn HistorySource>,
    decoder: SwapDecoder,
    monitor: RiskMonitor,
    alerts: Alerts,
    snapshots: watch::Sender<EngineSnapshot>,
    heartbeat: Cadence,
    summary: Cadence,
    settings: SchedulerSettings,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: EngineState,
        executor: TradeExecutor,
        history: Arc<dyn HistorySource>,
        decoder: SwapDecoder,
        monitor: RiskMonitor,
        alerts: Alerts,
        settings: SchedulerSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let meta = RunMeta {
            agent_name: settings.agent_name.clone(),
            dry_run: executor.is_dry_run(),
            wallet: executor.address(),
            started_at: now,
            ticks: 0,
            failed_ticks: 0,
        };
        let heartbeat_every = TimeDelta::seconds(settings.heartbeat_interval.as_secs().max(1) as i64);
        let (snapshots, _) = watch::channel(EngineSnapshot::capture(&state, &meta, now));

        Self {
            heartbeat: Cadence::starting_at(now, heartbeat_every),
            summary: Cadence::daily_at(now, settings.summary_hour_utc),
            state,
            meta,
            executor,
            history,
            decoder,
            monitor,
            alerts,
            snapshots,
            settings,
        }
    }

    /// A receiver that always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Run one full tick.
    pub async fn run_tick(&mut self, now: DateTime<Utc>) -> TickReport {
        self.meta.ticks += 1;
        let mut report = TickReport::default();
        debug!(tick = self.meta.ticks, "Tick starting");

        // 1. Period roll-over
        if self.state.budget.roll_period(now) {
            self.alerts.info(format!(
                "New budget period {}: {} trades available",
                self.state.budget.state().period,
                self.state.budget.trades_remaining()
            ));
        }

        // 2. Exits first
        let monitored = self
            .monitor
            .run(&mut self.state.ledger, &self.executor, &self.alerts)
            .await;
        for exit in &monitored.exits {
            match &exit.sell {
                Ok(Some(sold)) => {
                    for fee in sold.fees() {
                        self.state.budget.record_fee(fee);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if let Some(fee) = e.fee_spent() {
                        self.state.budget.record_fee(fee);
                    }
                }
            }
        }
        report.exits = monitored.exits.len();

        // 3. Mirror watched accounts
        for i in 0..self.state.watched.len() {
            let address = self.state.watched[i].address;
            let cursor = self.state.watched[i].cursor();
            let txs = self.history.poll(address, cursor).await;
            report.polled += txs.len();

            for tx in txs {
                if !self.state.watched[i].is_new(&tx) {
                    continue;
                }
                self.handle_transaction(&tx, address, &mut report).await;
                self.state.watched[i].advance(&tx);
            }
        }

        // 4. Publish
        self.publish(now);

        // 5. Time-boundary checks
        if self.heartbeat.due(now) {
            self.alerts.info(self.heartbeat_text());
        }
        if self.summary.due(now) {
            self.alerts.info(self.summary_text());
        }

        info!(
            tick = self.meta.ticks,
            exits = report.exits,
            polled = report.polled,
            buys = report.buys,
            sells = report.sells,
            budget_skips = report.budget_skips,
            failed = report.failed_trades,
            positions = self.state.ledger.len(),
            "Tick complete"
        );
        report
    }

    async fn handle_transaction(&mut self, tx: &RawTx, source: Address, report: &mut TickReport) {
        match self.decoder.classify(tx) {
            Classification::Irrelevant => {
                debug!(hash = %tx.hash, %source, "Irrelevant transaction");
            }
            Classification::Buy(token) => {
                if let Err(block) = self.state.budget.check_buy() {
                    info!(%token, %source, reason = %block, "Buy skipped by budget");
                    self.alerts.info(format!("Skipped mirror buy of {token}: {block}"));
                    report.budget_skips += 1;
                    return;
                }

                let amount = self.state.budget.trade_size();
                match self
                    .executor
                    .replicate_buy(token, amount, &mut self.state.ledger)
                    .await
                {
                    Ok(bought) => {
                        // A reverted buy uses its slot and its fee but the
                        // value came back.
                        let reverted = bought.outcome.reverted();
                        let spent = if reverted { Decimal::ZERO } else { amount };
                        self.state.budget.record_buy(spent, bought.outcome.fee_paid);
                        report.buys += 1;
                        if reverted {
                            self.alerts.warn(format!(
                                "Mirrored BUY of {token} from {source} reverted on chain, no position kept, tx {}",
                                bought.outcome.hash
                            ));
                        } else {
                            self.alerts.trade(format!(
                                "Mirrored BUY of {token} from {source}: {amount:.6} ETH, tx {}",
                                bought.outcome.hash
                            ));
                        }
                    }
                    Err(e) => {
                        warn!(%token, %source, error = %e, "Mirrored buy failed");
                        report.failed_trades += 1;
                        self.alerts.error(format!("Mirror buy of {token} failed: {e}"));
                    }
                }
            }
            Classification::Sell(token) => match self.executor.replicate_sell(token).await {
                Ok(Some(sold)) => {
                    for fee in sold.fees() {
                        self.state.budget.record_fee(fee);
                    }
                    let closed = self.state.ledger.remove_token(token);
                    report.sells += 1;
                    self.alerts.trade(format!(
                        "Mirrored SELL of {token} from {source}: {:.6} tokens, {closed} position(s) closed, tx {}",
                        wei_to_eth(sold.amount),
                        sold.swap.hash
                    ));
                }
                Ok(None) => {
                    debug!(%token, %source, "Whale sold a token we do not hold");
                }
                Err(e) => {
                    if let Some(fee) = e.fee_spent() {
                        self.state.budget.record_fee(fee);
                    }
                    warn!(%token, %source, error = %e, "Mirrored sell failed");
                    report.failed_trades += 1;
                    self.alerts.error(format!("Mirror sell of {token} failed: {e}"));
                }
            },
        }
    }

    fn publish(&self, now: DateTime<Utc>) {
        self.snapshots
            .send_replace(EngineSnapshot::capture(&self.state, &self.meta, now));
    }

    fn heartbeat_text(&self) -> String {
        format!(
            "{} alive: tick {}, {} open position(s), budget {}",
            self.meta.agent_name,
            self.meta.ticks,
            self.state.ledger.len(),
            self.state.budget.status()
        )
    }

    fn summary_text(&self) -> String {
        let budget = self.state.budget.view();
        format!(
            "Daily summary: {} open position(s), {}/{} trades left in {}, invested {:.6} ETH, fees {:.6} ETH",
            self.state.ledger.len(),
            budget.trades_remaining,
            budget.max_trades,
            budget.period,
            budget.invested,
            budget.fees
        )
    }

    /// Loop until `shutdown` resolves. Shutdown is honoured between ticks.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut delay = Duration::ZERO;

        info!(
            interval_secs = self.settings.tick_interval.as_secs(),
            watched = self.state.watched.len(),
            next_summary = %self.summary.next(),
            "Entering main loop. Press Ctrl+C to stop."
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            }

            let outcome = AssertUnwindSafe(self.run_tick(Utc::now()))
                .catch_unwind()
                .await;

            delay = match outcome {
                Ok(_) => self.settings.tick_interval,
                Err(panic) => {
                    self.meta.failed_ticks += 1;
                    let reason = panic_message(panic.as_ref());
                    error!(
                        tick = self.meta.ticks,
                        reason = %reason,
                        backoff_secs = self.settings.error_backoff.as_secs(),
                        "Tick failed, backing off"
                    );
                    self.alerts.error(format!("Tick failed: {reason}. Retrying after back-off."));
                    self.publish(Utc::now());
                    self.settings.error_backoff
                }
            };
        }

        info!(
            ticks = self.meta.ticks,
            failed = self.meta.failed_ticks,
            positions = self.state.ledger.len(),
            "Scheduler stopped"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
