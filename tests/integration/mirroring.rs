//! Mirror-trading scenarios driven tick by tick.

use alloy::primitives::{address, hex, Address, B256, U256};
use alloy::sol_types::SolCall;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use futures::FutureExt;
use secrecy::SecretString;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use shadow::chain::abi::IUniswapV2Router02::{swapExactETHForTokensCall, swapExactTokensForETHCall};
use shadow::chain::wallet::Wallet;
use shadow::engine::budget::{BudgetGovernor, BudgetStatus};
use shadow::engine::decoder::SwapDecoder;
use shadow::engine::executor::{ApprovalWait, ConfirmPolicy, ExecutionParams, TradeExecutor};
use shadow::engine::monitor::{RiskMonitor, RiskThresholds};
use shadow::engine::scheduler::{Scheduler, SchedulerSettings, TickReport};
use shadow::engine::EngineState;
use shadow::notify::{Alert, Alerts};
use shadow::types::{RawTx, WatchedAddress};

use crate::sim_chain::{SimChain, SimExplorer};

const ROUTER: Address = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
const OTHER_ROUTER: Address = address!("d9e1ce17f2641f24ae83637ab66a2cca9c378b9f");
const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
const UNI: Address = address!("1f9840a85d5af5bf1d1762f925bdaddc4201f984");
const PEPE: Address = address!("6982508145454ce325ddbe47a25d4ec3d2311933");
const WHALE: Address = address!("4d2468bef1e33e17f7b017430ded6f7c169f7054");
const WHALE_TWO: Address = address!("28c6c06298d514db089934071355e5743bf21d60");
const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// 0.02 ETH at a 1:1 price, in token units.
const ONE_BUY_QTY: u128 = 20_000_000_000_000_000;

struct Harness {
    chain: SimChain,
    explorer: SimExplorer,
    scheduler: Scheduler,
    alerts: UnboundedReceiver<Alert>,
}

impl Harness {
    async fn tick(&mut self, minute: u32) -> TickReport {
        self.scheduler.run_tick(at(minute)).await
    }

    fn alert_texts(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.alerts.try_recv().ok())
            .map(|a| a.text)
            .collect()
    }

    fn fees(&self) -> Decimal {
        self.scheduler.state().budget.state().fees_this_period
    }
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, minute, 0).unwrap()
}

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        agent_name: "SHADOW-IT".into(),
        tick_interval: Duration::from_secs(30),
        error_backoff: Duration::from_secs(60),
        heartbeat_interval: Duration::from_secs(3600),
        summary_hour_utc: 18,
    }
}

fn harness_with(max_trades: u32, dry_run: bool, whales: &[Address]) -> Harness {
    build_harness(max_trades, dry_run, whales, settings())
}

fn build_harness(
    max_trades: u32,
    dry_run: bool,
    whales: &[Address],
    settings: SchedulerSettings,
) -> Harness {
    let chain = SimChain::new(WETH, U256::from(10u128.pow(18)));
    chain.set_price_milli(UNI, 1000);
    chain.set_price_milli(PEPE, 1000);
    let explorer = SimExplorer::new();

    let wallet = Wallet::from_secret(&SecretString::new(DEV_KEY.to_string()), 1).unwrap();
    let params = ExecutionParams {
        router: ROUTER,
        wrapped_native: WETH,
        slippage_bps: 200,
        swap_gas_limit: 300_000,
        approve_gas_limit: 100_000,
        max_gas_price: None,
        deadline: Duration::from_secs(300),
        approval_wait: ApprovalWait::Settle(Duration::ZERO),
        confirmation: Some(ConfirmPolicy {
            timeout: Duration::from_secs(1),
            poll_every: Duration::from_millis(10),
        }),
    };
    let executor = TradeExecutor::new(Arc::new(chain.clone()), wallet, params, dry_run);

    let state = EngineState::new(
        whales.iter().map(|w| WatchedAddress::new(*w, 100)).collect(),
        BudgetGovernor::new(max_trades, None, dec!(0.02), at(0)),
    );
    let (alerts, rx) = Alerts::channel();
    let scheduler = Scheduler::new(
        state,
        executor,
        Arc::new(explorer.clone()),
        SwapDecoder::new(ROUTER),
        RiskMonitor::new(RiskThresholds {
            take_profit: dec!(0.30),
            stop_loss: dec!(0.15),
            precision: 4,
        }),
        alerts,
        settings,
        at(0),
    );

    Harness {
        chain,
        explorer,
        scheduler,
        alerts: rx,
    }
}

fn harness() -> Harness {
    harness_with(5, false, &[WHALE])
}

fn buy_tx(router: Address, token: Address, block: u64, hash: &str) -> RawTx {
    let call = swapExactETHForTokensCall {
        amountOutMin: U256::ZERO,
        path: vec![WETH, token],
        to: WHALE,
        deadline: U256::from(1_800_000_000u64),
    };
    RawTx {
        block_number: block,
        hash: hash.into(),
        from: WHALE.to_string(),
        to: router.to_string(),
        input: hex::encode_prefixed(call.abi_encode()),
        is_error: "0".into(),
    }
}

fn sell_tx(token: Address, block: u64, hash: &str) -> RawTx {
    let call = swapExactTokensForETHCall {
        amountIn: U256::from(10u128.pow(21)),
        amountOutMin: U256::ZERO,
        path: vec![token, WETH],
        to: WHALE,
        deadline: U256::from(1_800_000_000u64),
    };
    RawTx {
        block_number: block,
        hash: hash.into(),
        from: WHALE.to_string(),
        to: ROUTER.to_string(),
        input: hex::encode_prefixed(call.abi_encode()),
        is_error: "0".into(),
    }
}

#[tokio::test]
async fn test_whale_buy_mirrored_once() {
    let mut h = harness();
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));

    let first = h.tick(1).await;
    assert_eq!(first.buys, 1);

    let positions = h.scheduler.state().ledger.snapshot();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].token, UNI);
    assert_eq!(positions[0].quantity, U256::from(ONE_BUY_QTY));
    assert_eq!(positions[0].entry_value, dec!(0.02));
    assert_eq!(h.scheduler.state().watched[0].cursor(), 101);
    assert_eq!(h.fees(), dec!(0.0001));
    assert_eq!(h.chain.sent_count(), 1);

    // Block 101 comes back again (inclusive start block) but is not re-mirrored.
    let second = h.tick(2).await;
    assert_eq!(second.buys, 0);
    assert_eq!(h.scheduler.state().ledger.len(), 1);
    assert_eq!(h.chain.sent_count(), 1);
    assert_eq!(h.explorer.polls()[1], (WHALE, 101));
}

#[tokio::test]
async fn test_take_profit_exit_liquidates() {
    let mut h = harness();
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.tick(1).await;
    h.chain.set_holding(UNI, U256::from(ONE_BUY_QTY));
    h.alert_texts();

    // 1.31× entry
    h.chain.set_price_milli(UNI, 1310);
    let report = h.tick(2).await;

    assert_eq!(report.exits, 1);
    assert!(h.scheduler.state().ledger.is_empty());
    // buy, approve, swap
    assert_eq!(h.chain.sent_count(), 3);
    // Approval fee is unknown under settle mode.
    assert_eq!(h.fees(), dec!(0.0002));
    let texts = h.alert_texts();
    assert!(texts.iter().any(|t| t.starts_with("TAKE-PROFIT") && t.contains("ratio 1.31")));
}

#[tokio::test]
async fn test_stop_loss_exit_liquidates() {
    let mut h = harness();
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.tick(1).await;
    h.chain.set_holding(UNI, U256::from(ONE_BUY_QTY));
    h.alert_texts();

    // 0.84× entry
    h.chain.set_price_milli(UNI, 840);
    let report = h.tick(2).await;

    assert_eq!(report.exits, 1);
    assert!(h.scheduler.state().ledger.is_empty());
    let texts = h.alert_texts();
    assert!(texts.iter().any(|t| t.starts_with("STOP-LOSS")));
}

#[tokio::test]
async fn test_exit_completes_before_same_tick_rebuy() {
    let mut h = harness();
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.tick(1).await;
    h.chain.set_holding(UNI, U256::from(ONE_BUY_QTY));

    // Take-profit breach and a fresh whale buy of the same token.
    h.chain.set_price_milli(UNI, 1310);
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 102, "0xa2"));
    let report = h.tick(2).await;

    assert_eq!(report.exits, 1);
    assert_eq!(report.buys, 1);
    // The exit read its balance after the first buy and before the second.
    assert_eq!(h.chain.balance_reads(), vec![(UNI, 1)]);
    // buy, approve, swap, buy
    assert_eq!(h.chain.sent_count(), 4);

    let positions = h.scheduler.state().ledger.snapshot();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].entry_tx, B256::repeat_byte(4).to_string());
    assert_eq!(h.scheduler.state().budget.state().trades_this_period, 2);
}

#[tokio::test]
async fn test_panic_mid_revaluation_keeps_unexited_positions() {
    let mut h = harness();
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.explorer.push(WHALE, &buy_tx(ROUTER, PEPE, 102, "0xa2"));
    h.tick(1).await;
    assert_eq!(h.scheduler.state().ledger.len(), 2);

    // UNI exits, then the node dies while PEPE is being quoted.
    h.chain.set_holding(UNI, U256::from(ONE_BUY_QTY));
    h.chain.set_price_milli(UNI, 1310);
    h.chain.panic_on_next_quote(PEPE);
    let outcome = AssertUnwindSafe(h.scheduler.run_tick(at(2)))
        .catch_unwind()
        .await;
    assert!(outcome.is_err());

    let positions = h.scheduler.state().ledger.snapshot();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].token, PEPE);

    // The next tick revalues PEPE normally.
    let report = h.tick(3).await;
    assert_eq!(report.exits, 0);
    assert_eq!(h.scheduler.state().ledger.len(), 1);
}

#[tokio::test]
async fn test_run_survives_a_panicking_tick() {
    let mut h = build_harness(
        5,
        false,
        &[WHALE],
        SchedulerSettings {
            tick_interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
            ..settings()
        },
    );
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.tick(1).await;
    h.alert_texts();

    // Only the first tick of the loop hits the crash.
    h.chain.panic_on_next_quote(UNI);
    let snapshots = h.scheduler.subscribe();
    let Harness {
        scheduler,
        mut alerts,
        ..
    } = h;
    scheduler
        .run(tokio::time::sleep(Duration::from_millis(200)))
        .await;

    let snap = snapshots.borrow().clone();
    assert_eq!(snap.failed_ticks, 1);
    // The manual tick, the failed one, and at least one after the back-off.
    assert!(snap.ticks >= 3, "only {} ticks ran", snap.ticks);
    assert_eq!(snap.positions.len(), 1);

    let texts: Vec<String> = std::iter::from_fn(|| alerts.try_recv().ok())
        .map(|a| a.text)
        .collect();
    assert!(texts
        .iter()
        .any(|t| t.starts_with("Tick failed: simulated node crash")));
}

#[tokio::test]
async fn test_budget_resets_on_first_tick_of_next_month() {
    let mut h = harness_with(1, false, &[WHALE]);
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.tick(1).await;
    assert_eq!(h.scheduler.state().budget.status(), BudgetStatus::Exhausted);
    h.alert_texts();

    let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 5, 0).unwrap();
    h.scheduler.run_tick(april).await;

    let budget = h.scheduler.state().budget.state();
    assert_eq!(budget.trades_this_period, 0);
    assert_eq!(budget.fees_this_period, Decimal::ZERO);
    assert_eq!(budget.period.to_string(), "2026-04");
    // Positions carry over.
    assert_eq!(h.scheduler.state().ledger.len(), 1);

    let texts = h.alert_texts();
    assert!(texts
        .iter()
        .any(|t| t == "New budget period 2026-04: 1 trades available"));
}

#[tokio::test]
async fn test_position_within_band_is_held() {
    let mut h = harness();
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.tick(1).await;

    h.chain.set_price_milli(UNI, 1100);
    let report = h.tick(2).await;
    assert_eq!(report.exits, 0);
    assert_eq!(h.scheduler.state().ledger.len(), 1);
    assert_eq!(h.chain.sent_count(), 1);
}

#[tokio::test]
async fn test_quote_outage_keeps_position() {
    let mut h = harness();
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.tick(1).await;

    h.chain.set_quotes_down(true);
    let report = h.tick(2).await;
    assert_eq!(report.exits, 0);
    assert_eq!(h.scheduler.state().ledger.len(), 1);

    // Prices come back in profit: the position is still tracked and exits.
    h.chain.set_quotes_down(false);
    h.chain.set_price_milli(UNI, 1400);
    h.chain.set_holding(UNI, U256::from(ONE_BUY_QTY));
    let report = h.tick(3).await;
    assert_eq!(report.exits, 1);
    assert!(h.scheduler.state().ledger.is_empty());
}

#[tokio::test]
async fn test_whale_sell_closes_all_positions_in_token() {
    let mut h = harness();
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 102, "0xa2"));
    h.explorer.push(WHALE, &buy_tx(ROUTER, PEPE, 102, "0xa3"));
    let report = h.tick(1).await;
    assert_eq!(report.buys, 3);
    assert_eq!(h.scheduler.state().ledger.len(), 3);

    h.chain.set_holding(UNI, U256::from(2 * ONE_BUY_QTY));
    h.explorer.push(WHALE, &sell_tx(UNI, 103, "0xb1"));
    let report = h.tick(2).await;

    assert_eq!(report.sells, 1);
    let positions = h.scheduler.state().ledger.snapshot();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].token, PEPE);
    assert_eq!(h.scheduler.state().watched[0].cursor(), 103);
    // Sells never use a trade slot.
    assert_eq!(h.scheduler.state().budget.state().trades_this_period, 3);
}

#[tokio::test]
async fn test_whale_sell_without_holding_is_noop() {
    let mut h = harness();
    h.explorer.push(WHALE, &sell_tx(UNI, 101, "0xb1"));

    let report = h.tick(1).await;
    assert_eq!(report.sells, 0);
    assert_eq!(report.failed_trades, 0);
    assert_eq!(h.chain.sent_count(), 0);
    assert_eq!(h.scheduler.state().watched[0].cursor(), 101);
}

#[tokio::test]
async fn test_explorer_error_leaves_state_unchanged() {
    let mut h = harness();
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.explorer
        .force_body(Some(r#"{"status":"0","message":"NOTOK","result":"Max rate limit reached"}"#));

    let report = h.tick(1).await;
    assert_eq!(report, TickReport::default());
    assert_eq!(h.scheduler.state().watched[0].cursor(), 100);
    assert!(h.scheduler.state().ledger.is_empty());

    // Recovery picks the buy up on the next tick.
    h.explorer.force_body(None);
    let report = h.tick(2).await;
    assert_eq!(report.buys, 1);
}

#[tokio::test]
async fn test_budget_exhaustion_skips_buys() {
    let mut h = harness_with(2, false, &[WHALE]);
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));
    h.explorer.push(WHALE, &buy_tx(ROUTER, PEPE, 102, "0xa2"));
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 103, "0xa3"));

    let report = h.tick(1).await;
    assert_eq!(report.buys, 2);
    assert_eq!(report.budget_skips, 1);
    assert_eq!(h.scheduler.state().ledger.len(), 2);
    assert_eq!(h.scheduler.state().watched[0].cursor(), 103);

    let snap = h.scheduler.subscribe().borrow().clone();
    assert_eq!(snap.budget.status, BudgetStatus::Exhausted);
    assert_eq!(snap.budget.trades_remaining, 0);
    assert_eq!(snap.total_invested, dec!(0.04));

    let texts = h.alert_texts();
    assert!(texts.iter().any(|t| t.starts_with("Skipped mirror buy")));
}

#[tokio::test]
async fn test_dry_run_never_broadcasts() {
    let mut h = harness_with(5, true, &[WHALE]);
    h.explorer.push(WHALE, &buy_tx(ROUTER, UNI, 101, "0xa1"));

    let report = h.tick(1).await;
    assert_eq!(report.buys, 1);
    assert_eq!(h.chain.sent_count(), 0);

    let positions = h.scheduler.state().ledger.snapshot();
    assert_eq!(positions.len(), 1);
    assert!(positions[0].entry_tx.starts_with("dry-run-"));
    assert_eq!(h.fees(), Decimal::ZERO);
}

#[tokio::test]
async fn test_reverted_and_foreign_transactions_ignored() {
    let mut h = harness();
    let mut reverted = buy_tx(ROUTER, UNI, 101, "0xa1");
    reverted.is_error = "1".into();
    h.explorer.push(WHALE, &reverted);
    h.explorer.push(WHALE, &buy_tx(OTHER_ROUTER, UNI, 102, "0xa2"));

    let report = h.tick(1).await;
    assert_eq!(report.polled, 2);
    assert_eq!(report.buys, 0);
    assert!(h.scheduler.state().ledger.is_empty());
    assert_eq!(h.scheduler.state().watched[0].cursor(), 102);
}

#[tokio::test]
async fn test_accounts_polled_in_configuration_order() {
    let mut h = harness_with(5, false, &[WHALE, WHALE_TWO]);
    h.explorer.push(WHALE_TWO, &buy_tx(ROUTER, PEPE, 105, "0xc1"));

    h.tick(1).await;
    assert_eq!(h.explorer.polls(), vec![(WHALE, 100), (WHALE_TWO, 100)]);
    assert_eq!(h.scheduler.state().watched[0].cursor(), 100);
    assert_eq!(h.scheduler.state().watched[1].cursor(), 105);
    assert_eq!(h.scheduler.state().ledger.positions()[0].token, PEPE);
}
