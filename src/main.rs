//! SHADOW — Whale mirror-trading agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! verifies the chain and wallet, wires the engine together and runs the
//! tick loop until Ctrl+C.

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use shadow::chain::rpc::RpcLedger;
use shadow::chain::wallet::Wallet;
use shadow::chain::LedgerClient;
use shadow::config::AppConfig;
use shadow::dashboard::spawn_dashboard;
use shadow::engine::budget::BudgetGovernor;
use shadow::engine::decoder::SwapDecoder;
use shadow::engine::executor::{ExecutionParams, TradeExecutor};
use shadow::engine::monitor::{RiskMonitor, RiskThresholds};
use shadow::engine::poller::EtherscanClient;
use shadow::engine::scheduler::{Scheduler, SchedulerSettings};
use shadow::engine::EngineState;
use shadow::notify::commands::CommandListener;
use shadow::notify::telegram::{TelegramClient, TelegramNotifier};
use shadow::notify::{spawn_dispatcher, Alerts, LogNotifier, Notifier};
use shadow::types::WatchedAddress;

const BANNER: &str = r#"
 ____  _   _    _    ____   _____        __
/ ___|| | | |  / \  |  _ \ / _ \ \      / /
\___ \| |_| | / _ \ | | | | | | \ \ /\ / /
 ___) |  _  |/ ___ \| |_| | |_| |\ V  V /
|____/|_| |_/_/   \_\____/ \___/  \_/\_/

  Whale mirror-trading agent
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("SHADOW_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    let monthly_budget = cfg.budget.monthly_budget()?;
    let trade_size = cfg.budget.trade_size()?;
    info!(
        agent_name = %cfg.agent.name,
        tick_interval_secs = cfg.agent.tick_interval_secs,
        watched = cfg.watch.addresses.len(),
        monthly_budget = %monthly_budget,
        trade_size = %trade_size,
        dry_run = cfg.agent.dry_run,
        "SHADOW starting up"
    );

    // -- Chain and wallet ------------------------------------------------

    let rpc_url = AppConfig::resolve_env(&cfg.chain.rpc_url_env)?;
    let rpc = RpcLedger::connect(&rpc_url, Duration::from_secs(cfg.chain.rpc_timeout_secs))?;

    let chain_id = rpc.chain_id().await.context("Failed to read chain id from RPC")?;
    if chain_id != cfg.chain.chain_id {
        bail!(
            "RPC reports chain id {chain_id}, config expects {}",
            cfg.chain.chain_id
        );
    }

    let wallet = {
        let key = AppConfig::resolve_secret(&cfg.wallet.private_key_env)?;
        Wallet::from_secret(&key, chain_id)?
    };
    if let Some(env) = &cfg.wallet.address_env {
        match std::env::var(env) {
            Ok(expected) => {
                let expected: Address = expected
                    .trim()
                    .parse()
                    .with_context(|| format!("{env} is not a valid address"))?;
                if expected != wallet.address() {
                    bail!("{env} ({expected}) does not match the private key ({})", wallet.address());
                }
            }
            Err(_) => warn!(env = %env, "Wallet address variable not set, skipping cross-check"),
        }
    }

    let head = rpc.block_number().await.context("Failed to read chain head")?;
    let start_block = cfg.chain.start_block.unwrap_or(head);
    info!(
        chain_id,
        wallet = %wallet.address(),
        head,
        start_block,
        "Connected to chain"
    );

    let chain: Arc<dyn LedgerClient> = Arc::new(rpc);

    // -- Notifications ---------------------------------------------------

    let (alerts, alert_rx) = Alerts::channel();
    let telegram = telegram_client(&cfg)?;
    let notifier: Arc<dyn Notifier> = match &telegram {
        Some(client) => Arc::new(TelegramNotifier::new(client.clone())),
        None => {
            warn!("No Telegram credentials configured, alerts go to the log only");
            Arc::new(LogNotifier)
        }
    };
    let dispatcher = spawn_dispatcher(alert_rx, notifier);

    // -- Engine ----------------------------------------------------------

    let now = Utc::now();
    let budget = BudgetGovernor::new(
        cfg.budget.max_trades_per_period,
        cfg.budget.max_fee_budget,
        trade_size,
        now,
    );
    let watched = cfg
        .watch
        .addresses
        .iter()
        .map(|address| WatchedAddress::new(*address, start_block))
        .collect();

    let explorer_key = AppConfig::resolve_secret(&cfg.explorer.api_key_env)?;
    let history = Arc::new(EtherscanClient::new(&cfg.explorer, explorer_key)?);

    let executor = TradeExecutor::new(
        chain,
        wallet,
        ExecutionParams::from_config(&cfg.chain, &cfg.execution),
        cfg.agent.dry_run,
    );

    let scheduler = Scheduler::new(
        EngineState::new(watched, budget),
        executor,
        history,
        SwapDecoder::new(cfg.chain.router_address),
        RiskMonitor::new(RiskThresholds::from(&cfg.risk)),
        alerts.clone(),
        SchedulerSettings {
            agent_name: cfg.agent.name.clone(),
            tick_interval: cfg.tick_interval(),
            error_backoff: cfg.error_backoff(),
            heartbeat_interval: Duration::from_secs(cfg.agent.heartbeat_interval_secs),
            summary_hour_utc: cfg.agent.daily_summary_hour_utc,
        },
        now,
    );

    // -- Read-only consumers ---------------------------------------------

    if cfg.dashboard.enabled {
        spawn_dashboard(scheduler.subscribe(), cfg.dashboard.port).await?;
    }

    match telegram {
        Some(client) if cfg.alerts.commands_enabled => {
            tokio::spawn(CommandListener::new(client, scheduler.subscribe()).run());
        }
        _ => {}
    }

    alerts.info(format!(
        "{} started: watching {} account(s), {} trades of {:.6} ETH this month{}",
        cfg.agent.name,
        cfg.watch.addresses.len(),
        cfg.budget.max_trades_per_period,
        trade_size,
        if cfg.agent.dry_run { " (dry run)" } else { "" }
    ));

    // -- Main loop -------------------------------------------------------

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    scheduler.run(shutdown).await;

    alerts.info(format!("{} stopped", cfg.agent.name));
    drop(alerts);
    // Give the dispatcher a moment to flush the last alerts.
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher).await;

    info!("SHADOW shut down cleanly.");
    Ok(())
}

/// Build the Telegram client if both credentials resolve.
fn telegram_client(cfg: &AppConfig) -> Result<Option<Arc<TelegramClient>>> {
    let (Some(token_env), Some(chat_env)) = (
        cfg.alerts.telegram_bot_token_env.as_deref(),
        cfg.alerts.telegram_chat_id_env.as_deref(),
    ) else {
        return Ok(None);
    };

    match (AppConfig::resolve_secret(token_env), AppConfig::resolve_env(chat_env)) {
        (Ok(token), Ok(chat_id)) => Ok(Some(Arc::new(TelegramClient::new(token, chat_id)?))),
        _ => {
            warn!(token_env, chat_env, "Telegram variables not set");
            Ok(None)
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shadow=info"));

    let json_logging = std::env::var("SHADOW_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
