//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (RPC URL, private key, API keys) are referenced by env-var name
//! in the config and resolved at runtime via `std::env::var`.

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::types::{DEFAULT_STOP_LOSS, DEFAULT_TAKE_PROFIT};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    pub budget: BudgetConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    pub watch: WatchConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_summary_hour")]
    pub daily_summary_hour_utc: u32,
    /// Read balances and quotes but never sign or broadcast.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub rpc_url_env: String,
    pub chain_id: u64,
    pub router_address: Address,
    pub wrapped_native_address: Address,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    /// First block to scan. Defaults to the chain head at start-up.
    #[serde(default)]
    pub start_block: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    pub private_key_env: String,
    /// Optional cross-check against the address derived from the key.
    #[serde(default)]
    pub address_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExplorerConfig {
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default = "default_explorer_action")]
    pub action: String,
    /// Sent as `chainid` for multi-chain (v2) explorer endpoints.
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// How the sell path waits for its approval before swapping.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalWaitMode {
    /// Fixed sleep, then swap.
    Settle,
    /// Poll the approval receipt up to the confirmation timeout.
    Confirm,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_swap_gas")]
    pub swap_gas_limit: u64,
    #[serde(default = "default_approve_gas")]
    pub approve_gas_limit: u64,
    #[serde(default)]
    pub max_gas_price_gwei: Option<Decimal>,
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    #[serde(default = "default_approval_wait")]
    pub approval_wait: ApprovalWaitMode,
    #[serde(default = "default_settle")]
    pub approval_settle_secs: u64,
    #[serde(default = "default_true")]
    pub await_confirmation: bool,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_confirmation_poll")]
    pub confirmation_poll_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_bps: default_slippage_bps(),
            swap_gas_limit: default_swap_gas(),
            approve_gas_limit: default_approve_gas(),
            max_gas_price_gwei: None,
            deadline_secs: default_deadline(),
            approval_wait: default_approval_wait(),
            approval_settle_secs: default_settle(),
            await_confirmation: true,
            confirmation_timeout_secs: default_confirmation_timeout(),
            confirmation_poll_secs: default_confirmation_poll(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    /// Monthly budget in base currency. Takes precedence over `fiat`.
    #[serde(default)]
    pub monthly_budget: Option<Decimal>,
    #[serde(default)]
    pub fiat: Option<FiatBudgetConfig>,
    #[serde(default = "default_max_trades")]
    pub max_trades_per_period: u32,
    /// Cap on cumulative known fees per period, in base currency.
    #[serde(default)]
    pub max_fee_budget: Option<Decimal>,
}

/// A budget expressed in a fiat currency, converted at fixed rates.
#[derive(Debug, Deserialize, Clone)]
pub struct FiatBudgetConfig {
    pub amount: Decimal,
    /// USD per unit of the fiat currency.
    pub fiat_usd_rate: Decimal,
    /// USD per unit of the base currency.
    pub native_usd_price: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    #[serde(default = "default_take_profit")]
    pub take_profit: Decimal,
    #[serde(default = "default_stop_loss")]
    pub stop_loss: Decimal,
    #[serde(default = "default_ratio_precision")]
    pub ratio_precision: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            take_profit: DEFAULT_TAKE_PROFIT,
            stop_loss: DEFAULT_STOP_LOSS,
            ratio_precision: default_ratio_precision(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub addresses: Vec<Address>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
    #[serde(default)]
    pub commands_enabled: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

fn default_tick_interval() -> u64 {
    30
}

fn default_error_backoff() -> u64 {
    60
}

fn default_heartbeat() -> u64 {
    3600
}

fn default_summary_hour() -> u32 {
    18
}

fn default_rpc_timeout() -> u64 {
    20
}

fn default_explorer_action() -> String {
    "txlist".to_string()
}

fn default_http_timeout() -> u64 {
    10
}

fn default_slippage_bps() -> u32 {
    200
}

fn default_swap_gas() -> u64 {
    300_000
}

fn default_approve_gas() -> u64 {
    100_000
}

fn default_deadline() -> u64 {
    300
}

fn default_approval_wait() -> ApprovalWaitMode {
    ApprovalWaitMode::Settle
}

fn default_settle() -> u64 {
    12
}

fn default_true() -> bool {
    true
}

fn default_confirmation_timeout() -> u64 {
    180
}

fn default_confirmation_poll() -> u64 {
    3
}

fn default_max_trades() -> u32 {
    5
}

fn default_take_profit() -> Decimal {
    DEFAULT_TAKE_PROFIT
}

fn default_stop_loss() -> Decimal {
    DEFAULT_STOP_LOSS
}

fn default_ratio_precision() -> u32 {
    4
}

fn default_dashboard_port() -> u16 {
    8088
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        if self.watch.addresses.is_empty() {
            bail!("watch.addresses must list at least one account");
        }
        if self.agent.tick_interval_secs == 0 {
            bail!("agent.tick_interval_secs must be positive");
        }
        if self.agent.daily_summary_hour_utc > 23 {
            bail!("agent.daily_summary_hour_utc must be in 0..=23");
        }
        if self.risk.take_profit <= Decimal::ZERO {
            bail!("risk.take_profit must be positive");
        }
        if self.risk.stop_loss <= Decimal::ZERO || self.risk.stop_loss >= Decimal::ONE {
            bail!("risk.stop_loss must be in (0, 1)");
        }
        if self.budget.max_trades_per_period == 0 {
            bail!("budget.max_trades_per_period must be positive");
        }
        if self.execution.slippage_bps >= 10_000 {
            bail!("execution.slippage_bps must be below 10000");
        }
        if self.budget.monthly_budget()? <= Decimal::ZERO {
            bail!("monthly budget must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an environment variable into a secret.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.agent.tick_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.agent.error_backoff_secs)
    }
}

impl BudgetConfig {
    /// Monthly budget in base currency, rounded to 6 decimal places.
    pub fn monthly_budget(&self) -> Result<Decimal> {
        if let Some(amount) = self.monthly_budget {
            return Ok(amount.round_dp(6));
        }
        let Some(fiat) = &self.fiat else {
            bail!("budget needs either monthly_budget or a [budget.fiat] block");
        };
        if fiat.native_usd_price <= Decimal::ZERO {
            bail!("budget.fiat.native_usd_price must be positive");
        }
        Ok((fiat.amount * fiat.fiat_usd_rate / fiat.native_usd_price).round_dp(6))
    }

    /// Base currency committed to each mirrored buy.
    pub fn trade_size(&self) -> Result<Decimal> {
        let monthly = self.monthly_budget()?;
        Ok((monthly / Decimal::from(self.max_trades_per_period.max(1))).round_dp(6))
    }
}

impl ExecutionConfig {
    /// Gas-price ceiling in wei, if configured.
    pub fn max_gas_price_wei(&self) -> Option<u128> {
        self.max_gas_price_gwei
            .and_then(|gwei| (gwei * dec!(1_000_000_000)).trunc().to_string().parse().ok())
    }
}
