//! Trade executor.
//!
//! Replicates a detected swap from the operator's wallet:
//! - buy: one `swapExactETHForTokens` call, recorded as a new position
//! - sell: `approve` the router for the whole token balance, then
//!   `swapExactTokensForETH` for all of it
//!
//! Every submission reads the nonce immediately before signing. The
//! executor is only ever driven from the scheduler's single task, so no two
//! submissions from the wallet are in flight at once.

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;
use chrono::Utc;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::abi::IUniswapV2Router02::{swapExactETHForTokensCall, swapExactTokensForETHCall};
use crate::chain::abi::IERC20::approveCall;
use crate::chain::wallet::{CallRequest, Wallet};
use crate::chain::{LedgerClient, ReceiptInfo};
use crate::config::{ApprovalWaitMode, ChainConfig, ExecutionConfig};
use crate::engine::positions::PositionLedger;
use crate::types::{
    eth_to_wei, min_output, wei_to_eth, wei_to_gwei, ChainError, FeePaid, Position,
    PositionError, TradeError, TxOutcome,
};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// How a sell waits for its approval before swapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalWait {
    /// Unconditional sleep.
    Settle(Duration),
    /// Poll the approval receipt up to the given timeout.
    Confirm(Duration),
}

/// Receipt polling after a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPolicy {
    pub timeout: Duration,
    pub poll_every: Duration,
}

#[derive(Debug, Clone)]
pub struct ExecutionParams {
    pub router: Address,
    pub wrapped_native: Address,
    pub slippage_bps: u32,
    pub swap_gas_limit: u64,
    pub approve_gas_limit: u64,
    /// Buys are refused above this gas price (wei).
    pub max_gas_price: Option<u128>,
    pub deadline: Duration,
    pub approval_wait: ApprovalWait,
    /// `None` skips receipt polling entirely; fees are then unknown.
    pub confirmation: Option<ConfirmPolicy>,
}

impl ExecutionParams {
    pub fn from_config(chain: &ChainConfig, exec: &ExecutionConfig) -> Self {
        let confirm_timeout = Duration::from_secs(exec.confirmation_timeout_secs);
        let approval_wait = match exec.approval_wait {
            ApprovalWaitMode::Settle => {
                ApprovalWait::Settle(Duration::from_secs(exec.approval_settle_secs))
            }
            ApprovalWaitMode::Confirm => ApprovalWait::Confirm(confirm_timeout),
        };

        Self {
            router: chain.router_address,
            wrapped_native: chain.wrapped_native_address,
            slippage_bps: exec.slippage_bps,
            swap_gas_limit: exec.swap_gas_limit,
            approve_gas_limit: exec.approve_gas_limit,
            max_gas_price: exec.max_gas_price_wei(),
            deadline: Duration::from_secs(exec.deadline_secs),
            approval_wait,
            confirmation: exec.await_confirmation.then_some(ConfirmPolicy {
                timeout: confirm_timeout,
                poll_every: Duration::from_secs(exec.confirmation_poll_secs.max(1)),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A submitted mirrored buy and the position it opened. If
/// `outcome.reverted()`, that position is no longer in the ledger.
#[derive(Debug, Clone)]
pub struct BuyReport {
    pub position: Position,
    pub min_out: U256,
    pub outcome: TxOutcome,
}

/// A submitted full-balance exit.
#[derive(Debug, Clone)]
pub struct SellReport {
    pub token: Address,
    pub amount: U256,
    pub min_out: U256,
    pub approval: TxOutcome,
    pub swap: TxOutcome,
}

impl SellReport {
    pub fn fees(&self) -> [FeePaid; 2] {
        [self.approval.fee_paid, self.swap.fee_paid]
    }
}

impl fmt::Display for SellReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sold {:.6} of {} (approve {}, swap {})",
            wei_to_eth(self.amount),
            self.token,
            self.approval.hash,
            self.swap.hash
        )
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TradeExecutor {
    chain: Arc<dyn LedgerClient>,
    wallet: Wallet,
    params: ExecutionParams,
    dry_run: bool,
}

impl TradeExecutor {
    pub fn new(
        chain: Arc<dyn LedgerClient>,
        wallet: Wallet,
        params: ExecutionParams,
        dry_run: bool,
    ) -> Self {
        Self {
            chain,
            wallet,
            params,
            dry_run,
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Mirror a buy of `token` worth `amount` base currency.
    ///
    /// On submission the position is appended to `ledger` with the quoted
    /// output as its quantity. A confirmation timeout leaves it in place; a
    /// confirmed revert removes it again, and the report still carries the
    /// fee.
    pub async fn replicate_buy(
        &self,
        token: Address,
        amount: Decimal,
        ledger: &mut PositionLedger,
    ) -> Result<BuyReport, TradeError> {
        if amount <= Decimal::ZERO {
            return Err(PositionError::InvalidEntryValue(amount).into());
        }
        let me = self.address();

        // 1. Funds
        let needed = eth_to_wei(amount);
        let balance = self.chain.native_balance(me).await?;
        if balance < needed {
            return Err(TradeError::InsufficientFunds {
                needed: amount,
                available: wei_to_eth(balance),
            });
        }

        // 2. Quote
        let path = vec![self.params.wrapped_native, token];
        let expected = self
            .quote(needed, path.clone())
            .await
            .map_err(|e| TradeError::QuoteUnavailable(e.to_string()))?;
        if expected.is_zero() {
            return Err(TradeError::QuoteUnavailable(format!("zero output quoted for {token}")));
        }

        // 3. Slippage floor
        let min_out = min_output(expected, self.params.slippage_bps);

        // 4. Sign and submit
        let gas_price = self.checked_gas_price().await?;
        let input = swapExactETHForTokensCall {
            amountOutMin: min_out,
            path,
            to: me,
            deadline: self.deadline(),
        }
        .abi_encode();
        let outcome = self
            .submit(self.params.router, needed, input, self.params.swap_gas_limit, gas_price)
            .await?;

        // 5. Record the position before waiting on anything else.
        let position = Position::open(token, expected, amount, outcome.hash.clone())?;
        ledger.open(position.clone());
        info!(
            %token,
            spent = %amount,
            quantity = %position.whole_tokens(),
            min_out = %min_out,
            tx = %outcome.hash,
            dry_run = self.dry_run,
            "Mirrored buy submitted"
        );

        // 6. Fee
        let outcome = self.confirm(outcome).await;
        if outcome.reverted() {
            warn!(%token, tx = %outcome.hash, "Mirrored buy reverted on chain, dropping its position");
            ledger.remove_entry(&outcome.hash);
        }

        Ok(BuyReport {
            position,
            min_out,
            outcome,
        })
    }

    /// Liquidate the wallet's entire balance of `token`.
    ///
    /// Returns `Ok(None)` when there is nothing to sell. The position ledger
    /// is left untouched; removing positions is the caller's call.
    pub async fn replicate_sell(&self, token: Address) -> Result<Option<SellReport>, TradeError> {
        let me = self.address();

        // 1. Balance
        let amount = self.chain.token_balance(token, me).await?;
        if amount.is_zero() {
            debug!(%token, "No balance to sell");
            return Ok(None);
        }

        // Exits ignore the gas ceiling.
        let gas_price = self.chain.gas_price().await?;

        // 2. Approve the router for the full balance, then wait.
        let approve_input = approveCall {
            spender: self.params.router,
            amount,
        }
        .abi_encode();
        let approval = self
            .submit(token, U256::ZERO, approve_input, self.params.approve_gas_limit, gas_price)
            .await?;
        let approval = self.await_approval(approval).await?;

        // 3. Swap everything back. The approval is paid for from here on.
        let (min_out, swap) = self
            .submit_exit_swap(token, amount)
            .await
            .map_err(|e| TradeError::ExitAbandoned {
                approval: approval.clone(),
                reason: e.to_string(),
            })?;

        // 4. Outcome
        let swap = self.confirm(swap).await;
        Ok(Some(SellReport {
            token,
            amount,
            min_out,
            approval,
            swap,
        }))
    }

    /// Current value of `quantity` of `token` in base currency, per the
    /// router's quote.
    pub async fn quote_value(&self, token: Address, quantity: U256) -> Result<Decimal, ChainError> {
        let out = self
            .quote(quantity, vec![token, self.params.wrapped_native])
            .await?;
        Ok(wei_to_eth(out))
    }

    // -- internals --------------------------------------------------------

    async fn submit_exit_swap(
        &self,
        token: Address,
        amount: U256,
    ) -> Result<(U256, TxOutcome), TradeError> {
        let path = vec![token, self.params.wrapped_native];
        let min_out = match self.quote(amount, path.clone()).await {
            Ok(expected) => min_output(expected, self.params.slippage_bps),
            Err(e) => {
                warn!(%token, error = %e, "Exit quote failed, selling without a floor");
                U256::ZERO
            }
        };
        let swap_input = swapExactTokensForETHCall {
            amountIn: amount,
            amountOutMin: min_out,
            path,
            to: self.address(),
            deadline: self.deadline(),
        }
        .abi_encode();
        let gas_price = self.chain.gas_price().await?;
        let swap = self
            .submit(self.params.router, U256::ZERO, swap_input, self.params.swap_gas_limit, gas_price)
            .await?;
        info!(
            %token,
            amount = %wei_to_eth(amount),
            min_out = %min_out,
            tx = %swap.hash,
            dry_run = self.dry_run,
            "Exit swap submitted"
        );
        Ok((min_out, swap))
    }

    /// Last element of `getAmountsOut`.
    async fn quote(&self, amount_in: U256, path: Vec<Address>) -> Result<U256, ChainError> {
        let amounts = self
            .chain
            .amounts_out(self.params.router, amount_in, path)
            .await?;
        amounts
            .last()
            .copied()
            .ok_or_else(|| ChainError::Decode("getAmountsOut returned no amounts".into()))
    }

    async fn checked_gas_price(&self) -> Result<u128, TradeError> {
        let current = self.chain.gas_price().await?;
        match self.params.max_gas_price {
            Some(ceiling) if current > ceiling => Err(TradeError::GasPriceExceeded {
                current_gwei: wei_to_gwei(current),
                ceiling_gwei: wei_to_gwei(ceiling),
            }),
            _ => Ok(current),
        }
    }

    fn deadline(&self) -> U256 {
        let now = Utc::now().timestamp().max(0) as u64;
        U256::from(now + self.params.deadline.as_secs())
    }

    /// Sign and broadcast one call. In dry-run mode nothing leaves the
    /// process and a synthetic outcome is returned.
    async fn submit(
        &self,
        to: Address,
        value: U256,
        input: Vec<u8>,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<TxOutcome, TradeError> {
        if self.dry_run {
            let outcome = TxOutcome::dry_run();
            info!(%to, %value, tx = %outcome.hash, "[DRY RUN] Would submit transaction");
            return Ok(outcome);
        }

        let nonce = self
            .chain
            .nonce(self.address())
            .await
            .map_err(|e| TradeError::SubmissionFailed(format!("nonce read failed: {e}")))?;
        let signed = self
            .wallet
            .sign(CallRequest {
                to,
                value,
                input,
                nonce,
                gas_price,
                gas_limit,
            })
            .map_err(|e| TradeError::SubmissionFailed(e.to_string()))?;
        let hash = self
            .chain
            .send_raw(signed.raw)
            .await
            .map_err(|e| TradeError::SubmissionFailed(e.to_string()))?;

        debug!(%to, nonce, tx = %hash, "Transaction broadcast");
        Ok(TxOutcome::pending(hash.to_string()))
    }

    /// Apply the confirmation policy to a fresh outcome.
    async fn confirm(&self, outcome: TxOutcome) -> TxOutcome {
        let Some(policy) = self.params.confirmation else {
            return outcome;
        };
        if outcome.is_dry_run() {
            return outcome;
        }
        let Ok(hash) = outcome.hash.parse::<B256>() else {
            return outcome;
        };

        match self.await_receipt(hash, policy.timeout, policy.poll_every).await {
            Some(receipt) => settled(outcome, &receipt),
            None => {
                warn!(
                    tx = %outcome.hash,
                    timeout_secs = policy.timeout.as_secs(),
                    "Confirmation timed out, fee unknown"
                );
                outcome
            }
        }
    }

    async fn await_approval(&self, approval: TxOutcome) -> Result<TxOutcome, TradeError> {
        if approval.is_dry_run() {
            return Ok(approval);
        }

        match self.params.approval_wait {
            ApprovalWait::Settle(delay) => {
                debug!(delay_secs = delay.as_secs(), "Waiting for approval to settle");
                tokio::time::sleep(delay).await;
                Ok(approval)
            }
            ApprovalWait::Confirm(timeout) => {
                let Ok(hash) = approval.hash.parse::<B256>() else {
                    return Err(TradeError::ExitAbandoned {
                        reason: "unparseable approval hash".into(),
                        approval,
                    });
                };
                let poll_every = self
                    .params
                    .confirmation
                    .map(|p| p.poll_every)
                    .unwrap_or(Duration::from_secs(3));
                match self.await_receipt(hash, timeout, poll_every).await {
                    Some(receipt) if receipt.success => Ok(settled(approval, &receipt)),
                    Some(receipt) => Err(TradeError::ExitAbandoned {
                        approval: settled(approval, &receipt),
                        reason: "approval reverted".into(),
                    }),
                    None => Err(TradeError::ExitAbandoned {
                        reason: format!("approval not confirmed within {}s", timeout.as_secs()),
                        approval,
                    }),
                }
            }
        }
    }

    /// Poll for a receipt until `timeout`. Read errors count as "not yet".
    async fn await_receipt(
        &self,
        hash: B256,
        timeout: Duration,
        poll_every: Duration,
    ) -> Option<ReceiptInfo> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.chain.receipt(hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                Err(e) => debug!(tx = %hash, error = %e, "Receipt poll failed"),
            }
            if tokio::time::Instant::now() + poll_every > deadline {
                return None;
            }
            tokio::time::sleep(poll_every).await;
        }
    }
}

fn settled(outcome: TxOutcome, receipt: &ReceiptInfo) -> TxOutcome {
    TxOutcome {
        confirmed: receipt.success,
        fee_paid: FeePaid::Known(wei_to_eth(receipt.fee_wei())),
        ..outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
