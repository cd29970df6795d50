//! In-memory chain and explorer for integration testing.
//!
//! `SimChain` implements `LedgerClient` over a constant-price pool per
//! token; `SimExplorer` implements `HistorySource` by rendering explorer
//! JSON envelopes and running them through the real parser. All state is
//! controllable from test code.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use shadow::chain::{LedgerClient, ReceiptInfo};
use shadow::engine::poller::{parse_envelope, HistorySource};
use shadow::types::{ChainError, RawTx};

/// Gas used by every simulated transaction.
pub const SIM_GAS_USED: u64 = 100_000;

/// Effective gas price of every simulated transaction (1 gwei).
pub const SIM_GAS_PRICE: u128 = 1_000_000_000;

#[derive(Default)]
struct ChainState {
    native: U256,
    /// Base-currency value of one whole token, in thousandths.
    prices: HashMap<Address, u64>,
    holdings: HashMap<Address, U256>,
    sent: Vec<Vec<u8>>,
    quotes_down: bool,
    /// The next quote touching this token panics, once.
    panic_on_quote: Option<Address>,
    /// `(token, transactions sent so far)` at each token balance read.
    balance_reads: Vec<(Address, usize)>,
}

/// A deterministic chain with one constant-price pool per token.
#[derive(Clone)]
pub struct SimChain {
    wrapped_native: Address,
    state: Arc<Mutex<ChainState>>,
}

impl SimChain {
    pub fn new(wrapped_native: Address, native: U256) -> Self {
        Self {
            wrapped_native,
            state: Arc::new(Mutex::new(ChainState {
                native,
                ..Default::default()
            })),
        }
    }

    pub fn set_price_milli(&self, token: Address, milli: u64) {
        self.state.lock().unwrap().prices.insert(token, milli);
    }

    pub fn set_holding(&self, token: Address, amount: U256) {
        self.state.lock().unwrap().holdings.insert(token, amount);
    }

    pub fn set_quotes_down(&self, down: bool) {
        self.state.lock().unwrap().quotes_down = down;
    }

    pub fn panic_on_next_quote(&self, token: Address) {
        self.state.lock().unwrap().panic_on_quote = Some(token);
    }

    /// Each token balance read with the number of transactions broadcast
    /// before it, in order.
    pub fn balance_reads(&self) -> Vec<(Address, usize)> {
        self.state.lock().unwrap().balance_reads.clone()
    }

    /// Number of raw transactions broadcast so far.
    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }
}

#[async_trait]
impl LedgerClient for SimChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(100)
    }

    async fn native_balance(&self, _owner: Address) -> Result<U256, ChainError> {
        Ok(self.state.lock().unwrap().native)
    }

    async fn nonce(&self, _owner: Address) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().sent.len() as u64)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(SIM_GAS_PRICE)
    }

    async fn amounts_out(
        &self,
        _router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> Result<Vec<U256>, ChainError> {
        // Disarm and release the lock before panicking so the mutex is not
        // poisoned.
        let armed = {
            let mut state = self.state.lock().unwrap();
            if state.panic_on_quote.is_some_and(|t| path.contains(&t)) {
                state.panic_on_quote.take()
            } else {
                None
            }
        };
        if let Some(token) = armed {
            panic!("simulated node crash quoting {token}");
        }

        let state = self.state.lock().unwrap();
        if state.quotes_down {
            return Err(ChainError::Rpc("execution reverted".into()));
        }
        let (from, to) = match path.as_slice() {
            [from, to] => (*from, *to),
            _ => return Err(ChainError::Rpc("unsupported path".into())),
        };

        let thousand = U256::from(1000u64);
        let out = if from == self.wrapped_native {
            let price = state
                .prices
                .get(&to)
                .ok_or_else(|| ChainError::Rpc("no pool".into()))?;
            amount_in * thousand / U256::from(*price)
        } else {
            let price = state
                .prices
                .get(&from)
                .ok_or_else(|| ChainError::Rpc("no pool".into()))?;
            amount_in * U256::from(*price) / thousand
        };
        Ok(vec![amount_in, out])
    }

    async fn token_balance(&self, token: Address, _owner: Address) -> Result<U256, ChainError> {
        let mut state = self.state.lock().unwrap();
        let sent = state.sent.len();
        state.balance_reads.push((token, sent));
        Ok(state.holdings.get(&token).copied().unwrap_or(U256::ZERO))
    }

    async fn send_raw(&self, raw: Vec<u8>) -> Result<B256, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.sent.push(raw);
        Ok(B256::repeat_byte(state.sent.len() as u8))
    }

    async fn receipt(&self, _hash: B256) -> Result<Option<ReceiptInfo>, ChainError> {
        Ok(Some(ReceiptInfo {
            success: true,
            gas_used: SIM_GAS_USED,
            effective_gas_price: SIM_GAS_PRICE,
        }))
    }
}

// ---------------------------------------------------------------------------
// Explorer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ExplorerState {
    rows: HashMap<Address, Vec<serde_json::Value>>,
    /// When set, every poll answers with this body instead.
    forced_body: Option<String>,
    polls: Vec<(Address, u64)>,
}

/// Serves the transaction list of each watched account from memory.
#[derive(Clone, Default)]
pub struct SimExplorer {
    state: Arc<Mutex<ExplorerState>>,
}

impl SimExplorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, account: Address, tx: &RawTx) {
        let row = serde_json::json!({
            "blockNumber": tx.block_number.to_string(),
            "hash": tx.hash,
            "from": tx.from,
            "to": tx.to,
            "input": tx.input,
            "isError": tx.is_error,
        });
        self.state.lock().unwrap().rows.entry(account).or_default().push(row);
    }

    pub fn force_body(&self, body: Option<&str>) {
        self.state.lock().unwrap().forced_body = body.map(str::to_string);
    }

    /// Every `(account, cursor)` pair polled so far, in order.
    pub fn polls(&self) -> Vec<(Address, u64)> {
        self.state.lock().unwrap().polls.clone()
    }

    fn body_for(&self, account: Address, cursor: u64) -> String {
        let mut state = self.state.lock().unwrap();
        state.polls.push((account, cursor));
        if let Some(body) = &state.forced_body {
            return body.clone();
        }

        // Inclusive of `startblock`, ascending, like the real endpoint.
        let mut rows: Vec<serde_json::Value> = state
            .rows
            .get(&account)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        row["blockNumber"]
                            .as_str()
                            .and_then(|b| b.parse::<u64>().ok())
                            .is_some_and(|b| b >= cursor)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|row| {
            row["blockNumber"]
                .as_str()
                .and_then(|b| b.parse::<u64>().ok())
                .unwrap_or(0)
        });

        if rows.is_empty() {
            serde_json::json!({"status": "0", "message": "No transactions found", "result": []})
                .to_string()
        } else {
            serde_json::json!({"status": "1", "message": "OK", "result": rows}).to_string()
        }
    }
}

#[async_trait]
impl HistorySource for SimExplorer {
    async fn poll(&self, address: Address, cursor: u64) -> Vec<RawTx> {
        parse_envelope(&self.body_for(address, cursor))
    }
}
