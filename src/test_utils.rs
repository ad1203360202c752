//! Testing utilities
//!
//! Fake `ChainProvider` and `TokenService` implementations backed by in-memory
//! state, so adapters, listener and orchestrator can be exercised against a
//! deterministic chain without any network access. Used by unit tests and the
//! integration tests alike.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::types::{Address, U256};

use crate::error::{BridgeError, Result};
use crate::providers::{
    ChainProvider, LogFilter, RawLog, ReceiptStatus, TokenService, TxReceipt, TxRequest,
};
use crate::types::chain::Chain;

/// In-memory fake chain provider.
///
/// Every successful `send_transaction` mines a receipt at the next block and
/// attaches any queued logs. Each `get_block_number` call advances the head by
/// one when auto-mine is on, so confirmation depths grow as callers poll.
pub struct MockChainProvider {
    chains: Vec<Chain>,
    disconnected: Mutex<HashSet<Chain>>,
    heads: Mutex<HashMap<Chain, u64>>,
    auto_mine: AtomicBool,
    receipts: Mutex<HashMap<String, TxReceipt>>,
    logs: Mutex<Vec<(Chain, RawLog)>>,
    queued_receipt_logs: Mutex<VecDeque<Vec<RawLog>>>,
    call_responses: Mutex<HashMap<[u8; 4], Vec<u8>>>,
    balances: Mutex<HashMap<(Chain, Address), U256>>,
    revert_sends: Mutex<HashSet<usize>>,
    fail_reads_remaining: AtomicUsize,
    network_calls: AtomicUsize,
    send_count: AtomicUsize,
}

impl MockChainProvider {
    /// Provider serving the given chains, all connected, heads at 100
    pub fn new(chains: Vec<Chain>) -> Self {
        let heads = chains.iter().map(|c| (*c, 100u64)).collect();
        Self {
            chains,
            disconnected: Mutex::new(HashSet::new()),
            heads: Mutex::new(heads),
            auto_mine: AtomicBool::new(true),
            receipts: Mutex::new(HashMap::new()),
            logs: Mutex::new(Vec::new()),
            queued_receipt_logs: Mutex::new(VecDeque::new()),
            call_responses: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            revert_sends: Mutex::new(HashSet::new()),
            fail_reads_remaining: AtomicUsize::new(0),
            network_calls: AtomicUsize::new(0),
            send_count: AtomicUsize::new(0),
        }
    }

    /// Total network-touching calls made so far (for call-count assertions)
    pub fn network_calls(&self) -> usize {
        self.network_calls.load(Ordering::SeqCst)
    }

    /// Total transactions submitted
    pub fn sends(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    /// Mark a chain unreachable
    pub fn set_disconnected(&self, chain: Chain) {
        self.disconnected.lock().unwrap().insert(chain);
    }

    /// Stop advancing heads on block-number polls
    pub fn set_auto_mine(&self, on: bool) {
        self.auto_mine.store(on, Ordering::SeqCst);
    }

    /// Current head of a chain
    pub fn head(&self, chain: Chain) -> u64 {
        *self.heads.lock().unwrap().get(&chain).unwrap_or(&0)
    }

    /// Move a chain's head
    pub fn set_head(&self, chain: Chain, head: u64) {
        self.heads.lock().unwrap().insert(chain, head);
    }

    /// Logs attached to the receipt of the next submitted transaction
    pub fn queue_receipt_logs(&self, logs: Vec<RawLog>) {
        self.queued_receipt_logs.lock().unwrap().push_back(logs);
    }

    /// The n-th submitted transaction (1-based) will revert
    pub fn set_revert_send(&self, ordinal: usize) {
        self.revert_sends.lock().unwrap().insert(ordinal);
    }

    /// Insert a receipt directly, without going through a send
    pub fn insert_receipt(&self, receipt: TxReceipt) {
        self.receipts
            .lock()
            .unwrap()
            .insert(receipt.tx_hash.clone(), receipt);
    }

    /// Make a log visible to `get_logs` on a chain
    pub fn push_log(&self, chain: Chain, log: RawLog) {
        self.logs.lock().unwrap().push((chain, log));
    }

    /// Fixed response for calls whose selector matches
    pub fn set_call_response(&self, sel: [u8; 4], response: Vec<u8>) {
        self.call_responses.lock().unwrap().insert(sel, response);
    }

    /// Native balance override
    pub fn set_balance(&self, chain: Chain, address: Address, balance: U256) {
        self.balances.lock().unwrap().insert((chain, address), balance);
    }

    /// Fail the next `n` read operations with a network error
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads_remaining.store(n, Ordering::SeqCst);
    }

    fn touch(&self) {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn read_guard(&self, chain: Chain) -> Result<()> {
        loop {
            let current = self.fail_reads_remaining.load(Ordering::SeqCst);
            if current == 0 {
                return Ok(());
            }
            if self
                .fail_reads_remaining
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(BridgeError::network(chain, "injected read failure"));
            }
        }
    }
}

#[async_trait]
impl ChainProvider for MockChainProvider {
    fn supported_chains(&self) -> Vec<Chain> {
        self.chains.clone()
    }

    async fn is_connected(&self, chain: Chain) -> Result<bool> {
        self.touch();
        Ok(!self.disconnected.lock().unwrap().contains(&chain))
    }

    async fn get_block_number(&self, chain: Chain) -> Result<u64> {
        self.touch();
        self.read_guard(chain)?;
        let mut heads = self.heads.lock().unwrap();
        let head = heads.entry(chain).or_insert(100);
        let current = *head;
        if self.auto_mine.load(Ordering::SeqCst) {
            *head += 1;
        }
        Ok(current)
    }

    async fn get_transaction_receipt(&self, chain: Chain, tx_hash: &str) -> Result<Option<TxReceipt>> {
        self.touch();
        self.read_guard(chain)?;
        Ok(self.receipts.lock().unwrap().get(tx_hash).cloned())
    }

    async fn get_logs(&self, chain: Chain, filter: &LogFilter) -> Result<Vec<RawLog>> {
        self.touch();
        self.read_guard(chain)?;
        let to_block = filter.to_block.unwrap_or(u64::MAX);
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chain)
            .map(|(_, l)| l)
            .filter(|l| l.block_number >= filter.from_block && l.block_number <= to_block)
            .filter(|l| filter.addresses.is_empty() || filter.addresses.contains(&l.address))
            .filter(|l| {
                filter.topics0.is_empty()
                    || l.topics.first().map(|t| filter.topics0.contains(t)).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn call(&self, chain: Chain, _to: Address, data: Vec<u8>) -> Result<Vec<u8>> {
        self.touch();
        self.read_guard(chain)?;
        if data.len() >= 4 {
            let sel = [data[0], data[1], data[2], data[3]];
            if let Some(response) = self.call_responses.lock().unwrap().get(&sel) {
                return Ok(response.clone());
            }
        }
        // Default: one ABI word holding 1 gwei
        let mut word = [0u8; 32];
        U256::from(1_000_000_000u64).to_big_endian(&mut word);
        Ok(word.to_vec())
    }

    async fn resolve_signer(&self, _chain: Chain, address: Address) -> Result<Address> {
        self.touch();
        Ok(address)
    }

    async fn send_transaction(&self, chain: Chain, tx: TxRequest) -> Result<String> {
        self.touch();
        let ordinal = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        let tx_hash = format!("0xsend{:04}", ordinal);
        let block_number = {
            let mut heads = self.heads.lock().unwrap();
            let head = heads.entry(chain).or_insert(100);
            *head += 1;
            *head
        };
        let reverted = self.revert_sends.lock().unwrap().contains(&ordinal);
        let logs: Vec<RawLog> = if reverted {
            Vec::new()
        } else {
            self.queued_receipt_logs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default()
                .into_iter()
                .map(|mut l| {
                    l.tx_hash = tx_hash.clone();
                    l.block_number = block_number;
                    l
                })
                .collect()
        };
        for log in &logs {
            self.logs.lock().unwrap().push((chain, log.clone()));
        }
        let receipt = TxReceipt {
            tx_hash: tx_hash.clone(),
            block_number,
            status: if reverted {
                ReceiptStatus::Reverted
            } else {
                ReceiptStatus::Success
            },
            gas_used: U256::from(90_000u64),
            from: tx.from,
            logs,
        };
        self.receipts.lock().unwrap().insert(tx_hash.clone(), receipt);
        Ok(tx_hash)
    }

    async fn estimate_gas(&self, _chain: Chain, _tx: &TxRequest) -> Result<U256> {
        self.touch();
        Ok(U256::from(100_000u64))
    }

    async fn gas_price(&self, _chain: Chain) -> Result<U256> {
        self.touch();
        Ok(U256::from(1_000_000_000u64))
    }

    async fn get_balance(&self, chain: Chain, address: Address) -> Result<U256> {
        self.touch();
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(chain, address))
            .copied()
            .unwrap_or_else(|| U256::from(10u64).pow(U256::from(24u64))))
    }
}

/// In-memory fake token service
pub struct MockTokenService {
    allowances: Mutex<HashMap<(Chain, Address, Address, Address), U256>>,
    balances: Mutex<HashMap<(Chain, Address, Address), U256>>,
    approvals: AtomicUsize,
}

impl MockTokenService {
    /// Empty allowances, generous balances
    pub fn new() -> Self {
        Self {
            allowances: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            approvals: AtomicUsize::new(0),
        }
    }

    /// Approvals submitted so far
    pub fn approvals(&self) -> usize {
        self.approvals.load(Ordering::SeqCst)
    }

    /// Direct allowance read for assertions
    pub fn allowance_of(&self, chain: Chain, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .lock()
            .unwrap()
            .get(&(chain, token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    /// Token balance override
    pub fn set_balance(&self, chain: Chain, token: Address, owner: Address, balance: U256) {
        self.balances.lock().unwrap().insert((chain, token, owner), balance);
    }
}

impl Default for MockTokenService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenService for MockTokenService {
    async fn allowance(&self, chain: Chain, token: Address, owner: Address, spender: Address) -> Result<U256> {
        Ok(self.allowance_of(chain, token, owner, spender))
    }

    async fn approve(&self, chain: Chain, token: Address, owner: Address, spender: Address, amount: U256) -> Result<String> {
        let n = self.approvals.fetch_add(1, Ordering::SeqCst) + 1;
        self.allowances
            .lock()
            .unwrap()
            .insert((chain, token, owner, spender), amount);
        Ok(format!("0xapprove{:04}", n))
    }

    async fn symbol(&self, _chain: Chain, _token: Address) -> Result<String> {
        Ok("MOCK".to_string())
    }

    async fn balance_of(&self, chain: Chain, token: Address, owner: Address) -> Result<U256> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(chain, token, owner))
            .copied()
            .unwrap_or_else(|| U256::from(10u64).pow(U256::from(24u64))))
    }
}
