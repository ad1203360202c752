//! External collaborator seams
//!
//! The bridge core never opens RPC connections itself. All chain access goes
//! through the `ChainProvider` trait and all ERC20 interaction through
//! `TokenService`, both injected at construction time so tests can run
//! against fake chains.

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::chain::Chain;

/// Transaction request handed to the provider for signing and submission
#[derive(Debug, Clone)]
pub struct TxRequest {
    /// Acting address; the provider resolves the signer for it
    pub from: Address,
    /// Call target
    pub to: Address,
    /// Native value attached, in wei
    pub value: U256,
    /// ABI-encoded calldata
    pub data: Vec<u8>,
    /// Gas limit; `None` lets the provider estimate
    pub gas_limit: Option<U256>,
}

/// Raw log as returned by the chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics, topic0 first
    pub topics: Vec<H256>,
    /// Unindexed data
    pub data: Vec<u8>,
    /// Transaction hash containing the log
    pub tx_hash: String,
    /// Block number
    pub block_number: u64,
    /// Log index within the block
    pub log_index: u64,
}

/// Receipt status as reported by the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// Executed successfully
    Success,
    /// Reverted
    Reverted,
}

/// Minimal transaction receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: String,
    /// Block the transaction was included in
    pub block_number: u64,
    /// Execution status
    pub status: ReceiptStatus,
    /// Gas used
    pub gas_used: U256,
    /// Sender of the transaction
    pub from: Address,
    /// Logs emitted
    pub logs: Vec<RawLog>,
}

/// Log query filter
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Contract addresses to match; empty matches all
    pub addresses: Vec<Address>,
    /// topic0 values to match; empty matches all
    pub topics0: Vec<H256>,
    /// Inclusive start block
    pub from_block: u64,
    /// Inclusive end block; `None` means latest
    pub to_block: Option<u64>,
}

/// Per-chain RPC access, consumed as an opaque service. Connection pooling,
/// circuit breaking and rate limiting live behind this seam.
#[async_trait]
pub trait ChainProvider: Send + Sync + 'static {
    /// Chains this provider can serve
    fn supported_chains(&self) -> Vec<Chain>;

    /// Probe connectivity for one chain
    async fn is_connected(&self, chain: Chain) -> Result<bool>;

    /// Latest block number
    async fn get_block_number(&self, chain: Chain) -> Result<u64>;

    /// Receipt lookup; `None` while the transaction is unmined
    async fn get_transaction_receipt(&self, chain: Chain, tx_hash: &str) -> Result<Option<TxReceipt>>;

    /// Log query
    async fn get_logs(&self, chain: Chain, filter: &LogFilter) -> Result<Vec<RawLog>>;

    /// Read-only contract call
    async fn call(&self, chain: Chain, to: Address, data: Vec<u8>) -> Result<Vec<u8>>;

    /// Resolve a signer for the acting address. Fails if the wallet does not
    /// hold keys for it.
    async fn resolve_signer(&self, chain: Chain, address: Address) -> Result<Address>;

    /// Sign and submit; returns the transaction hash. Never retried by the
    /// core — a failed submission is surfaced to the caller.
    async fn send_transaction(&self, chain: Chain, tx: TxRequest) -> Result<String>;

    /// Gas limit estimate for a call
    async fn estimate_gas(&self, chain: Chain, tx: &TxRequest) -> Result<U256>;

    /// Current optimal gas price in wei
    async fn gas_price(&self, chain: Chain) -> Result<U256>;

    /// Native balance of an address
    async fn get_balance(&self, chain: Chain, address: Address) -> Result<U256>;
}

/// ERC20-style token operations, consumed from the wallet's token subsystem
#[async_trait]
pub trait TokenService: Send + Sync + 'static {
    /// Current allowance of `spender` over `owner`'s tokens
    async fn allowance(&self, chain: Chain, token: Address, owner: Address, spender: Address) -> Result<U256>;

    /// Submit an approval; returns the approval transaction hash
    async fn approve(&self, chain: Chain, token: Address, owner: Address, spender: Address, amount: U256) -> Result<String>;

    /// Token symbol lookup
    async fn symbol(&self, chain: Chain, token: Address) -> Result<String>;

    /// Token balance of an address
    async fn balance_of(&self, chain: Chain, token: Address, owner: Address) -> Result<U256>;
}
