//! Bridge protocol adapters
//!
//! Every supported bridge protocol implements the one `BridgeProtocolAdapter`
//! contract, differing only in wire-level detail (fee oracle, dispatch call,
//! log shape, correlation key). Adding a protocol means implementing the
//! trait, not branching on string names anywhere else.

pub mod axelar;
pub mod hyperlane;
pub mod layerzero;
pub mod wormhole;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::error::{BridgeError, BridgeErrorCode, Result};
use crate::providers::{ChainProvider, ReceiptStatus, TokenService, TxReceipt, TxRequest};
use crate::types::chain::Chain;
use crate::types::fee::FeeEstimate;

/// Parameters for one fee quote or transfer execution
#[derive(Debug, Clone)]
pub struct BridgeParams {
    /// Source blockchain
    pub source_chain: Chain,
    /// Target blockchain
    pub target_chain: Chain,
    /// Token contract on the source chain
    pub token: Address,
    /// Amount in the token's smallest unit
    pub amount: U256,
    /// Receiver address on the target chain (0x-prefixed hex)
    pub recipient: String,
    /// Acting address on the source chain
    pub sender: Address,
    /// Optional GMP payload delivered alongside the transfer
    pub payload: Option<Vec<u8>>,
}

/// Result of a successful `execute_bridge`. The status never goes past
/// source confirmation here — delivery is only ever observed by the listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSubmission {
    /// Source-chain dispatch transaction hash
    pub source_tx_hash: String,
    /// Protocol-specific correlation key (message id / command id / sequence)
    pub correlation_key: String,
    /// Hash of the separate gas-payment transaction, where the protocol has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_payment_tx_hash: Option<String>,
    /// Gas used by the dispatch (decimal string)
    pub gas_used: String,
    /// Always pending delivery at this point
    pub pending_delivery: bool,
}

/// Read-only status report for a source-chain transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdapterTxStatus {
    /// No receipt yet
    Pending,
    /// Mined and successful
    Confirmed {
        /// Blocks built on top of the inclusion block
        confirmations: u64,
        /// Correlation key parsed from the receipt, when a matching log exists
        correlation_key: Option<String>,
    },
    /// Mined but reverted
    Failed,
}

/// Static per-protocol capability metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    /// Protocol name
    pub protocol: String,
    /// Chains the adapter is configured for
    pub chains: Vec<Chain>,
    /// Whether a separate destination-gas deposit transaction is required
    pub requires_gas_deposit: bool,
    /// Confirmation depth per chain
    pub confirmations: HashMap<Chain, u64>,
    /// Average end-to-end delivery time in seconds
    pub avg_time_secs: u64,
    /// Worst-case delivery time in seconds
    pub max_time_secs: u64,
}

/// Uniform adapter contract over heterogeneous bridge protocols
#[async_trait]
pub trait BridgeProtocolAdapter: Send + Sync + 'static {
    /// Registry key for this adapter
    fn name(&self) -> &str;

    /// Establish per-chain connections. Fails fast if any mandatory chain is
    /// unreachable. Idempotent: a second call after success is a no-op.
    async fn initialize(&self) -> Result<()>;

    /// Quote the fee for a transfer. Validates before any I/O and never
    /// mutates state.
    async fn estimate_fee(&self, params: &BridgeParams) -> Result<FeeEstimate>;

    /// Execute a transfer end-to-end up to source confirmation. Any failure
    /// after submission still carries the transaction hash.
    async fn execute_bridge(&self, params: &BridgeParams) -> Result<BridgeSubmission>;

    /// Read-only receipt/confirmation lookup
    async fn get_transaction_status(&self, tx_hash: &str, chain: Chain) -> Result<AdapterTxStatus>;

    /// Static capability metadata
    fn capabilities(&self) -> AdapterCapabilities;

    /// Release per-chain connections; other methods fail with
    /// `NOT_INITIALIZED` afterwards.
    async fn shutdown(&self) -> Result<()>;
}

/// Four-byte function selector from a Solidity signature
pub(crate) fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Event topic0 from a Solidity event signature
pub(crate) fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

/// Calldata from selector + ABI-encoded arguments
pub(crate) fn encode_call(sig: &str, args: &[ethers::abi::Token]) -> Vec<u8> {
    let mut data = selector(sig).to_vec();
    data.extend(ethers::abi::encode(args));
    data
}

/// Deterministic fallback correlation key used when no matching log is found
/// in the dispatch receipt. Best effort: prefixed so consumers never mistake
/// it for a protocol-assigned identifier.
pub fn fallback_correlation_key(tx_hash: &str, block_number: u64, sender: Address) -> String {
    let mut preimage = Vec::with_capacity(tx_hash.len() + 8 + 20);
    preimage.extend_from_slice(tx_hash.as_bytes());
    preimage.extend_from_slice(&block_number.to_be_bytes());
    preimage.extend_from_slice(sender.as_bytes());
    format!("fallback:0x{}", hex::encode(keccak256(&preimage)))
}

/// Validate quote/execute parameters. Runs before any I/O; a failure here
/// means no network call was attempted and no state was touched.
pub fn validate_params(protocol: &str, supported: &[Chain], params: &BridgeParams) -> Result<()> {
    if params.source_chain == params.target_chain {
        return Err(BridgeError::Validation(format!(
            "{}: source and target chain are both {}",
            protocol, params.source_chain
        )));
    }
    if !supported.contains(&params.source_chain) {
        return Err(BridgeError::Validation(format!(
            "{}: unsupported source chain {}",
            protocol, params.source_chain
        )));
    }
    if !supported.contains(&params.target_chain) {
        return Err(BridgeError::Validation(format!(
            "{}: unsupported target chain {}",
            protocol, params.target_chain
        )));
    }
    if params.amount.is_zero() {
        return Err(BridgeError::Validation(format!(
            "{}: amount must be greater than zero",
            protocol
        )));
    }
    let recipient = params.recipient.trim_start_matches("0x");
    if recipient.len() != 40 || !recipient.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BridgeError::Validation(format!(
            "{}: malformed recipient address {}",
            protocol, params.recipient
        )));
    }
    Ok(())
}

/// Parse a validated recipient into an `Address`
pub(crate) fn recipient_address(params: &BridgeParams) -> Address {
    let raw = params.recipient.trim_start_matches("0x");
    let bytes = hex::decode(raw).unwrap_or_else(|_| vec![0u8; 20]);
    Address::from_slice(&bytes)
}

/// Shared adapter state and plumbing: provider handles, allowance management,
/// submission with confirmation waiting, initialization lifecycle.
pub struct AdapterContext {
    /// Protocol name, used in errors and logs
    pub protocol: String,
    /// Injected chain access
    pub provider: Arc<dyn ChainProvider>,
    /// Injected token operations
    pub tokens: Arc<dyn TokenService>,
    /// Adapter-wide knobs
    pub settings: AdapterConfig,
    /// Chains this adapter is configured for
    pub chains: Vec<Chain>,
    /// Confirmation depth per chain
    pub confirmations: HashMap<Chain, u64>,
    initialized: RwLock<bool>,
}

impl AdapterContext {
    /// Build a context; confirmation depths default per chain
    pub fn new(
        protocol: impl Into<String>,
        provider: Arc<dyn ChainProvider>,
        tokens: Arc<dyn TokenService>,
        settings: AdapterConfig,
        chains: Vec<Chain>,
    ) -> Self {
        let confirmations = chains
            .iter()
            .map(|c| (*c, c.default_confirmations()))
            .collect();
        Self {
            protocol: protocol.into(),
            provider,
            tokens,
            settings,
            chains,
            confirmations,
            initialized: RwLock::new(false),
        }
    }

    /// Probe every configured chain and mark the adapter ready. Fails fast
    /// with `INIT_FAILED` on the first unreachable chain. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        {
            let ready = self.initialized.read().await;
            if *ready {
                debug!("{}: already initialized", self.protocol);
                return Ok(());
            }
        }
        for chain in &self.chains {
            let connected = self.provider.is_connected(*chain).await.map_err(|e| {
                BridgeError::bridge(
                    BridgeErrorCode::InitFailed,
                    &self.protocol,
                    format!("provider probe for {} failed: {}", chain, e),
                )
            })?;
            if !connected {
                return Err(BridgeError::bridge(
                    BridgeErrorCode::InitFailed,
                    &self.protocol,
                    format!("chain {} is unreachable", chain),
                ));
            }
        }
        *self.initialized.write().await = true;
        info!("{}: initialized for {} chains", self.protocol, self.chains.len());
        Ok(())
    }

    /// Mark the adapter shut down
    pub async fn shutdown(&self) {
        *self.initialized.write().await = false;
        info!("{}: shut down", self.protocol);
    }

    /// Guard for every post-initialization method
    pub async fn ensure_initialized(&self) -> Result<()> {
        if *self.initialized.read().await {
            Ok(())
        } else {
            Err(BridgeError::bridge(
                BridgeErrorCode::NotInitialized,
                &self.protocol,
                "adapter is not initialized",
            ))
        }
    }

    /// Configured confirmation depth for a chain
    pub fn confirmation_depth(&self, chain: Chain) -> u64 {
        self.confirmations
            .get(&chain)
            .copied()
            .unwrap_or_else(|| chain.default_confirmations())
    }

    /// Ensure the spender's allowance covers `amount`, raising it with the
    /// configured safety buffer if not. Returns the approval transaction hash
    /// when an approval was submitted.
    pub async fn ensure_allowance(
        &self,
        chain: Chain,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Option<String>> {
        let current = self
            .tokens
            .allowance(chain, token, owner, spender)
            .await
            .map_err(|e| {
                BridgeError::bridge(
                    BridgeErrorCode::ApprovalFailed,
                    &self.protocol,
                    format!("allowance lookup failed: {}", e),
                )
            })?;
        if current >= amount {
            debug!(
                "{}: allowance {} already covers {}",
                self.protocol, current, amount
            );
            return Ok(None);
        }
        let buffered =
            amount * U256::from(100 + self.settings.approval_buffer_percent) / U256::from(100u64);
        info!(
            "{}: raising allowance on {} from {} to {}",
            self.protocol, chain, current, buffered
        );
        let tx_hash = self
            .tokens
            .approve(chain, token, owner, spender, buffered)
            .await
            .map_err(|e| {
                BridgeError::bridge(
                    BridgeErrorCode::ApprovalFailed,
                    &self.protocol,
                    format!("approve failed: {}", e),
                )
            })?;
        Ok(Some(tx_hash))
    }

    /// Check the sender can cover a native value before submitting
    pub async fn ensure_native_balance(
        &self,
        chain: Chain,
        sender: Address,
        required: U256,
    ) -> Result<()> {
        let available = self.provider.get_balance(chain, sender).await?;
        if available < required {
            return Err(BridgeError::InsufficientFunds {
                chain,
                required: required.to_string(),
                available: available.to_string(),
            });
        }
        Ok(())
    }

    /// Submit a transaction and wait until it is mined with the configured
    /// confirmation depth. Receipt polling is read-only and retried with
    /// capped-exponential backoff; the submission itself is never retried.
    /// Every failure after submission carries the transaction hash.
    pub async fn submit_and_confirm(&self, chain: Chain, tx: TxRequest) -> Result<TxReceipt> {
        let tx_hash = self.provider.send_transaction(chain, tx).await?;
        debug!("{}: submitted {} on {}", self.protocol, tx_hash, chain);
        self.wait_mined(chain, &tx_hash, self.confirmation_depth(chain))
            .await
    }

    /// Poll for a receipt until the requested depth is reached
    pub async fn wait_mined(&self, chain: Chain, tx_hash: &str, depth: u64) -> Result<TxReceipt> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.settings.source_confirmation_timeout_secs);
        let mut read_failures: u32 = 0;
        let mut backoff = Duration::from_millis(500);
        let poll_interval = Duration::from_millis((chain.block_time_ms() / 2).max(250));

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(BridgeError::bridge_with_tx(
                    BridgeErrorCode::StatusCheckFailed,
                    &self.protocol,
                    format!(
                        "no confirmation after {}s",
                        self.settings.source_confirmation_timeout_secs
                    ),
                    tx_hash,
                ));
            }
            match self.receipt_with_depth(chain, tx_hash).await {
                Ok(Some((receipt, confirmations))) => {
                    if receipt.status == ReceiptStatus::Reverted {
                        return Err(BridgeError::bridge_with_tx(
                            BridgeErrorCode::TxFailed,
                            &self.protocol,
                            format!("transaction reverted on {}", chain),
                            tx_hash,
                        ));
                    }
                    if confirmations >= depth {
                        debug!(
                            "{}: {} reached {} confirmations on {}",
                            self.protocol, tx_hash, confirmations, chain
                        );
                        return Ok(receipt);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    read_failures += 1;
                    if read_failures > self.settings.max_read_retries {
                        return Err(BridgeError::bridge_with_tx(
                            BridgeErrorCode::StatusCheckFailed,
                            &self.protocol,
                            format!("receipt polling failed after {} retries: {}", read_failures, e),
                            tx_hash,
                        ));
                    }
                    warn!(
                        "{}: receipt poll {}/{} for {} failed: {}, backing off {:?}",
                        self.protocol, read_failures, self.settings.max_read_retries, tx_hash, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                    continue;
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// One receipt + confirmation-depth observation
    async fn receipt_with_depth(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<Option<(TxReceipt, u64)>> {
        let receipt = match self.provider.get_transaction_receipt(chain, tx_hash).await? {
            Some(r) => r,
            None => return Ok(None),
        };
        let head = self.provider.get_block_number(chain).await?;
        let confirmations = head.saturating_sub(receipt.block_number) + 1;
        Ok(Some((receipt, confirmations)))
    }

    /// Shared read-only status lookup used by every adapter's
    /// `get_transaction_status`.
    pub async fn transaction_status(
        &self,
        chain: Chain,
        tx_hash: &str,
        parse_key: impl Fn(&TxReceipt) -> Option<String>,
    ) -> Result<AdapterTxStatus> {
        self.ensure_initialized().await?;
        let observed = self.receipt_with_depth(chain, tx_hash).await.map_err(|e| {
            BridgeError::bridge(
                BridgeErrorCode::StatusCheckFailed,
                &self.protocol,
                format!("status lookup for {} failed: {}", tx_hash, e),
            )
        })?;
        match observed {
            None => Ok(AdapterTxStatus::Pending),
            Some((receipt, confirmations)) => {
                if receipt.status == ReceiptStatus::Reverted {
                    return Ok(AdapterTxStatus::Failed);
                }
                Ok(AdapterTxStatus::Confirmed {
                    confirmations,
                    correlation_key: parse_key(&receipt),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockChainProvider, MockTokenService};

    fn params() -> BridgeParams {
        BridgeParams {
            source_chain: Chain::Ethereum,
            target_chain: Chain::Polygon,
            token: Address::from_low_u64_be(0xAAAA),
            amount: U256::from(1_000_000u64),
            recipient: "0x00000000000000000000000000000000000000bb".to_string(),
            sender: Address::from_low_u64_be(0xCCCC),
            payload: None,
        }
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let supported = vec![Chain::Ethereum, Chain::Polygon];

        let mut p = params();
        p.target_chain = Chain::Ethereum;
        assert!(matches!(
            validate_params("test", &supported, &p).unwrap_err(),
            BridgeError::Validation(_)
        ));

        let mut p = params();
        p.target_chain = Chain::BSC;
        assert!(validate_params("test", &supported, &p).is_err());

        let mut p = params();
        p.amount = U256::zero();
        assert!(validate_params("test", &supported, &p).is_err());

        let mut p = params();
        p.recipient = "not-an-address".into();
        assert!(validate_params("test", &supported, &p).is_err());

        assert!(validate_params("test", &supported, &params()).is_ok());
    }

    #[test]
    fn test_fallback_key_deterministic() {
        let sender = Address::from_low_u64_be(7);
        let a = fallback_correlation_key("0xabc", 100, sender);
        let b = fallback_correlation_key("0xabc", 100, sender);
        assert_eq!(a, b);
        assert!(a.starts_with("fallback:0x"));
        assert_ne!(a, fallback_correlation_key("0xabc", 101, sender));
    }

    #[test]
    fn test_selector_shape() {
        // keccak("transfer(address,uint256)")[..4] == a9059cbb
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[tokio::test]
    async fn test_initialize_idempotent_and_guard() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
        let tokens = Arc::new(MockTokenService::new());
        let ctx = AdapterContext::new(
            "test",
            provider.clone(),
            tokens,
            AdapterConfig::default(),
            vec![Chain::Ethereum, Chain::Polygon],
        );

        assert!(matches!(
            ctx.ensure_initialized().await.unwrap_err(),
            BridgeError::Bridge { code: BridgeErrorCode::NotInitialized, .. }
        ));

        ctx.initialize().await.unwrap();
        let probes_after_first = provider.network_calls();
        ctx.initialize().await.unwrap();
        // Second initialize is a no-op, no further probes
        assert_eq!(provider.network_calls(), probes_after_first);

        ctx.shutdown().await;
        assert!(ctx.ensure_initialized().await.is_err());
    }

    #[tokio::test]
    async fn test_initialize_fails_fast_on_unreachable_chain() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum]));
        provider.set_disconnected(Chain::Polygon);
        let ctx = AdapterContext::new(
            "test",
            provider,
            Arc::new(MockTokenService::new()),
            AdapterConfig::default(),
            vec![Chain::Ethereum, Chain::Polygon],
        );
        let err = ctx.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Bridge { code: BridgeErrorCode::InitFailed, .. }
        ));
    }

    #[tokio::test]
    async fn test_ensure_allowance_applies_buffer() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum]));
        let tokens = Arc::new(MockTokenService::new());
        let ctx = AdapterContext::new(
            "test",
            provider,
            tokens.clone(),
            AdapterConfig::default(),
            vec![Chain::Ethereum],
        );

        let token = Address::from_low_u64_be(1);
        let owner = Address::from_low_u64_be(2);
        let spender = Address::from_low_u64_be(3);

        let approved = ctx
            .ensure_allowance(Chain::Ethereum, token, owner, spender, U256::from(1000u64))
            .await
            .unwrap();
        assert!(approved.is_some());
        // 20% buffer on top of 1000
        assert_eq!(
            tokens.allowance_of(Chain::Ethereum, token, owner, spender),
            U256::from(1200u64)
        );

        // Second call: allowance already sufficient, no approval submitted
        let approved = ctx
            .ensure_allowance(Chain::Ethereum, token, owner, spender, U256::from(1000u64))
            .await
            .unwrap();
        assert!(approved.is_none());
    }
}
