//! Wormhole-style adapter
//!
//! Talks to a core bridge contract per chain: the fee is a flat
//! `messageFee()` read, dispatch goes through `transferTokens`, and the
//! correlation key is the `emitter_chain/emitter/sequence` triple from the
//! `LogMessagePublished` event. Redemption on the destination chain surfaces
//! as `TransferRedeemed` with the same triple in its indexed topics.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, H256, U256};
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use super::{
    encode_call, event_topic, fallback_correlation_key, recipient_address, validate_params,
    AdapterCapabilities, AdapterContext, AdapterTxStatus, BridgeParams, BridgeProtocolAdapter,
    BridgeSubmission,
};
use crate::config::AdapterConfig;
use crate::error::{BridgeError, BridgeErrorCode, Result};
use crate::providers::{ChainProvider, RawLog, TokenService, TxReceipt, TxRequest};
use crate::types::chain::Chain;
use crate::types::fee::{FeeConfidence, FeeEstimate};

/// `LogMessagePublished(address indexed sender, uint64 sequence, uint32 nonce, bytes payload, uint8 consistencyLevel)`
pub(crate) static LOG_MESSAGE_PUBLISHED_TOPIC: Lazy<H256> =
    Lazy::new(|| event_topic("LogMessagePublished(address,uint64,uint32,bytes,uint8)"));

/// `TransferRedeemed(uint16 indexed emitterChainId, bytes32 indexed emitterAddress, uint64 indexed sequence)`
pub(crate) static TRANSFER_REDEEMED_TOPIC: Lazy<H256> =
    Lazy::new(|| event_topic("TransferRedeemed(uint16,bytes32,uint64)"));

const MESSAGE_FEE_SIG: &str = "messageFee()";
const TRANSFER_TOKENS_SIG: &str = "transferTokens(address,uint256,uint16,bytes32,uint256,uint32)";

fn emitter_hex(address: Address) -> String {
    let mut padded = [0u8; 32];
    padded[12..].copy_from_slice(address.as_bytes());
    format!("0x{}", hex::encode(padded))
}

/// Correlation key from a source-chain `LogMessagePublished` log
pub(crate) fn parse_published_key(chain: Chain, log: &RawLog) -> Option<String> {
    if log.topics.first() != Some(&*LOG_MESSAGE_PUBLISHED_TOPIC) {
        return None;
    }
    let decoded = ethers::abi::decode(
        &[
            ParamType::Uint(64),
            ParamType::Uint(32),
            ParamType::Bytes,
            ParamType::Uint(8),
        ],
        &log.data,
    )
    .ok()?;
    let sequence = decoded.first()?.clone().into_uint()?;
    Some(format!(
        "{}/{}/{}",
        chain.to_wormhole_id(),
        emitter_hex(log.address),
        sequence
    ))
}

/// Correlation key from a destination-chain `TransferRedeemed` log
pub(crate) fn parse_redeemed_key(log: &RawLog) -> Option<String> {
    if log.topics.first() != Some(&*TRANSFER_REDEEMED_TOPIC) || log.topics.len() < 4 {
        return None;
    }
    let emitter_chain = U256::from_big_endian(log.topics[1].as_bytes());
    let sequence = U256::from_big_endian(log.topics[3].as_bytes());
    Some(format!(
        "{}/0x{}/{}",
        emitter_chain,
        hex::encode(log.topics[2].as_bytes()),
        sequence
    ))
}

/// Wormhole-style protocol adapter
pub struct WormholeAdapter {
    ctx: AdapterContext,
    /// Core bridge contract per chain
    cores: HashMap<Chain, Address>,
}

impl WormholeAdapter {
    /// Adapter over the given core bridge deployment
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        tokens: Arc<dyn TokenService>,
        settings: AdapterConfig,
        cores: HashMap<Chain, Address>,
    ) -> Self {
        let chains: Vec<Chain> = cores.keys().copied().collect();
        Self {
            ctx: AdapterContext::new("wormhole", provider, tokens, settings, chains),
            cores,
        }
    }

    fn core(&self, chain: Chain) -> Result<Address> {
        self.cores.get(&chain).copied().ok_or_else(|| {
            BridgeError::Validation(format!("wormhole: no core bridge configured for {}", chain))
        })
    }

    /// Flat per-message fee from the core contract
    async fn message_fee(&self, chain: Chain) -> Result<U256> {
        let core = self.core(chain)?;
        let ret = self
            .ctx
            .provider
            .call(chain, core, encode_call(MESSAGE_FEE_SIG, &[]))
            .await?;
        if ret.len() < 32 {
            return Err(BridgeError::bridge(
                BridgeErrorCode::FeeEstimationFailed,
                "wormhole",
                format!("messageFee returned {} bytes", ret.len()),
            ));
        }
        Ok(U256::from_big_endian(&ret[..32]))
    }

    fn dispatch_request(&self, params: &BridgeParams, core: Address, value: U256) -> TxRequest {
        let mut recipient32 = [0u8; 32];
        recipient32[12..].copy_from_slice(recipient_address(params).as_bytes());
        let nonce = (chrono::Utc::now().timestamp_millis() as u64 & u64::from(u32::MAX)) as u32;
        let calldata = encode_call(
            TRANSFER_TOKENS_SIG,
            &[
                Token::Address(params.token),
                Token::Uint(params.amount),
                Token::Uint(U256::from(params.target_chain.to_wormhole_id())),
                Token::FixedBytes(recipient32.to_vec()),
                Token::Uint(U256::zero()),
                Token::Uint(U256::from(nonce)),
            ],
        );
        TxRequest {
            from: params.sender,
            to: core,
            value,
            data: calldata,
            gas_limit: None,
        }
    }
}

#[async_trait]
impl BridgeProtocolAdapter for WormholeAdapter {
    fn name(&self) -> &str {
        "wormhole"
    }

    async fn initialize(&self) -> Result<()> {
        self.ctx.initialize().await
    }

    async fn estimate_fee(&self, params: &BridgeParams) -> Result<FeeEstimate> {
        validate_params("wormhole", &self.ctx.chains, params)?;
        self.ctx.ensure_initialized().await?;

        let flat_fee = self.message_fee(params.source_chain).await?;
        let core = self.core(params.source_chain)?;
        let request = self.dispatch_request(params, core, flat_fee);
        let gas_limit = self
            .ctx
            .provider
            .estimate_gas(params.source_chain, &request)
            .await?;
        let gas_price = self.ctx.provider.gas_price(params.source_chain).await?;

        // Guardian relaying is free of a separate relayer leg here
        Ok(FeeEstimate::from_components(
            gas_limit * gas_price,
            flat_fee,
            U256::zero(),
            self.ctx.settings.fee_premium_percent,
            gas_limit,
            self.capabilities().avg_time_secs,
            FeeConfidence::Medium,
        ))
    }

    async fn execute_bridge(&self, params: &BridgeParams) -> Result<BridgeSubmission> {
        validate_params("wormhole", &self.ctx.chains, params)?;
        self.ctx.ensure_initialized().await?;

        let signer = self
            .ctx
            .provider
            .resolve_signer(params.source_chain, params.sender)
            .await?;
        let core = self.core(params.source_chain)?;

        let flat_fee = self.message_fee(params.source_chain).await?;
        self.ctx
            .ensure_native_balance(params.source_chain, signer, flat_fee)
            .await?;
        self.ctx
            .ensure_allowance(
                params.source_chain,
                params.token,
                signer,
                core,
                params.amount,
            )
            .await?;

        let request = self.dispatch_request(params, core, flat_fee);
        let receipt = self
            .ctx
            .submit_and_confirm(params.source_chain, request)
            .await?;

        let source = params.source_chain;
        let correlation_key = match receipt.logs.iter().find_map(|l| parse_published_key(source, l))
        {
            Some(key) => key,
            None => {
                warn!(
                    "wormhole: no LogMessagePublished log in {}, using fallback key",
                    receipt.tx_hash
                );
                fallback_correlation_key(&receipt.tx_hash, receipt.block_number, signer)
            }
        };
        debug!(
            "wormhole: published {} with key {}",
            receipt.tx_hash, correlation_key
        );

        Ok(BridgeSubmission {
            source_tx_hash: receipt.tx_hash.clone(),
            correlation_key,
            gas_payment_tx_hash: None,
            gas_used: receipt.gas_used.to_string(),
            pending_delivery: true,
        })
    }

    async fn get_transaction_status(&self, tx_hash: &str, chain: Chain) -> Result<AdapterTxStatus> {
        let parse = move |receipt: &TxReceipt| {
            receipt
                .logs
                .iter()
                .find_map(|l| parse_published_key(chain, l))
        };
        self.ctx.transaction_status(chain, tx_hash, parse).await
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            protocol: "wormhole".into(),
            chains: self.ctx.chains.clone(),
            requires_gas_deposit: false,
            confirmations: self.ctx.confirmations.clone(),
            avg_time_secs: 900,
            max_time_secs: 7200,
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.ctx.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockChainProvider, MockTokenService};

    fn cores() -> HashMap<Chain, Address> {
        [
            (Chain::Ethereum, Address::from_low_u64_be(0xC1)),
            (Chain::BSC, Address::from_low_u64_be(0xC2)),
        ]
        .into_iter()
        .collect()
    }

    fn params() -> BridgeParams {
        BridgeParams {
            source_chain: Chain::Ethereum,
            target_chain: Chain::BSC,
            token: Address::from_low_u64_be(0xAAAA),
            amount: U256::from(5_000_000u64),
            recipient: "0x00000000000000000000000000000000000000bb".into(),
            sender: Address::from_low_u64_be(0xCCCC),
            payload: None,
        }
    }

    pub(crate) fn published_log(core: Address, sender: Address, sequence: u64) -> RawLog {
        let mut sender_topic = [0u8; 32];
        sender_topic[12..].copy_from_slice(sender.as_bytes());
        RawLog {
            address: core,
            topics: vec![*LOG_MESSAGE_PUBLISHED_TOPIC, H256::from(sender_topic)],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(sequence)),
                Token::Uint(U256::from(7u64)),
                Token::Bytes(vec![0xAB; 8]),
                Token::Uint(U256::from(1u64)),
            ]),
            tx_hash: String::new(),
            block_number: 0,
            log_index: 0,
        }
    }

    async fn adapter(provider: Arc<MockChainProvider>) -> WormholeAdapter {
        let adapter = WormholeAdapter::new(
            provider,
            Arc::new(MockTokenService::new()),
            AdapterConfig::default(),
            cores(),
        );
        adapter.initialize().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_flat_fee_quote() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::BSC]));
        let mut ret = vec![0u8; 32];
        U256::from(12_345u64).to_big_endian(&mut ret);
        provider.set_call_response(super::super::selector(MESSAGE_FEE_SIG), ret);

        let adapter = adapter(provider).await;
        let est = adapter.estimate_fee(&params()).await.unwrap();
        assert_eq!(est.protocol_fee, U256::from(12_345u64));
        assert_eq!(est.relayer_fee, U256::zero());
        assert_eq!(est.confidence, FeeConfidence::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_builds_triple_key() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::BSC]));
        let core = Address::from_low_u64_be(0xC1);
        provider.queue_receipt_logs(vec![published_log(core, Address::from_low_u64_be(0xCCCC), 42)]);
        let adapter = adapter(provider).await;

        let submission = adapter.execute_bridge(&params()).await.unwrap();
        let expected = format!(
            "{}/{}/42",
            Chain::Ethereum.to_wormhole_id(),
            emitter_hex(core)
        );
        assert_eq!(submission.correlation_key, expected);
    }

    #[test]
    fn test_redeemed_key_matches_published_key() {
        let core = Address::from_low_u64_be(0xC1);
        let mut published = published_log(core, Address::from_low_u64_be(1), 42);
        published.block_number = 10;
        let source_key = parse_published_key(Chain::Ethereum, &published).unwrap();

        let mut emitter = [0u8; 32];
        emitter[12..].copy_from_slice(core.as_bytes());
        let mut chain_word = [0u8; 32];
        U256::from(Chain::Ethereum.to_wormhole_id()).to_big_endian(&mut chain_word);
        let mut seq_word = [0u8; 32];
        U256::from(42u64).to_big_endian(&mut seq_word);
        let redeemed = RawLog {
            address: Address::from_low_u64_be(0xC2),
            topics: vec![
                *TRANSFER_REDEEMED_TOPIC,
                H256::from(chain_word),
                H256::from(emitter),
                H256::from(seq_word),
            ],
            data: Vec::new(),
            tx_hash: "0xdest".into(),
            block_number: 50,
            log_index: 0,
        };
        assert_eq!(parse_redeemed_key(&redeemed).unwrap(), source_key);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_dispatch_carries_tx_hash() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::BSC]));
        provider.set_revert_send(1);
        let adapter = adapter(provider).await;

        let err = adapter.execute_bridge(&params()).await.unwrap_err();
        match err {
            BridgeError::Bridge { code, tx_hash, .. } => {
                assert_eq!(code, BridgeErrorCode::TxFailed);
                assert!(tx_hash.is_some());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
