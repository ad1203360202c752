//! LayerZero-style adapter
//!
//! Drives an endpoint contract per chain: fees come from the endpoint's
//! `quote` oracle, dispatch goes through `send`, and the packet GUID emitted
//! in `PacketSent` is the correlation key. Delivery on the destination chain
//! surfaces as `PacketDelivered` (or `LzReceiveAlert` on failure), consumed
//! by the listener, never by this adapter.

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

/// `PacketSent(bytes32 guid, uint32 dstEid, address sender)`
pub(crate) static PACKET_SENT_TOPIC: Lazy<H256> =
    Lazy::new(|| event_topic("PacketSent(bytes32,uint32,address)"));

/// `PacketDelivered(bytes32 guid, address receiver)`
pub(crate) static PACKET_DELIVERED_TOPIC: Lazy<H256> =
    Lazy::new(|| event_topic("PacketDelivered(bytes32,address)"));

/// `LzReceiveAlert(bytes32 guid, address receiver, bytes reason)`
pub(crate) static LZ_RECEIVE_ALERT_TOPIC: Lazy<H256> =
    Lazy::new(|| event_topic("LzReceiveAlert(bytes32,address,bytes)"));

const QUOTE_SIG: &str = "quote(uint32,bytes,bytes,bool)";
const SEND_SIG: &str = "send(uint32,bytes32,uint256,bytes,bytes)";

/// Extract the packet GUID from a `PacketSent` log
pub(crate) fn parse_packet_guid(log: &RawLog) -> Option<String> {
    if log.topics.first() != Some(&*PACKET_SENT_TOPIC) || log.data.len() < 32 {
        return None;
    }
    Some(format!("0x{}", hex::encode(&log.data[..32])))
}

/// GUID carried in delivered/failed packets (first data word)
pub(crate) fn parse_delivery_guid(log: &RawLog) -> Option<String> {
    if log.data.len() < 32 {
        return None;
    }
    Some(format!("0x{}", hex::encode(&log.data[..32])))
}

fn parse_receipt_guid(receipt: &TxReceipt) -> Option<String> {
    receipt.logs.iter().find_map(parse_packet_guid)
}

/// LayerZero-style protocol adapter
pub struct LayerZeroAdapter {
    ctx: AdapterContext,
    /// Endpoint contract per chain
    endpoints: HashMap<Chain, Address>,
}

impl LayerZeroAdapter {
    /// Adapter over the given endpoint deployment
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        tokens: Arc<dyn TokenService>,
        settings: AdapterConfig,
        endpoints: HashMap<Chain, Address>,
    ) -> Self {
        let chains: Vec<Chain> = endpoints.keys().copied().collect();
        Self {
            ctx: AdapterContext::new("layerzero", provider, tokens, settings, chains),
            endpoints,
        }
    }

    fn endpoint(&self, chain: Chain) -> Result<Address> {
        self.endpoints.get(&chain).copied().ok_or_else(|| {
            BridgeError::Validation(format!("layerzero: no endpoint configured for {}", chain))
        })
    }

    /// Transfer message: (recipient, amount, token) plus any GMP payload
    fn build_message(params: &BridgeParams) -> Vec<u8> {
        let mut message = ethers::abi::encode(&[
            Token::Address(recipient_address(params)),
            Token::Uint(params.amount),
            Token::Address(params.token),
        ]);
        if let Some(payload) = &params.payload {
            message.extend_from_slice(payload);
        }
        message
    }

    /// Quote (nativeFee, lzTokenFee) from the endpoint
    async fn quote(&self, params: &BridgeParams) -> Result<(U256, U256)> {
        let endpoint = self.endpoint(params.source_chain)?;
        let calldata = encode_call(
            QUOTE_SIG,
            &[
                Token::Uint(U256::from(params.target_chain.to_layerzero_eid())),
                Token::Bytes(Self::build_message(params)),
                Token::Bytes(Vec::new()),
                Token::Bool(false),
            ],
        );
        let ret = self
            .ctx
            .provider
            .call(params.source_chain, endpoint, calldata)
            .await?;
        let decoded = ethers::abi::decode(&[ParamType::Uint(256), ParamType::Uint(256)], &ret)
            .map_err(|e| {
                BridgeError::bridge(
                    BridgeErrorCode::FeeEstimationFailed,
                    "layerzero",
                    format!("quote decode failed: {}", e),
                )
            });
        match decoded {
            Ok(tokens) => {
                let native = tokens
                    .first()
                    .and_then(|t| t.clone().into_uint())
                    .unwrap_or_default();
                let lz = tokens
                    .get(1)
                    .and_then(|t| t.clone().into_uint())
                    .unwrap_or_default();
                Ok((native, lz))
            }
            // Short return data: treat the first word as the native fee
            Err(_) if ret.len() >= 32 => Ok((U256::from_big_endian(&ret[..32]), U256::zero())),
            Err(e) => Err(e),
        }
    }

    fn dispatch_request(&self, params: &BridgeParams, endpoint: Address, value: U256) -> TxRequest {
        let mut recipient32 = [0u8; 32];
        recipient32[12..].copy_from_slice(recipient_address(params).as_bytes());
        let calldata = encode_call(
            SEND_SIG,
            &[
                Token::Uint(U256::from(params.target_chain.to_layerzero_eid())),
                Token::FixedBytes(recipient32.to_vec()),
                Token::Uint(params.amount),
                Token::Bytes(Self::build_message(params)),
                Token::Bytes(Vec::new()),
            ],
        );
        TxRequest {
            from: params.sender,
            to: endpoint,
            value,
            data: calldata,
            gas_limit: None,
        }
    }
}

#[async_trait]
impl BridgeProtocolAdapter for LayerZeroAdapter {
    fn name(&self) -> &str {
        "layerzero"
    }

    async fn initialize(&self) -> Result<()> {
        self.ctx.initialize().await
    }

    async fn estimate_fee(&self, params: &BridgeParams) -> Result<FeeEstimate> {
        validate_params("layerzero", &self.ctx.chains, params)?;
        self.ctx.ensure_initialized().await?;

        let (native_fee, lz_fee) = self.quote(params).await?;
        let endpoint = self.endpoint(params.source_chain)?;
        let request = self.dispatch_request(params, endpoint, native_fee);
        let gas_limit = self
            .ctx
            .provider
            .estimate_gas(params.source_chain, &request)
            .await?;
        let gas_price = self.ctx.provider.gas_price(params.source_chain).await?;

        Ok(FeeEstimate::from_components(
            gas_limit * gas_price,
            native_fee,
            lz_fee,
            self.ctx.settings.fee_premium_percent,
            gas_limit,
            self.capabilities().avg_time_secs,
            FeeConfidence::High,
        ))
    }

    async fn execute_bridge(&self, params: &BridgeParams) -> Result<BridgeSubmission> {
        validate_params("layerzero", &self.ctx.chains, params)?;
        self.ctx.ensure_initialized().await?;

        let signer = self
            .ctx
            .provider
            .resolve_signer(params.source_chain, params.sender)
            .await?;
        let endpoint = self.endpoint(params.source_chain)?;

        let (native_fee, _) = self.quote(params).await?;
        self.ctx
            .ensure_native_balance(params.source_chain, signer, native_fee)
            .await?;
        self.ctx
            .ensure_allowance(
                params.source_chain,
                params.token,
                signer,
                endpoint,
                params.amount,
            )
            .await?;

        let request = self.dispatch_request(params, endpoint, native_fee);
        let receipt = self
            .ctx
            .submit_and_confirm(params.source_chain, request)
            .await?;

        let correlation_key = match parse_receipt_guid(&receipt) {
            Some(guid) => guid,
            None => {
                warn!(
                    "layerzero: no PacketSent log in {}, using fallback key",
                    receipt.tx_hash
                );
                fallback_correlation_key(&receipt.tx_hash, receipt.block_number, signer)
            }
        };
        debug!(
            "layerzero: dispatched {} with key {}",
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
        self.ctx
            .transaction_status(chain, tx_hash, parse_receipt_guid)
            .await
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            protocol: "layerzero".into(),
            chains: self.ctx.chains.clone(),
            requires_gas_deposit: false,
            confirmations: self.ctx.confirmations.clone(),
            avg_time_secs: 180,
            max_time_secs: 3600,
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

    fn endpoints() -> HashMap<Chain, Address> {
        [
            (Chain::Ethereum, Address::from_low_u64_be(0xE1)),
            (Chain::Polygon, Address::from_low_u64_be(0xE2)),
        ]
        .into_iter()
        .collect()
    }

    fn params() -> BridgeParams {
        BridgeParams {
            source_chain: Chain::Ethereum,
            target_chain: Chain::Polygon,
            token: Address::from_low_u64_be(0xAAAA),
            amount: U256::from(1_000_000u64),
            recipient: "0x00000000000000000000000000000000000000bb".into(),
            sender: Address::from_low_u64_be(0xCCCC),
            payload: None,
        }
    }

    fn packet_sent_log(guid: [u8; 32]) -> RawLog {
        let mut data = guid.to_vec();
        data.extend(ethers::abi::encode(&[
            Token::Uint(U256::from(Chain::Polygon.to_layerzero_eid())),
            Token::Address(Address::from_low_u64_be(0xCCCC)),
        ]));
        RawLog {
            address: Address::from_low_u64_be(0xE1),
            topics: vec![*PACKET_SENT_TOPIC],
            data,
            tx_hash: String::new(),
            block_number: 0,
            log_index: 0,
        }
    }

    async fn adapter(provider: Arc<MockChainProvider>) -> LayerZeroAdapter {
        let adapter = LayerZeroAdapter::new(
            provider,
            Arc::new(MockTokenService::new()),
            AdapterConfig::default(),
            endpoints(),
        );
        adapter.initialize().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_estimate_fee_rejects_before_network_call() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
        let adapter = adapter(provider.clone()).await;
        let baseline = provider.network_calls();

        let mut bad = params();
        bad.target_chain = Chain::BSC; // not configured
        let err = adapter.estimate_fee(&bad).await.unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert_eq!(
            provider.network_calls(),
            baseline,
            "validation must reject before any network call"
        );
    }

    #[tokio::test]
    async fn test_estimate_fee_components() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
        // quote returns (2000, 500)
        let mut ret = vec![0u8; 64];
        U256::from(2_000u64).to_big_endian(&mut ret[..32]);
        U256::from(500u64).to_big_endian(&mut ret[32..]);
        provider.set_call_response(super::super::selector(QUOTE_SIG), ret);

        let adapter = adapter(provider).await;
        let est = adapter.estimate_fee(&params()).await.unwrap();
        assert_eq!(est.protocol_fee, U256::from(2_000u64));
        assert_eq!(est.relayer_fee, U256::from(500u64));
        // 10% premium over 2500
        assert_eq!(est.premium, U256::from(250u64));
        // gas 100_000 * 1 gwei
        assert_eq!(est.gas_fee, U256::from(100_000u64) * U256::from(1_000_000_000u64));
        assert_eq!(
            est.total_fee,
            est.gas_fee + est.protocol_fee + est.relayer_fee + est.premium
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_bridge_extracts_guid() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
        provider.queue_receipt_logs(vec![packet_sent_log([0x42; 32])]);
        let adapter = adapter(provider).await;

        let submission = adapter.execute_bridge(&params()).await.unwrap();
        assert!(submission.pending_delivery);
        assert_eq!(submission.correlation_key, format!("0x{}", hex::encode([0x42; 32])));
        assert!(submission.gas_payment_tx_hash.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_bridge_fallback_key_when_no_log() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
        let adapter = adapter(provider).await;

        let submission = adapter.execute_bridge(&params()).await.unwrap();
        assert!(submission.correlation_key.starts_with("fallback:0x"));
    }

    #[tokio::test]
    async fn test_not_initialized_guard() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
        let adapter = LayerZeroAdapter::new(
            provider,
            Arc::new(MockTokenService::new()),
            AdapterConfig::default(),
            endpoints(),
        );
        let err = adapter.estimate_fee(&params()).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Bridge { code: BridgeErrorCode::NotInitialized, .. }
        ));
    }
}
