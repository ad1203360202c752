//! Axelar-style adapter
//!
//! Dispatch is a two-transaction flow: destination gas is prepaid to a gas
//! service contract first, then the transfer itself goes through the gateway
//! with `callContractWithToken`. The correlation key is the position of the
//! `ContractCallWithToken` event, `{tx_hash}:{log_index}`, which the
//! destination gateway echoes back in its `Executed` event.

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
use crate::config::{AdapterConfig, ProtocolEndpoints};
use crate::error::{BridgeError, BridgeErrorCode, Result};
use crate::providers::{ChainProvider, RawLog, TokenService, TxReceipt, TxRequest};
use crate::types::chain::Chain;
use crate::types::fee::{FeeConfidence, FeeEstimate};

/// `ContractCallWithToken(address indexed sender, string destinationChain, string destinationContractAddress, bytes32 indexed payloadHash, bytes payload, string symbol, uint256 amount)`
pub(crate) static CONTRACT_CALL_WITH_TOKEN_TOPIC: Lazy<H256> = Lazy::new(|| {
    event_topic("ContractCallWithToken(address,string,string,bytes32,bytes,string,uint256)")
});

/// `Executed(bytes32 indexed commandId, string sourceTxHash, uint256 sourceEventIndex)`
pub(crate) static EXECUTED_TOPIC: Lazy<H256> =
    Lazy::new(|| event_topic("Executed(bytes32,string,uint256)"));

/// `ExecutionFailed(bytes32 indexed commandId, string sourceTxHash, uint256 sourceEventIndex)`
pub(crate) static EXECUTION_FAILED_TOPIC: Lazy<H256> =
    Lazy::new(|| event_topic("ExecutionFailed(bytes32,string,uint256)"));

const ESTIMATE_GAS_FEE_SIG: &str = "estimateGasFee(string,string,uint256)";
const PAY_NATIVE_GAS_SIG: &str =
    "payNativeGasForContractCallWithToken(address,string,string,bytes,string,uint256,address)";
const CALL_CONTRACT_WITH_TOKEN_SIG: &str =
    "callContractWithToken(string,string,bytes,string,uint256)";

/// Correlation key from a source-chain `ContractCallWithToken` log
pub(crate) fn parse_call_key(log: &RawLog) -> Option<String> {
    if log.topics.first() != Some(&*CONTRACT_CALL_WITH_TOKEN_TOPIC) {
        return None;
    }
    Some(format!("{}:{}", log.tx_hash, log.log_index))
}

/// Correlation key echoed back by the destination gateway
pub(crate) fn parse_executed_key(log: &RawLog) -> Option<String> {
    if log.topics.first() != Some(&*EXECUTED_TOPIC)
        && log.topics.first() != Some(&*EXECUTION_FAILED_TOPIC)
    {
        return None;
    }
    let decoded =
        ethers::abi::decode(&[ParamType::String, ParamType::Uint(256)], &log.data).ok()?;
    let source_tx = decoded.first()?.clone().into_string()?;
    let index = decoded.get(1)?.clone().into_uint()?;
    Some(format!("{}:{}", source_tx, index))
}

/// Axelar-style protocol adapter
pub struct AxelarAdapter {
    ctx: AdapterContext,
    /// Gateway (core) and gas service (auxiliary) per chain
    endpoints: HashMap<Chain, ProtocolEndpoints>,
}

impl AxelarAdapter {
    /// Adapter over the given gateway and gas service deployment
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        tokens: Arc<dyn TokenService>,
        settings: AdapterConfig,
        endpoints: HashMap<Chain, ProtocolEndpoints>,
    ) -> Self {
        let chains: Vec<Chain> = endpoints.keys().copied().collect();
        Self {
            ctx: AdapterContext::new("axelar", provider, tokens, settings, chains),
            endpoints,
        }
    }

    fn gateway(&self, chain: Chain) -> Result<Address> {
        self.endpoints.get(&chain).map(|e| e.core).ok_or_else(|| {
            BridgeError::Validation(format!("axelar: no gateway configured for {}", chain))
        })
    }

    fn gas_service(&self, chain: Chain) -> Result<Address> {
        self.endpoints
            .get(&chain)
            .and_then(|e| e.auxiliary)
            .ok_or_else(|| {
                BridgeError::Validation(format!("axelar: no gas service configured for {}", chain))
            })
    }

    /// Destination gas payment quoted by the gas service
    async fn gas_payment(&self, params: &BridgeParams) -> Result<U256> {
        let gas_service = self.gas_service(params.source_chain)?;
        let calldata = encode_call(
            ESTIMATE_GAS_FEE_SIG,
            &[
                Token::String(params.source_chain.axelar_name().to_string()),
                Token::String(params.target_chain.axelar_name().to_string()),
                Token::Uint(U256::from(200_000u64)),
            ],
        );
        let ret = self
            .ctx
            .provider
            .call(params.source_chain, gas_service, calldata)
            .await?;
        if ret.len() < 32 {
            return Err(BridgeError::bridge(
                BridgeErrorCode::FeeEstimationFailed,
                "axelar",
                format!("estimateGasFee returned {} bytes", ret.len()),
            ));
        }
        Ok(U256::from_big_endian(&ret[..32]))
    }

    fn transfer_payload(params: &BridgeParams) -> Vec<u8> {
        let mut payload = ethers::abi::encode(&[
            Token::Address(recipient_address(params)),
            Token::Uint(params.amount),
        ]);
        if let Some(extra) = &params.payload {
            payload.extend_from_slice(extra);
        }
        payload
    }

    fn gas_payment_request(
        &self,
        params: &BridgeParams,
        symbol: &str,
        gas_service: Address,
        value: U256,
    ) -> TxRequest {
        let calldata = encode_call(
            PAY_NATIVE_GAS_SIG,
            &[
                Token::Address(params.sender),
                Token::String(params.target_chain.axelar_name().to_string()),
                Token::String(params.recipient.clone()),
                Token::Bytes(Self::transfer_payload(params)),
                Token::String(symbol.to_string()),
                Token::Uint(params.amount),
                Token::Address(params.sender),
            ],
        );
        TxRequest {
            from: params.sender,
            to: gas_service,
            value,
            data: calldata,
            gas_limit: None,
        }
    }

    fn dispatch_request(&self, params: &BridgeParams, symbol: &str, gateway: Address) -> TxRequest {
        let calldata = encode_call(
            CALL_CONTRACT_WITH_TOKEN_SIG,
            &[
                Token::String(params.target_chain.axelar_name().to_string()),
                Token::String(params.recipient.clone()),
                Token::Bytes(Self::transfer_payload(params)),
                Token::String(symbol.to_string()),
                Token::Uint(params.amount),
            ],
        );
        TxRequest {
            from: params.sender,
            to: gateway,
            value: U256::zero(),
            data: calldata,
            gas_limit: None,
        }
    }
}

#[async_trait]
impl BridgeProtocolAdapter for AxelarAdapter {
    fn name(&self) -> &str {
        "axelar"
    }

    async fn initialize(&self) -> Result<()> {
        self.ctx.initialize().await
    }

    async fn estimate_fee(&self, params: &BridgeParams) -> Result<FeeEstimate> {
        validate_params("axelar", &self.ctx.chains, params)?;
        self.ctx.ensure_initialized().await?;

        let gas_payment = self.gas_payment(params).await?;
        let symbol = self
            .ctx
            .tokens
            .symbol(params.source_chain, params.token)
            .await?;
        let gateway = self.gateway(params.source_chain)?;
        let request = self.dispatch_request(params, &symbol, gateway);
        let gas_limit = self
            .ctx
            .provider
            .estimate_gas(params.source_chain, &request)
            .await?;
        let gas_price = self.ctx.provider.gas_price(params.source_chain).await?;

        // The prepaid destination gas is the relayer's cut
        Ok(FeeEstimate::from_components(
            gas_limit * gas_price,
            U256::zero(),
            gas_payment,
            self.ctx.settings.fee_premium_percent,
            gas_limit,
            self.capabilities().avg_time_secs,
            FeeConfidence::High,
        ))
    }

    async fn execute_bridge(&self, params: &BridgeParams) -> Result<BridgeSubmission> {
        validate_params("axelar", &self.ctx.chains, params)?;
        self.ctx.ensure_initialized().await?;

        let signer = self
            .ctx
            .provider
            .resolve_signer(params.source_chain, params.sender)
            .await?;
        let gateway = self.gateway(params.source_chain)?;
        let gas_service = self.gas_service(params.source_chain)?;
        let symbol = self
            .ctx
            .tokens
            .symbol(params.source_chain, params.token)
            .await?;

        let gas_payment = self.gas_payment(params).await?;
        self.ctx
            .ensure_native_balance(params.source_chain, signer, gas_payment)
            .await?;
        self.ctx
            .ensure_allowance(
                params.source_chain,
                params.token,
                signer,
                gateway,
                params.amount,
            )
            .await?;

        // Leg 1: prepay destination gas
        let gas_request = self.gas_payment_request(params, &symbol, gas_service, gas_payment);
        let gas_receipt = self
            .ctx
            .submit_and_confirm(params.source_chain, gas_request)
            .await?;
        debug!("axelar: gas payment {} confirmed", gas_receipt.tx_hash);

        // Leg 2: dispatch through the gateway. A failure here is reported with
        // the dispatch hash even though the gas payment already went through.
        let dispatch = self.dispatch_request(params, &symbol, gateway);
        let receipt = self
            .ctx
            .submit_and_confirm(params.source_chain, dispatch)
            .await?;

        let correlation_key = match receipt.logs.iter().find_map(parse_call_key) {
            Some(key) => key,
            None => {
                warn!(
                    "axelar: no ContractCallWithToken log in {}, using fallback key",
                    receipt.tx_hash
                );
                fallback_correlation_key(&receipt.tx_hash, receipt.block_number, signer)
            }
        };
        debug!(
            "axelar: dispatched {} with key {}",
            receipt.tx_hash, correlation_key
        );

        Ok(BridgeSubmission {
            source_tx_hash: receipt.tx_hash.clone(),
            correlation_key,
            gas_payment_tx_hash: Some(gas_receipt.tx_hash),
            gas_used: receipt.gas_used.to_string(),
            pending_delivery: true,
        })
    }

    async fn get_transaction_status(&self, tx_hash: &str, chain: Chain) -> Result<AdapterTxStatus> {
        let parse = |receipt: &TxReceipt| receipt.logs.iter().find_map(parse_call_key);
        self.ctx.transaction_status(chain, tx_hash, parse).await
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            protocol: "axelar".into(),
            chains: self.ctx.chains.clone(),
            requires_gas_deposit: true,
            confirmations: self.ctx.confirmations.clone(),
            avg_time_secs: 300,
            max_time_secs: 5400,
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.ctx.shutdown().await;
        Ok(())
    }
}

/// Build a `ContractCallWithToken` log the way the gateway emits it
#[cfg(test)]
pub(crate) fn contract_call_log(gateway: Address, sender: Address, payload: &[u8]) -> RawLog {
    use ethers::utils::keccak256;

    let mut sender_topic = [0u8; 32];
    sender_topic[12..].copy_from_slice(sender.as_bytes());
    RawLog {
        address: gateway,
        topics: vec![
            *CONTRACT_CALL_WITH_TOKEN_TOPIC,
            H256::from(sender_topic),
            H256::from(keccak256(payload)),
        ],
        data: ethers::abi::encode(&[
            Token::String("polygon".into()),
            Token::String("0x00000000000000000000000000000000000000bb".into()),
            Token::Bytes(payload.to_vec()),
            Token::String("MOCK".into()),
            Token::Uint(U256::from(1u64)),
        ]),
        tx_hash: String::new(),
        block_number: 0,
        log_index: 3,
    }
}
