//! Hyperlane-style adapter
//!
//! A mailbox contract per chain: `quoteDispatch` prices the message,
//! `dispatch` sends it with the quote attached as value, and the `DispatchId`
//! event carries the message id used as the correlation key. The destination
//! mailbox emits `ProcessId` with the same id once delivered.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::Token;
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

/// `DispatchId(bytes32 indexed messageId)`
pub(crate) static DISPATCH_ID_TOPIC: Lazy<H256> = Lazy::new(|| event_topic("DispatchId(bytes32)"));

/// `ProcessId(bytes32 indexed messageId)`
pub(crate) static PROCESS_ID_TOPIC: Lazy<H256> = Lazy::new(|| event_topic("ProcessId(bytes32)"));

const QUOTE_DISPATCH_SIG: &str = "quoteDispatch(uint32,bytes32,bytes)";
const DISPATCH_SIG: &str = "dispatch(uint32,bytes32,bytes)";

/// Message id from a `DispatchId` or `ProcessId` log
pub(crate) fn parse_message_id(log: &RawLog) -> Option<String> {
    let topic0 = log.topics.first()?;
    if *topic0 != *DISPATCH_ID_TOPIC && *topic0 != *PROCESS_ID_TOPIC {
        return None;
    }
    log.topics
        .get(1)
        .map(|id| format!("0x{}", hex::encode(id.as_bytes())))
}

fn parse_receipt_message_id(receipt: &TxReceipt) -> Option<String> {
    receipt
        .logs
        .iter()
        .filter(|l| l.topics.first() == Some(&*DISPATCH_ID_TOPIC))
        .find_map(parse_message_id)
}

/// Hyperlane-style protocol adapter
pub struct HyperlaneAdapter {
    ctx: AdapterContext,
    /// Mailbox contract per chain
    mailboxes: HashMap<Chain, Address>,
}

impl HyperlaneAdapter {
    /// Adapter over the given mailbox deployment
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        tokens: Arc<dyn TokenService>,
        settings: AdapterConfig,
        mailboxes: HashMap<Chain, Address>,
    ) -> Self {
        let chains: Vec<Chain> = mailboxes.keys().copied().collect();
        Self {
            ctx: AdapterContext::new("hyperlane", provider, tokens, settings, chains),
            mailboxes,
        }
    }

    fn mailbox(&self, chain: Chain) -> Result<Address> {
        self.mailboxes.get(&chain).copied().ok_or_else(|| {
            BridgeError::Validation(format!("hyperlane: no mailbox configured for {}", chain))
        })
    }

    fn message_body(params: &BridgeParams) -> Vec<u8> {
        let mut body = ethers::abi::encode(&[
            Token::Address(recipient_address(params)),
            Token::Uint(params.amount),
            Token::Address(params.token),
        ]);
        if let Some(payload) = &params.payload {
            body.extend_from_slice(payload);
        }
        body
    }

    fn dispatch_args(params: &BridgeParams) -> Vec<Token> {
        let mut recipient32 = [0u8; 32];
        recipient32[12..].copy_from_slice(recipient_address(params).as_bytes());
        vec![
            Token::Uint(U256::from(params.target_chain.hyperlane_domain())),
            Token::FixedBytes(recipient32.to_vec()),
            Token::Bytes(Self::message_body(params)),
        ]
    }

    /// Interchain gas quote from the mailbox
    async fn quote_dispatch(&self, params: &BridgeParams) -> Result<U256> {
        let mailbox = self.mailbox(params.source_chain)?;
        let ret = self
            .ctx
            .provider
            .call(
                params.source_chain,
                mailbox,
                encode_call(QUOTE_DISPATCH_SIG, &Self::dispatch_args(params)),
            )
            .await?;
        if ret.len() < 32 {
            return Err(BridgeError::bridge(
                BridgeErrorCode::FeeEstimationFailed,
                "hyperlane",
                format!("quoteDispatch returned {} bytes", ret.len()),
            ));
        }
        Ok(U256::from_big_endian(&ret[..32]))
    }

    fn dispatch_request(&self, params: &BridgeParams, mailbox: Address, value: U256) -> TxRequest {
        TxRequest {
            from: params.sender,
            to: mailbox,
            value,
            data: encode_call(DISPATCH_SIG, &Self::dispatch_args(params)),
            gas_limit: None,
        }
    }
}

#[async_trait]
impl BridgeProtocolAdapter for HyperlaneAdapter {
    fn name(&self) -> &str {
        "hyperlane"
    }

    async fn initialize(&self) -> Result<()> {
        self.ctx.initialize().await
    }

    async fn estimate_fee(&self, params: &BridgeParams) -> Result<FeeEstimate> {
        validate_params("hyperlane", &self.ctx.chains, params)?;
        self.ctx.ensure_initialized().await?;

        let quote = self.quote_dispatch(params).await?;
        let mailbox = self.mailbox(params.source_chain)?;
        let request = self.dispatch_request(params, mailbox, quote);
        let gas_limit = self
            .ctx
            .provider
            .estimate_gas(params.source_chain, &request)
            .await?;
        let gas_price = self.ctx.provider.gas_price(params.source_chain).await?;

        Ok(FeeEstimate::from_components(
            gas_limit * gas_price,
            U256::zero(),
            quote,
            self.ctx.settings.fee_premium_percent,
            gas_limit,
            self.capabilities().avg_time_secs,
            FeeConfidence::High,
        ))
    }

    async fn execute_bridge(&self, params: &BridgeParams) -> Result<BridgeSubmission> {
        validate_params("hyperlane", &self.ctx.chains, params)?;
        self.ctx.ensure_initialized().await?;

        let signer = self
            .ctx
            .provider
            .resolve_signer(params.source_chain, params.sender)
            .await?;
        let mailbox = self.mailbox(params.source_chain)?;

        let quote = self.quote_dispatch(params).await?;
        self.ctx
            .ensure_native_balance(params.source_chain, signer, quote)
            .await?;
        self.ctx
            .ensure_allowance(
                params.source_chain,
                params.token,
                signer,
                mailbox,
                params.amount,
            )
            .await?;

        let request = self.dispatch_request(params, mailbox, quote);
        let receipt = self
            .ctx
            .submit_and_confirm(params.source_chain, request)
            .await?;

        let correlation_key = match parse_receipt_message_id(&receipt) {
            Some(id) => id,
            None => {
                warn!(
                    "hyperlane: no DispatchId log in {}, using fallback key",
                    receipt.tx_hash
                );
                fallback_correlation_key(&receipt.tx_hash, receipt.block_number, signer)
            }
        };
        debug!(
            "hyperlane: dispatched {} with id {}",
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
            .transaction_status(chain, tx_hash, parse_receipt_message_id)
            .await
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            protocol: "hyperlane".into(),
            chains: self.ctx.chains.clone(),
            requires_gas_deposit: false,
            confirmations: self.ctx.confirmations.clone(),
            avg_time_secs: 120,
            max_time_secs: 1800,
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.ctx.shutdown().await;
        Ok(())
    }
}
