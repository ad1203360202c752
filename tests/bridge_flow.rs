//! End-to-end bridge flow over the mock chain provider: execute through the
//! orchestrator, observe delivery through the listener, verify the tracker
//! record and the export round-trip.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

use dmd_bridge::adapters::axelar::AxelarAdapter;
use dmd_bridge::config::{AdapterConfig, BridgeConfig, ProtocolEndpoints, TrackerConfig};
use dmd_bridge::providers::RawLog;
use dmd_bridge::registry::default_descriptors;
use dmd_bridge::test_utils::{MockChainProvider, MockTokenService};
use dmd_bridge::tracker::export::ExportFormat;
use dmd_bridge::{
    BridgeError, BridgeErrorCode, BridgeOrchestrator, BridgeParams, BridgeProtocolAdapter,
    BridgeTxStatus, Chain, HistoryFilter, MessageListener, ProtocolRegistry, TransactionTracker,
};

fn topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

fn contract_call_topic() -> H256 {
    topic("ContractCallWithToken(address,string,string,bytes32,bytes,string,uint256)")
}

fn executed_topic() -> H256 {
    topic("Executed(bytes32,string,uint256)")
}

fn gateway() -> Address {
    Address::from_low_u64_be(0xA1)
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

/// The ContractCallWithToken log the gateway attaches to the dispatch receipt
fn contract_call_log() -> RawLog {
    let payload = ethers::abi::encode(&[
        Token::Address(Address::from_low_u64_be(0xBB)),
        Token::Uint(U256::from(1_000_000u64)),
    ]);
    let mut sender_topic = [0u8; 32];
    sender_topic[12..].copy_from_slice(Address::from_low_u64_be(0xCCCC).as_bytes());
    RawLog {
        address: gateway(),
        topics: vec![
            contract_call_topic(),
            H256::from(sender_topic),
            H256::from(keccak256(&payload)),
        ],
        data: ethers::abi::encode(&[
            Token::String("polygon".into()),
            Token::String("0x00000000000000000000000000000000000000bb".into()),
            Token::Bytes(payload),
            Token::String("MOCK".into()),
            Token::Uint(U256::from(1_000_000u64)),
        ]),
        tx_hash: String::new(),
        block_number: 0,
        log_index: 2,
    }
}

async fn build_orchestrator(
    provider: Arc<MockChainProvider>,
) -> (Arc<BridgeOrchestrator>, Arc<MessageListener>) {
    let endpoints: HashMap<Chain, ProtocolEndpoints> = [
        (
            Chain::Ethereum,
            ProtocolEndpoints {
                core: gateway(),
                auxiliary: Some(Address::from_low_u64_be(0xA2)),
            },
        ),
        (
            Chain::Polygon,
            ProtocolEndpoints {
                core: Address::from_low_u64_be(0xA3),
                auxiliary: Some(Address::from_low_u64_be(0xA4)),
            },
        ),
    ]
    .into_iter()
    .collect();

    let adapter: Arc<dyn BridgeProtocolAdapter> = Arc::new(AxelarAdapter::new(
        provider.clone(),
        Arc::new(MockTokenService::new()),
        AdapterConfig::default(),
        endpoints,
    ));
    let tracker = Arc::new(TransactionTracker::new(TrackerConfig::default()));
    let listener = Arc::new(MessageListener::new(
        provider,
        BridgeConfig::default(),
        Vec::new(),
    ));
    let orchestrator = Arc::new(BridgeOrchestrator::new(
        ProtocolRegistry::new(default_descriptors()),
        vec![adapter],
        tracker,
        Arc::clone(&listener),
    ));
    orchestrator.start().await.unwrap();
    (orchestrator, listener)
}

#[tokio::test(start_paused = true)]
async fn axelar_transfer_completes_end_to_end() {
    let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
    // Gas payment leg carries no bridge event; the dispatch leg does
    provider.queue_receipt_logs(Vec::new());
    provider.queue_receipt_logs(vec![contract_call_log()]);
    let (orchestrator, listener) = build_orchestrator(provider.clone()).await;

    let tx = orchestrator
        .execute_bridge("tx1", "axelar", &params())
        .await
        .unwrap();

    // Two source transactions: gas payment then dispatch, both confirmed
    assert_eq!(provider.sends(), 2);
    assert_eq!(tx.status, BridgeTxStatus::Confirmed);
    let source_tx = tx.source_tx_hash.clone().unwrap();
    let correlation = tx.correlation_key.clone().unwrap();
    assert_eq!(correlation, format!("{}:2", source_tx));

    // History so far: pending -> initiated -> confirmed, monotone
    let ranks: Vec<u8> = tx
        .status_history
        .iter()
        .filter_map(|e| e.status.lifecycle_rank())
        .collect();
    assert_eq!(ranks, vec![0, 1, 2]);

    // Destination gateway executes the transfer
    let executed = RawLog {
        address: Address::from_low_u64_be(0xA3),
        topics: vec![executed_topic(), H256::from_low_u64_be(1)],
        data: ethers::abi::encode(&[
            Token::String(source_tx.clone()),
            Token::Uint(U256::from(2u64)),
        ]),
        tx_hash: "0xdest".into(),
        block_number: 50,
        log_index: 0,
    };
    listener
        .ingest_log("axelar", Chain::Polygon, &executed)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let tx = orchestrator.get_transaction_status("tx1").await.unwrap();
    assert_eq!(tx.status, BridgeTxStatus::Completed);
    assert_eq!(tx.dest_tx_hash.as_deref(), Some("0xdest"));
    assert!(tx.completed_at.is_some());
    assert!(tx.actual_duration_secs.is_some());
    assert!(tx.errors.is_empty());

    // Full history is monotone and frozen
    let ranks: Vec<u8> = tx
        .status_history
        .iter()
        .filter_map(|e| e.status.lifecycle_rank())
        .collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*ranks.last().unwrap(), 5);

    // Export round-trip restores the record in a fresh tracker
    let exported = orchestrator
        .export_data(ExportFormat::Json, &HistoryFilter::default())
        .await
        .unwrap();
    let restored = TransactionTracker::new(TrackerConfig::default());
    assert_eq!(restored.import_data(&exported).await.unwrap(), 1);
    let copy = restored.get_transaction("tx1").await.unwrap();
    assert_eq!(copy.status, BridgeTxStatus::Completed);
    assert_eq!(copy.correlation_key, Some(correlation));
    assert_eq!(copy.status_history.len(), tx.status_history.len());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn gas_leg_confirms_but_dispatch_reverts() {
    let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
    provider.set_revert_send(2);
    let (orchestrator, _listener) = build_orchestrator(provider.clone()).await;

    let err = orchestrator
        .execute_bridge("tx1", "axelar", &params())
        .await
        .unwrap_err();
    match err {
        BridgeError::Bridge { code, tx_hash, .. } => {
            assert_eq!(code, BridgeErrorCode::TxFailed);
            // The second submission is the dispatch; its hash is preserved
            assert_eq!(tx_hash.as_deref(), Some("0xsend0002"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let tx = orchestrator.get_transaction_status("tx1").await.unwrap();
    assert_eq!(tx.status, BridgeTxStatus::Failed);
    assert_eq!(tx.errors.len(), 1);
    assert_eq!(tx.errors[0].code, "TX_FAILED");
    assert_eq!(tx.source_tx_hash.as_deref(), Some("0xsend0002"));

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn validation_failure_happens_before_any_network_call() {
    let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
    let (orchestrator, _listener) = build_orchestrator(provider.clone()).await;
    let baseline = provider.network_calls();

    let mut bad = params();
    bad.amount = U256::zero();
    let err = orchestrator.estimate_fee("axelar", &bad).await.unwrap_err();
    assert!(matches!(err, BridgeError::Validation(_)));
    assert_eq!(provider.network_calls(), baseline);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn recommendation_and_execution_agree_on_protocol_names() {
    let provider = Arc::new(MockChainProvider::new(vec![Chain::Ethereum, Chain::Polygon]));
    provider.queue_receipt_logs(Vec::new());
    provider.queue_receipt_logs(vec![contract_call_log()]);
    let (orchestrator, _listener) = build_orchestrator(provider).await;

    let ranked = orchestrator
        .recommend_protocol(
            Chain::Ethereum,
            Chain::Polygon,
            &dmd_bridge::RecommendOptions::default(),
        )
        .unwrap();
    // Security-first default puts the stake-based protocol on top
    assert_eq!(ranked[0].name, "axelar");

    let tx = orchestrator
        .execute_bridge("tx1", &ranked[0].name.clone(), &params())
        .await
        .unwrap();
    assert_eq!(tx.protocol, "axelar");

    orchestrator.shutdown().await.unwrap();
}
