//! Bridge orchestrator
//!
//! Facade tying the registry, adapters, tracker and listener together. All
//! status writes flow through here (or through the consumer tasks it spawns),
//! so callers only ever deal with transaction ids and the typed event stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::adapters::{BridgeParams, BridgeProtocolAdapter, BridgeSubmission};
use crate::error::{BridgeError, Result};
use crate::listener::{BridgeEventNotification, BridgeStatus, MessageListener};
use crate::registry::{ProtocolDescriptor, ProtocolRegistry, RecommendOptions};
use crate::tracker::export::ExportFormat;
use crate::tracker::metrics::{BridgeMetrics, FailureAnalysis};
use crate::tracker::{
    HistoryFilter, HistoryPage, Page, SortBy, StatusUpdate, TrackRequest, TrackerAlert,
    TransactionTracker,
};
use crate::types::chain::Chain;
use crate::types::event::EventKind;
use crate::types::fee::FeeEstimate;
use crate::types::transaction::{BridgeTransaction, BridgeTxStatus};

/// Typed events fanned out to orchestrator subscribers
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// A tracked transaction changed status
    StatusUpdated { id: String, status: BridgeTxStatus },
    /// A tracked transaction crossed the stuck threshold
    StuckTransaction {
        id: String,
        seconds_since_update: i64,
    },
    /// Rolling failure rate crossed the configured threshold
    HighFailureRate { failure_rate: f64 },
    /// Delivery observed on the destination chain
    BridgeCompleted { id: String, dest_tx_hash: String },
    /// The transfer failed, either at dispatch or at delivery
    BridgeFailed { id: String, reason: String },
}

/// Facade over the whole bridge subsystem
pub struct BridgeOrchestrator {
    registry: ProtocolRegistry,
    adapters: HashMap<String, Arc<dyn BridgeProtocolAdapter>>,
    tracker: Arc<TransactionTracker>,
    listener: Arc<MessageListener>,
    events: broadcast::Sender<OrchestratorEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BridgeOrchestrator {
    /// Assemble the facade. Nothing runs until `start()`.
    pub fn new(
        registry: ProtocolRegistry,
        adapters: Vec<Arc<dyn BridgeProtocolAdapter>>,
        tracker: Arc<TransactionTracker>,
        listener: Arc<MessageListener>,
    ) -> Self {
        let (events, _) = broadcast::channel(512);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let adapters = adapters
            .into_iter()
            .map(|a| (a.name().to_string(), a))
            .collect();
        Self {
            registry,
            adapters,
            tracker,
            listener,
            events,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Subscribe to the typed event stream
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Initialize adapters, start the listener loops and tracker background
    /// tasks, and spawn the consumer tasks.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for adapter in self.adapters.values() {
            adapter.initialize().await?;
        }
        self.tracker.start_background_tasks();
        self.listener.start().await?;
        self.spawn_listener_consumer();
        self.spawn_alert_consumer();
        info!("Bridge orchestrator started with {} adapters", self.adapters.len());
        Ok(())
    }

    /// Stop everything: listener loops, background tasks, adapters
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.listener.stop().await;
        self.tracker.shutdown();
        for adapter in self.adapters.values() {
            adapter.shutdown().await?;
        }
        info!("Bridge orchestrator shut down");
        Ok(())
    }

    fn adapter(&self, protocol: &str) -> Result<&Arc<dyn BridgeProtocolAdapter>> {
        self.adapters.get(protocol).ok_or_else(|| {
            BridgeError::Validation(format!("unknown bridge protocol: {}", protocol))
        })
    }

    /// Registered protocol names
    pub fn list_protocols(&self) -> Vec<&str> {
        self.registry.list_protocols()
    }

    /// Descriptor lookup by name
    pub fn get_protocol_metadata(&self, name: &str) -> Option<&ProtocolDescriptor> {
        self.registry.get_metadata(name)
    }

    /// Ranked protocol recommendation for a chain pair
    pub fn recommend_protocol(
        &self,
        source: Chain,
        target: Chain,
        options: &RecommendOptions,
    ) -> Result<Vec<&ProtocolDescriptor>> {
        self.registry.recommend(source, target, options)
    }

    /// Fee quote through the named adapter
    pub async fn estimate_fee(&self, protocol: &str, params: &BridgeParams) -> Result<FeeEstimate> {
        self.adapter(protocol)?.estimate_fee(params).await
    }

    /// Execute a transfer end-to-end up to source confirmation, registering
    /// it with the tracker under `id`. Delivery is completed asynchronously by
    /// the listener consumer.
    pub async fn execute_bridge(
        &self,
        id: &str,
        protocol: &str,
        params: &BridgeParams,
    ) -> Result<BridgeTransaction> {
        let adapter = self.adapter(protocol)?;

        self.tracker
            .start_tracking(TrackRequest {
                id: id.to_string(),
                protocol: protocol.to_string(),
                source_chain: params.source_chain,
                target_chain: params.target_chain,
                token: format!("{:#x}", params.token),
                amount: params.amount.to_string(),
                recipient: params.recipient.clone(),
                sender: Some(format!("{:#x}", params.sender)),
            })
            .await?;

        match adapter.execute_bridge(params).await {
            Ok(submission) => {
                self.record_submission(id, &submission).await?;
                self.tracker.get_transaction(id).await
            }
            Err(e) => {
                self.record_failure(id, &e).await;
                Err(e)
            }
        }
    }

    /// Adapter returned: the dispatch is submitted and source-confirmed
    async fn record_submission(&self, id: &str, submission: &BridgeSubmission) -> Result<()> {
        let data = serde_json::json!({
            "gas_payment_tx_hash": submission.gas_payment_tx_hash,
        });
        self.apply_update(
            id,
            StatusUpdate::to(BridgeTxStatus::Initiated)
                .with_source_tx(submission.source_tx_hash.clone())
                .with_correlation_key(submission.correlation_key.clone())
                .with_gas_used(submission.gas_used.clone())
                .with_data(data),
        )
        .await?;
        self.apply_update(id, StatusUpdate::to(BridgeTxStatus::Confirmed))
            .await?;
        Ok(())
    }

    async fn record_failure(&self, id: &str, err: &BridgeError) {
        let mut update = StatusUpdate::to(BridgeTxStatus::Failed)
            .with_error(err.code_str(), err.to_string());
        if let BridgeError::Bridge {
            tx_hash: Some(hash),
            ..
        } = err
        {
            update = update.with_source_tx(hash.clone());
        }
        if let Err(e) = self.apply_update(id, update).await {
            error!("Could not record failure for {}: {}", id, e);
        }
        let _ = self.events.send(OrchestratorEvent::BridgeFailed {
            id: id.to_string(),
            reason: err.to_string(),
        });
    }

    /// Tracker write plus `StatusUpdated` fan-out
    async fn apply_update(&self, id: &str, update: StatusUpdate) -> Result<BridgeTransaction> {
        let tx = self.tracker.update_status(id, update).await?;
        let _ = self.events.send(OrchestratorEvent::StatusUpdated {
            id: id.to_string(),
            status: tx.status,
        });
        Ok(tx)
    }

    /// Tracker record for an id
    pub async fn get_transaction_status(&self, id: &str) -> Result<BridgeTransaction> {
        self.tracker.get_transaction(id).await
    }

    /// Composite on-chain view by source transaction hash
    pub async fn get_bridge_status(&self, tx_hash: &str, source_chain: Chain) -> Result<BridgeStatus> {
        self.listener.get_bridge_status(tx_hash, source_chain).await
    }

    /// Filtered history from the tracker
    pub async fn get_transaction_history(
        &self,
        filter: &HistoryFilter,
        page: Page,
        sort: SortBy,
    ) -> HistoryPage {
        self.tracker.get_transaction_history(filter, page, sort).await
    }

    /// Rolling-window metrics
    pub async fn get_metrics(&self) -> BridgeMetrics {
        self.tracker.get_metrics().await
    }

    /// Failure breakdown
    pub async fn get_failure_analysis(&self) -> FailureAnalysis {
        self.tracker.get_failure_analysis().await
    }

    /// Stuck transactions (flagged or past the threshold)
    pub async fn get_stuck_transactions(&self) -> Vec<BridgeTransaction> {
        self.tracker.get_stuck_transactions().await
    }

    /// Export tracked transactions
    pub async fn export_data(&self, format: ExportFormat, filter: &HistoryFilter) -> Result<String> {
        self.tracker.export_data(format, filter).await
    }

    /// Translate listener notifications into tracker transitions
    fn spawn_listener_consumer(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let mut rx = self.listener.subscribe();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Listener consumer stopping");
                            break;
                        }
                    }
                    received = rx.recv() => {
                        match received {
                            Ok(notification) => {
                                orchestrator.handle_notification(notification).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Listener consumer lagged, {} events dropped", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    async fn handle_notification(&self, notification: BridgeEventNotification) {
        let key = match notification.event.correlation_key() {
            Some(k) => k.to_string(),
            None => return,
        };
        match notification.kind {
            EventKind::MessageSent => {
                // Source dispatch observed independently: nudge to Processing
                if let Some(tx) = self.tracker.find_by_source_tx(&notification.event.tx_hash).await
                {
                    if tx.status == BridgeTxStatus::Confirmed {
                        let _ = self
                            .apply_update(&tx.id, StatusUpdate::to(BridgeTxStatus::Processing))
                            .await;
                    }
                }
            }
            EventKind::MessageDelivered => {
                let tx = match self.tracker.find_by_correlation_key(&key).await {
                    Some(tx) => tx,
                    None => {
                        debug!("Delivery event without a tracked transaction: {}", key);
                        return;
                    }
                };
                if tx.status.is_terminal() {
                    return;
                }
                let dest = notification.event.tx_hash.clone();
                let executed = StatusUpdate::to(BridgeTxStatus::Executed).with_dest_tx(dest.clone());
                if let Err(e) = self.apply_update(&tx.id, executed).await {
                    warn!("Could not mark {} executed: {}", tx.id, e);
                    return;
                }
                match self
                    .apply_update(&tx.id, StatusUpdate::to(BridgeTxStatus::Completed))
                    .await
                {
                    Ok(_) => {
                        info!("Bridge transaction {} completed via {}", tx.id, dest);
                        let _ = self.events.send(OrchestratorEvent::BridgeCompleted {
                            id: tx.id,
                            dest_tx_hash: dest,
                        });
                    }
                    Err(e) => warn!("Could not complete {}: {}", tx.id, e),
                }
            }
            EventKind::MessageFailed => {
                let tx = match self.tracker.find_by_correlation_key(&key).await {
                    Some(tx) => tx,
                    None => return,
                };
                if tx.status.is_terminal() {
                    return;
                }
                let reason = format!(
                    "destination reported failure in {}",
                    notification.event.tx_hash
                );
                let update = StatusUpdate::to(BridgeTxStatus::Failed)
                    .with_dest_tx(notification.event.tx_hash.clone())
                    .with_error("TX_FAILED", reason.clone());
                if self.apply_update(&tx.id, update).await.is_ok() {
                    let _ = self
                        .events
                        .send(OrchestratorEvent::BridgeFailed { id: tx.id, reason });
                }
            }
        }
    }

    /// Translate tracker alerts into orchestrator events
    fn spawn_alert_consumer(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let mut rx = self.tracker.subscribe_alerts();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Alert consumer stopping");
                            break;
                        }
                    }
                    received = rx.recv() => {
                        match received {
                            Ok(TrackerAlert::StuckTransaction { id, seconds_since_update, .. }) => {
                                let _ = orchestrator.events.send(OrchestratorEvent::StuckTransaction {
                                    id,
                                    seconds_since_update,
                                });
                            }
                            Ok(TrackerAlert::HighFailureRate { failure_rate, .. }) => {
                                let _ = orchestrator.events.send(OrchestratorEvent::HighFailureRate {
                                    failure_rate,
                                });
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::hyperlane::HyperlaneAdapter;
    use crate::config::{AdapterConfig, BridgeConfig, TrackerConfig};
    use crate::registry::default_descriptors;
    use crate::test_utils::{MockChainProvider, MockTokenService};
    use ethers::types::{Address, H256, U256};

    fn params() -> BridgeParams {
        BridgeParams {
            source_chain: Chain::Arbitrum,
            target_chain: Chain::Optimism,
            token: Address::from_low_u64_be(0xAAAA),
            amount: U256::from(1_000_000u64),
            recipient: "0x00000000000000000000000000000000000000bb".into(),
            sender: Address::from_low_u64_be(0xCCCC),
            payload: None,
        }
    }

    async fn orchestrator(provider: Arc<MockChainProvider>) -> Arc<BridgeOrchestrator> {
        let adapter: Arc<dyn BridgeProtocolAdapter> = Arc::new(HyperlaneAdapter::new(
            provider.clone(),
            Arc::new(MockTokenService::new()),
            AdapterConfig::default(),
            [
                (Chain::Arbitrum, Address::from_low_u64_be(0xB1)),
                (Chain::Optimism, Address::from_low_u64_be(0xB2)),
            ]
            .into_iter()
            .collect(),
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
            listener,
        ));
        orchestrator.start().await.unwrap();
        orchestrator
    }

    fn dispatch_log(message_id: [u8; 32]) -> crate::providers::RawLog {
        crate::providers::RawLog {
            address: Address::from_low_u64_be(0xB1),
            topics: vec![
                *crate::adapters::hyperlane::DISPATCH_ID_TOPIC,
                H256::from(message_id),
            ],
            data: Vec::new(),
            tx_hash: String::new(),
            block_number: 0,
            log_index: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_reaches_confirmed_with_correlation() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Arbitrum, Chain::Optimism]));
        provider.queue_receipt_logs(vec![dispatch_log([0x42; 32])]);
        let orchestrator = orchestrator(provider).await;

        let tx = orchestrator
            .execute_bridge("job-1", "hyperlane", &params())
            .await
            .unwrap();
        assert_eq!(tx.status, BridgeTxStatus::Confirmed);
        assert!(tx.source_tx_hash.is_some());
        assert_eq!(
            tx.correlation_key.as_deref(),
            Some(format!("0x{}", hex::encode([0x42; 32])).as_str())
        );
        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_event_completes_transaction() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Arbitrum, Chain::Optimism]));
        provider.queue_receipt_logs(vec![dispatch_log([0x42; 32])]);
        let orchestrator = orchestrator(provider).await;
        let mut events = orchestrator.subscribe();

        orchestrator
            .execute_bridge("job-1", "hyperlane", &params())
            .await
            .unwrap();

        // Destination mailbox processes the message
        let process = crate::providers::RawLog {
            address: Address::from_low_u64_be(0xB2),
            topics: vec![
                *crate::adapters::hyperlane::PROCESS_ID_TOPIC,
                H256::from([0x42; 32]),
            ],
            data: Vec::new(),
            tx_hash: "0xdest".into(),
            block_number: 7,
            log_index: 0,
        };
        orchestrator
            .listener
            .ingest_log("hyperlane", Chain::Optimism, &process)
            .await
            .unwrap();

        // Give the consumer task a turn
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let tx = orchestrator.get_transaction_status("job-1").await.unwrap();
        assert_eq!(tx.status, BridgeTxStatus::Completed);
        assert_eq!(tx.dest_tx_hash.as_deref(), Some("0xdest"));
        assert!(tx.actual_duration_secs.is_some());

        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::BridgeCompleted { id, dest_tx_hash } = event {
                assert_eq!(id, "job-1");
                assert_eq!(dest_tx_hash, "0xdest");
                saw_completed = true;
            }
        }
        assert!(saw_completed);
        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_execution_marks_tracker_failed() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Arbitrum, Chain::Optimism]));
        provider.set_revert_send(1);
        let orchestrator = orchestrator(provider).await;

        let err = orchestrator
            .execute_bridge("job-1", "hyperlane", &params())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Bridge { .. }));

        let tx = orchestrator.get_transaction_status("job-1").await.unwrap();
        assert_eq!(tx.status, BridgeTxStatus::Failed);
        assert_eq!(tx.errors.len(), 1);
        assert_eq!(tx.errors[0].code, "TX_FAILED");
        // The dispatch hash is preserved for manual reconciliation
        assert!(tx.source_tx_hash.is_some());
        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_protocol_rejected() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Arbitrum, Chain::Optimism]));
        let orchestrator = orchestrator(provider).await;
        let err = orchestrator
            .estimate_fee("teleporter", &params())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_recommendation_passthrough() {
        let provider = Arc::new(MockChainProvider::new(vec![Chain::Arbitrum, Chain::Optimism]));
        let orchestrator = orchestrator(provider).await;
        let ranked = orchestrator
            .recommend_protocol(Chain::Ethereum, Chain::Polygon, &RecommendOptions::default())
            .unwrap();
        assert!(!ranked.is_empty());
        orchestrator.shutdown().await.unwrap();
    }
}
