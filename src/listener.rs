//! Cross-chain message listener
//!
//! Spawns one polling loop per configured (protocol, chain) pair, decodes the
//! raw logs with the per-protocol topic tables from `adapters/`, normalizes
//! them into `StandardizedEvent`s and re-broadcasts them as protocol-agnostic
//! notifications. Also serves confirmation waits and the composite
//! source+destination status lookup.
//!
//! Shutdown follows the watch-channel pattern: `stop()` flips the channel,
//! every loop exits on the next tick and in-flight waiters are rejected with
//! `ShuttingDown` instead of being left dangling.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ethers::types::Address;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{axelar, hyperlane, layerzero, wormhole};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeErrorCode, Result};
use crate::providers::{ChainProvider, LogFilter, RawLog, ReceiptStatus};
use crate::types::chain::Chain;
use crate::types::event::{EventKind, StandardizedEvent};

/// One (protocol, chain) pair the listener watches
#[derive(Debug, Clone)]
pub struct ListenTarget {
    /// Protocol whose decoder applies
    pub protocol: String,
    /// Chain to poll
    pub chain: Chain,
    /// Contract addresses to filter on; empty means all
    pub addresses: Vec<Address>,
}

/// Broadcast payload: a normalized event plus its semantic bucket
#[derive(Debug, Clone)]
pub struct BridgeEventNotification {
    /// Semantic bucket
    pub kind: EventKind,
    /// Normalized event
    pub event: StandardizedEvent,
}

/// Composite source+destination view of one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeStatus {
    /// No receipt and no observed events for the hash
    NotFound,
    /// Source transaction reverted, or the destination reported failure
    Failed,
    /// Mined but below the required confirmation depth
    PendingSource {
        confirmations: u64,
        required: u64,
    },
    /// Source settled but no bridge event was emitted (likely not a bridge tx)
    ConfirmedNoBridgeEvent,
    /// Dispatched and in flight, no delivery observed yet
    PendingDestination,
    /// Delivery observed on the destination chain
    Completed {
        dest_tx_hash: String,
    },
}

/// One registered confirmation wait
#[derive(Debug, Clone)]
struct PendingConfirmation {
    tx_hash: String,
    chain: Chain,
    required: u64,
    started_at: DateTime<Utc>,
}

struct EventHistory {
    events: VecDeque<StandardizedEvent>,
    kinds: HashMap<String, EventKind>,
    seen: HashSet<String>,
    max_len: usize,
    max_age_secs: i64,
}

impl EventHistory {
    fn new(max_len: usize, max_age_secs: i64) -> Self {
        Self {
            events: VecDeque::new(),
            kinds: HashMap::new(),
            seen: HashSet::new(),
            max_len,
            max_age_secs,
        }
    }

    /// Insert if unseen; returns false on duplicate ids
    fn insert(&mut self, event: StandardizedEvent, kind: EventKind) -> bool {
        if !self.seen.insert(event.id.clone()) {
            return false;
        }
        self.kinds.insert(event.id.clone(), kind);
        self.events.push_back(event);
        self.prune(Utc::now());
        true
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(self.max_age_secs);
        while self.events.len() > self.max_len
            || self
                .events
                .front()
                .map(|e| e.timestamp < cutoff)
                .unwrap_or(false)
        {
            if let Some(old) = self.events.pop_front() {
                self.seen.remove(&old.id);
                self.kinds.remove(&old.id);
            } else {
                break;
            }
        }
    }

    fn kind_of(&self, event: &StandardizedEvent) -> Option<EventKind> {
        self.kinds.get(&event.id).copied()
    }
}

/// Listener over per-protocol bridge events
pub struct MessageListener {
    provider: Arc<dyn ChainProvider>,
    config: BridgeConfig,
    targets: Vec<ListenTarget>,
    events: broadcast::Sender<BridgeEventNotification>,
    history: Arc<RwLock<EventHistory>>,
    pending: Arc<Mutex<HashMap<Uuid, PendingConfirmation>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MessageListener {
    /// Listener for the given targets; nothing runs until `start()`
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        config: BridgeConfig,
        targets: Vec<ListenTarget>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let history = EventHistory::new(
            config.listener.event_history_max_len,
            config.listener.event_history_max_age_secs,
        );
        Self {
            provider,
            config,
            targets,
            events,
            history: Arc::new(RwLock::new(history)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Subscribe to normalized event notifications
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEventNotification> {
        self.events.subscribe()
    }

    /// Spawn one polling loop per target
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for target in self.targets.clone() {
            let listener = Arc::clone(self);
            let mut shutdown = self.shutdown_rx.clone();
            let interval = self.config.poll_interval(target.chain);
            tokio::spawn(async move {
                info!(
                    "Listener loop started: {} on {} (every {:?})",
                    target.protocol, target.chain, interval
                );
                let mut last_block: Option<u64> = None;
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("Listener loop stopping: {} on {}", target.protocol, target.chain);
                                break;
                            }
                        }
                        _ = ticker.tick() => {
                            if let Err(e) = listener.poll_target(&target, &mut last_block).await {
                                warn!(
                                    "Listener poll failed for {} on {}: {}",
                                    target.protocol, target.chain, e
                                );
                            }
                        }
                    }
                }
            });
        }
        Ok(())
    }

    /// Stop every loop and reject in-flight waiters
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let pending = {
            let mut map = self.pending.lock().await;
            std::mem::take(&mut *map)
        };
        for waiter in pending.values() {
            warn!(
                "Rejecting confirmation wait for {} on {} (required {}, started {})",
                waiter.tx_hash, waiter.chain, waiter.required, waiter.started_at
            );
        }
    }

    /// One polling pass: fetch new logs since the last scanned block, with
    /// bounded read retries, and ingest whatever decodes.
    async fn poll_target(&self, target: &ListenTarget, last_block: &mut Option<u64>) -> Result<()> {
        let head = self.read_with_retry(|| self.provider.get_block_number(target.chain)).await?;
        let from = match *last_block {
            Some(b) if b < head => b + 1,
            Some(_) => return Ok(()),
            // First pass: start at the current head, not from genesis
            None => head,
        };
        let filter = LogFilter {
            addresses: target.addresses.clone(),
            topics0: Vec::new(),
            from_block: from,
            to_block: Some(head),
        };
        let logs = self
            .read_with_retry(|| self.provider.get_logs(target.chain, &filter))
            .await?;
        *last_block = Some(head);
        for log in logs {
            self.ingest_log(&target.protocol, target.chain, &log).await;
        }
        Ok(())
    }

    async fn read_with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempts = 0u32;
        let mut backoff =
            std::time::Duration::from_millis(self.config.listener.read_retry_backoff_ms);
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempts < self.config.listener.max_read_retries => {
                    attempts += 1;
                    debug!("Listener read retry {}: {}", attempts, e);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(std::time::Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Decode and record one raw log. Re-ingesting the same log is a no-op
    /// thanks to the deterministic event id. Returns the notification when
    /// the log decoded and was new.
    pub async fn ingest_log(
        &self,
        protocol: &str,
        chain: Chain,
        log: &RawLog,
    ) -> Option<BridgeEventNotification> {
        let (kind, event_name, correlation_key) = decode_log(protocol, chain, log)?;
        let event = StandardizedEvent {
            id: StandardizedEvent::make_id(chain, &log.tx_hash, log.log_index),
            protocol: protocol.to_string(),
            chain,
            event_name: event_name.to_string(),
            tx_hash: log.tx_hash.clone(),
            block_number: log.block_number,
            log_index: log.log_index,
            timestamp: Utc::now(),
            data: match &correlation_key {
                Some(key) => serde_json::json!({ "correlation_key": key }),
                None => serde_json::Value::Null,
            },
        };

        let fresh = self.history.write().await.insert(event.clone(), kind);
        if !fresh {
            debug!("Duplicate event ignored: {}", event.id);
            return None;
        }
        debug!(
            "Bridge event: {} {} on {} ({})",
            protocol, event_name, chain, event.id
        );
        let notification = BridgeEventNotification { kind, event };
        let _ = self.events.send(notification.clone());
        Some(notification)
    }

    /// Recorded events, newest last
    pub async fn recent_events(&self) -> Vec<StandardizedEvent> {
        self.history.read().await.events.iter().cloned().collect()
    }

    /// Wait until `tx_hash` has `required` confirmations on `chain`.
    ///
    /// Resolves with the observed confirmation count, rejects with
    /// `Bridge{TxFailed}` if the chain reports a revert, with `Timeout` at the
    /// deadline, and with `ShuttingDown` when `stop()` wins the race.
    pub async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        chain: Chain,
        required: u64,
        timeout: std::time::Duration,
    ) -> Result<u64> {
        if *self.shutdown_rx.borrow() {
            return Err(BridgeError::ShuttingDown);
        }
        let handle = Uuid::new_v4();
        {
            self.pending.lock().await.insert(
                handle,
                PendingConfirmation {
                    tx_hash: tx_hash.to_string(),
                    chain,
                    required,
                    started_at: Utc::now(),
                },
            );
        }
        let result = self
            .wait_for_confirmation_inner(tx_hash, chain, required, timeout)
            .await;
        self.pending.lock().await.remove(&handle);
        result
    }

    async fn wait_for_confirmation_inner(
        &self,
        tx_hash: &str,
        chain: Chain,
        required: u64,
        timeout: std::time::Duration,
    ) -> Result<u64> {
        let mut shutdown = self.shutdown_rx.clone();
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;
        let poll =
            std::time::Duration::from_millis(self.config.listener.confirmation_poll_interval_ms);

        loop {
            if let Some(receipt) = self
                .read_with_retry(|| self.provider.get_transaction_receipt(chain, tx_hash))
                .await?
            {
                if receipt.status == ReceiptStatus::Reverted {
                    return Err(BridgeError::bridge_with_tx(
                        BridgeErrorCode::TxFailed,
                        "listener",
                        format!("transaction reverted on {}", chain),
                        tx_hash,
                    ));
                }
                let head = self
                    .read_with_retry(|| self.provider.get_block_number(chain))
                    .await?;
                let confirmations = head.saturating_sub(receipt.block_number) + 1;
                if confirmations >= required {
                    debug!(
                        "{} reached {} confirmations on {}",
                        tx_hash, confirmations, chain
                    );
                    return Ok(confirmations);
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(BridgeError::Timeout {
                    tx_hash: tx_hash.to_string(),
                    chain,
                    waited_secs: (now - started).as_secs(),
                });
            }
            let sleep = poll.min(deadline - now);
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Err(BridgeError::ShuttingDown);
                    }
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }

    /// Currently registered confirmation waits
    pub async fn pending_confirmations(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Composite view of one transfer: source receipt state plus correlated
    /// sent/delivered/failed events from the history.
    pub async fn get_bridge_status(&self, tx_hash: &str, source_chain: Chain) -> Result<BridgeStatus> {
        let receipt = self
            .read_with_retry(|| self.provider.get_transaction_receipt(source_chain, tx_hash))
            .await?;
        let receipt = match receipt {
            Some(r) => r,
            None => return Ok(BridgeStatus::NotFound),
        };
        if receipt.status == ReceiptStatus::Reverted {
            return Ok(BridgeStatus::Failed);
        }

        let required = self.config.confirmations(source_chain);
        let head = self
            .read_with_retry(|| self.provider.get_block_number(source_chain))
            .await?;
        let confirmations = head.saturating_sub(receipt.block_number) + 1;
        if confirmations < required {
            return Ok(BridgeStatus::PendingSource {
                confirmations,
                required,
            });
        }

        let history = self.history.read().await;
        let sent = history.events.iter().find(|e| {
            e.tx_hash == tx_hash && history.kind_of(e) == Some(EventKind::MessageSent)
        });
        let sent_key = match sent.and_then(|e| e.correlation_key()) {
            Some(key) => key.to_string(),
            None => return Ok(BridgeStatus::ConfirmedNoBridgeEvent),
        };

        for event in history.events.iter() {
            if event.correlation_key() != Some(sent_key.as_str()) || event.tx_hash == tx_hash {
                continue;
            }
            match history.kind_of(event) {
                Some(EventKind::MessageDelivered) => {
                    return Ok(BridgeStatus::Completed {
                        dest_tx_hash: event.tx_hash.clone(),
                    })
                }
                Some(EventKind::MessageFailed) => return Ok(BridgeStatus::Failed),
                _ => {}
            }
        }
        Ok(BridgeStatus::PendingDestination)
    }
}

/// Per-protocol log decoder: semantic bucket, native event name, correlation
/// key. Returns `None` for logs that are not bridge events of the protocol.
fn decode_log(
    protocol: &str,
    chain: Chain,
    log: &RawLog,
) -> Option<(EventKind, &'static str, Option<String>)> {
    let topic0 = log.topics.first()?;
    match protocol {
        "layerzero" => {
            if *topic0 == *layerzero::PACKET_SENT_TOPIC {
                Some((EventKind::MessageSent, "PacketSent", layerzero::parse_packet_guid(log)))
            } else if *topic0 == *layerzero::PACKET_DELIVERED_TOPIC {
                Some((
                    EventKind::MessageDelivered,
                    "PacketDelivered",
                    layerzero::parse_delivery_guid(log),
                ))
            } else if *topic0 == *layerzero::LZ_RECEIVE_ALERT_TOPIC {
                Some((
                    EventKind::MessageFailed,
                    "LzReceiveAlert",
                    layerzero::parse_delivery_guid(log),
                ))
            } else {
                None
            }
        }
        "wormhole" => {
            if *topic0 == *wormhole::LOG_MESSAGE_PUBLISHED_TOPIC {
                Some((
                    EventKind::MessageSent,
                    "LogMessagePublished",
                    wormhole::parse_published_key(chain, log),
                ))
            } else if *topic0 == *wormhole::TRANSFER_REDEEMED_TOPIC {
                Some((
                    EventKind::MessageDelivered,
                    "TransferRedeemed",
                    wormhole::parse_redeemed_key(log),
                ))
            } else {
                None
            }
        }
        "axelar" => {
            if *topic0 == *axelar::CONTRACT_CALL_WITH_TOKEN_TOPIC {
                Some((
                    EventKind::MessageSent,
                    "ContractCallWithToken",
                    axelar::parse_call_key(log),
                ))
            } else if *topic0 == *axelar::EXECUTED_TOPIC {
                Some((EventKind::MessageDelivered, "Executed", axelar::parse_executed_key(log)))
            } else if *topic0 == *axelar::EXECUTION_FAILED_TOPIC {
                Some((
                    EventKind::MessageFailed,
                    "ExecutionFailed",
                    axelar::parse_executed_key(log),
                ))
            } else {
                None
            }
        }
        "hyperlane" => {
            if *topic0 == *hyperlane::DISPATCH_ID_TOPIC {
                Some((EventKind::MessageSent, "DispatchId", hyperlane::parse_message_id(log)))
            } else if *topic0 == *hyperlane::PROCESS_ID_TOPIC {
                Some((
                    EventKind::MessageDelivered,
                    "ProcessId",
                    hyperlane::parse_message_id(log),
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}
