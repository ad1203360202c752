//! Transaction tracker
//!
//! Theo dõi vòng đời của mọi giao dịch bridge:
//! - Owns every `BridgeTransaction` record and its status history
//! - Enforces the lifecycle state machine on each update
//! - Secondary indices by status, protocol and source chain
//! - Background tasks: retention cleanup, stuck detection, metrics rollup
//! - Advisory alerts over a broadcast channel
//!
//! All mutation happens inside one `RwLock`'d inner state, so the indices can
//! never diverge from the primary map and per-id updates are serialized.

pub mod export;
pub mod metrics;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{BridgeError, Result};
use crate::types::chain::Chain;
use crate::types::transaction::{BridgeTransaction, BridgeTxStatus, StatusEntry, TxErrorEntry};

use self::metrics::{BridgeMetrics, FailureAnalysis, MetricsStore, TerminalEvent};

/// Request to register a new transaction with the tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRequest {
    /// Caller-assigned unique id
    pub id: String,
    /// Protocol carrying the transfer
    pub protocol: String,
    /// Source blockchain
    pub source_chain: Chain,
    /// Target blockchain
    pub target_chain: Chain,
    /// Token symbol or address
    pub token: String,
    /// Amount (decimal string, smallest unit)
    pub amount: String,
    /// Receiver on the target chain
    pub recipient: String,
    /// Sender on the source chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// Proposed transition plus side data merged into the record when accepted
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    /// Target status
    pub status: Option<BridgeTxStatus>,
    /// Source dispatch hash (set once)
    pub source_tx_hash: Option<String>,
    /// Destination delivery hash (set once)
    pub dest_tx_hash: Option<String>,
    /// Protocol correlation key (set once)
    pub correlation_key: Option<String>,
    /// Quoted fee (decimal string)
    pub estimated_fee: Option<String>,
    /// Fee actually paid (decimal string)
    pub actual_fee: Option<String>,
    /// Gas used by the dispatch (decimal string)
    pub gas_used: Option<String>,
    /// Error to append: (code, message)
    pub error: Option<(String, String)>,
    /// Free-form side data stored on the history entry
    pub data: serde_json::Value,
}

impl StatusUpdate {
    /// Plain transition to `status`
    pub fn to(status: BridgeTxStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Side-data-only update that leaves the status alone
    pub fn side_data() -> Self {
        Self::default()
    }

    pub fn with_source_tx(mut self, hash: impl Into<String>) -> Self {
        self.source_tx_hash = Some(hash.into());
        self
    }

    pub fn with_dest_tx(mut self, hash: impl Into<String>) -> Self {
        self.dest_tx_hash = Some(hash.into());
        self
    }

    pub fn with_correlation_key(mut self, key: impl Into<String>) -> Self {
        self.correlation_key = Some(key.into());
        self
    }

    pub fn with_estimated_fee(mut self, fee: impl Into<String>) -> Self {
        self.estimated_fee = Some(fee.into());
        self
    }

    pub fn with_gas_used(mut self, gas: impl Into<String>) -> Self {
        self.gas_used = Some(gas.into());
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some((code.into(), message.into()));
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Filter for `get_transaction_history`
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub protocol: Option<String>,
    pub status: Option<BridgeTxStatus>,
    pub source_chain: Option<Chain>,
    pub target_chain: Option<Chain>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    fn matches(&self, tx: &BridgeTransaction) -> bool {
        if let Some(p) = &self.protocol {
            if &tx.protocol != p {
                return false;
            }
        }
        if let Some(s) = self.status {
            if tx.status != s {
                return false;
            }
        }
        if let Some(c) = self.source_chain {
            if tx.source_chain != c {
                return false;
            }
        }
        if let Some(c) = self.target_chain {
            if tx.target_chain != c {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if tx.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if tx.created_at > before {
                return false;
            }
        }
        true
    }
}

/// History sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Newest first (default)
    #[default]
    CreatedAtDesc,
    /// Oldest first
    CreatedAtAsc,
    /// Most recently touched first
    UpdatedAtDesc,
}

/// Pagination window
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// One page of history results
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Matching transactions in the requested window
    pub items: Vec<BridgeTransaction>,
    /// Total matches before pagination
    pub total: usize,
}

/// Advisory alerts emitted by the tracker's background tasks
#[derive(Debug, Clone)]
pub enum TrackerAlert {
    /// A transaction crossed the stuck threshold
    StuckTransaction {
        id: String,
        protocol: String,
        seconds_since_update: i64,
    },
    /// Rolling failure rate crossed the configured threshold
    HighFailureRate { failure_rate: f64, window_secs: i64 },
}

struct TrackerInner {
    transactions: HashMap<String, BridgeTransaction>,
    by_status: HashMap<BridgeTxStatus, HashSet<String>>,
    by_protocol: HashMap<String, HashSet<String>>,
    by_source_chain: HashMap<Chain, HashSet<String>>,
    by_correlation: HashMap<String, String>,
    metrics: MetricsStore,
}

impl TrackerInner {
    fn new(config: &TrackerConfig) -> Self {
        let by_status = BridgeTxStatus::all()
            .into_iter()
            .map(|s| (s, HashSet::new()))
            .collect();
        Self {
            transactions: HashMap::new(),
            by_status,
            by_protocol: HashMap::new(),
            by_source_chain: HashMap::new(),
            by_correlation: HashMap::new(),
            metrics: MetricsStore::new(
                config.metrics_hourly_retention,
                config.metrics_daily_retention,
            ),
        }
    }

    fn index(&mut self, tx: &BridgeTransaction) {
        self.by_status
            .entry(tx.status)
            .or_default()
            .insert(tx.id.clone());
        self.by_protocol
            .entry(tx.protocol.clone())
            .or_default()
            .insert(tx.id.clone());
        self.by_source_chain
            .entry(tx.source_chain)
            .or_default()
            .insert(tx.id.clone());
        if let Some(key) = &tx.correlation_key {
            self.by_correlation.insert(key.clone(), tx.id.clone());
        }
    }

    fn unindex(&mut self, tx: &BridgeTransaction) {
        if let Some(set) = self.by_status.get_mut(&tx.status) {
            set.remove(&tx.id);
        }
        if let Some(set) = self.by_protocol.get_mut(&tx.protocol) {
            set.remove(&tx.id);
        }
        if let Some(set) = self.by_source_chain.get_mut(&tx.source_chain) {
            set.remove(&tx.id);
        }
        if let Some(key) = &tx.correlation_key {
            self.by_correlation.remove(key);
        }
    }
}

/// Lifecycle tracker for bridge transactions
pub struct TransactionTracker {
    inner: Arc<RwLock<TrackerInner>>,
    config: TrackerConfig,
    alerts: broadcast::Sender<TrackerAlert>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TransactionTracker {
    /// Tracker with no background tasks running yet
    pub fn new(config: TrackerConfig) -> Self {
        let (alerts, _) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(RwLock::new(TrackerInner::new(&config))),
            config,
            alerts,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Subscribe to advisory alerts
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<TrackerAlert> {
        self.alerts.subscribe()
    }

    /// Register a new transaction. Rejects duplicate ids and malformed
    /// requests before touching any state.
    pub async fn start_tracking(&self, request: TrackRequest) -> Result<BridgeTransaction> {
        Self::validate_request(&request)?;

        let mut inner = self.inner.write().await;
        if inner.transactions.contains_key(&request.id) {
            return Err(BridgeError::AlreadyTracked(request.id));
        }

        let tx = BridgeTransaction::new(
            request.id.clone(),
            request.protocol,
            request.source_chain,
            request.target_chain,
            request.token,
            request.amount,
            request.recipient,
            request.sender,
        );
        inner.index(&tx);
        inner.transactions.insert(tx.id.clone(), tx.clone());
        ::metrics::increment_counter!("bridge_transactions_tracked");
        info!("Tracking new bridge transaction: {}", tx);
        Ok(tx)
    }

    fn validate_request(request: &TrackRequest) -> Result<()> {
        if request.id.trim().is_empty() {
            return Err(BridgeError::Validation("transaction id is empty".into()));
        }
        if request.protocol.trim().is_empty() {
            return Err(BridgeError::Validation("protocol is empty".into()));
        }
        if request.source_chain == request.target_chain {
            return Err(BridgeError::Validation(format!(
                "source and target chain are both {}",
                request.source_chain
            )));
        }
        if request.amount.is_empty() || !request.amount.chars().all(|c| c.is_ascii_digit()) {
            return Err(BridgeError::Validation(format!(
                "amount must be a decimal string, got {:?}",
                request.amount
            )));
        }
        if request.recipient.trim().is_empty() {
            return Err(BridgeError::Validation("recipient is empty".into()));
        }
        Ok(())
    }

    /// Apply a proposed transition. Appends a history entry on actual status
    /// change; a same-status update is an idempotent side-data merge. Terminal
    /// statuses are frozen.
    pub async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<BridgeTransaction> {
        let mut inner = self.inner.write().await;
        let current = inner
            .transactions
            .get(id)
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))?
            .clone();

        let next = update.status.unwrap_or(current.status);
        if !current.status.can_transition_to(next) {
            warn!(
                "Rejected status transition for {}: {} -> {}",
                id, current.status, next
            );
            return Err(BridgeError::InvalidStatus {
                id: id.to_string(),
                from: current.status.to_string(),
                to: next.to_string(),
            });
        }

        inner.unindex(&current);
        let mut tx = current;
        let now = Utc::now();
        let status_changed = next != tx.status;

        if status_changed {
            tx.status = next;
            tx.status_history.push(StatusEntry {
                status: next,
                timestamp: now,
                data: update.data.clone(),
            });
            debug!("Bridge transaction {} -> {}", id, next);
        }

        // Set-once timestamps per milestone
        match next {
            BridgeTxStatus::Initiated if tx.initiated_at.is_none() => tx.initiated_at = Some(now),
            BridgeTxStatus::Confirmed if tx.confirmed_at.is_none() => tx.confirmed_at = Some(now),
            BridgeTxStatus::Completed if tx.completed_at.is_none() => tx.completed_at = Some(now),
            _ => {}
        }

        if let Some(hash) = update.source_tx_hash {
            tx.source_tx_hash.get_or_insert(hash);
        }
        if let Some(hash) = update.dest_tx_hash {
            tx.dest_tx_hash.get_or_insert(hash);
        }
        if let Some(key) = update.correlation_key {
            tx.correlation_key.get_or_insert(key);
        }
        if let Some(fee) = update.estimated_fee {
            tx.estimated_fee = Some(fee);
        }
        if let Some(fee) = update.actual_fee {
            tx.actual_fee = Some(fee);
        }
        if let Some(gas) = update.gas_used {
            tx.gas_used = Some(gas);
        }
        let mut last_error_code = None;
        if let Some((code, message)) = update.error {
            last_error_code = Some(code.clone());
            tx.errors.push(TxErrorEntry {
                timestamp: now,
                code,
                message,
            });
        }
        tx.updated_at = now;

        if status_changed && next.is_terminal() {
            let duration = (now - tx.created_at).num_seconds();
            tx.actual_duration_secs = Some(duration);
            inner.metrics.record(TerminalEvent {
                at: now,
                protocol: tx.protocol.clone(),
                source_chain: tx.source_chain,
                status: next,
                duration_secs: duration,
                error_code: last_error_code.or_else(|| tx.errors.last().map(|e| e.code.clone())),
            });
            match next {
                BridgeTxStatus::Completed => {
                    ::metrics::increment_counter!("bridge_transactions_completed")
                }
                BridgeTxStatus::Failed => {
                    ::metrics::increment_counter!("bridge_transactions_failed")
                }
                BridgeTxStatus::Cancelled => {
                    ::metrics::increment_counter!("bridge_transactions_cancelled")
                }
                _ => {}
            }
            info!(
                "Bridge transaction {} reached terminal status {} after {}s",
                id, next, duration
            );
        }

        inner.index(&tx);
        inner.transactions.insert(id.to_string(), tx.clone());
        Ok(tx)
    }

    /// Lookup by id
    pub async fn get_transaction(&self, id: &str) -> Result<BridgeTransaction> {
        self.inner
            .read()
            .await
            .transactions
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    /// Lookup by protocol correlation key
    pub async fn find_by_correlation_key(&self, key: &str) -> Option<BridgeTransaction> {
        let inner = self.inner.read().await;
        inner
            .by_correlation
            .get(key)
            .and_then(|id| inner.transactions.get(id))
            .cloned()
    }

    /// Lookup by source dispatch hash (linear scan; hashes are not indexed)
    pub async fn find_by_source_tx(&self, tx_hash: &str) -> Option<BridgeTransaction> {
        let inner = self.inner.read().await;
        inner
            .transactions
            .values()
            .find(|tx| tx.source_tx_hash.as_deref() == Some(tx_hash))
            .cloned()
    }

    /// Filtered, sorted, paginated history
    pub async fn get_transaction_history(
        &self,
        filter: &HistoryFilter,
        page: Page,
        sort: SortBy,
    ) -> HistoryPage {
        let inner = self.inner.read().await;
        let mut matches: Vec<BridgeTransaction> = inner
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        match sort {
            SortBy::CreatedAtDesc => matches.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortBy::CreatedAtAsc => matches.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortBy::UpdatedAtDesc => matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        HistoryPage { items, total }
    }

    /// All non-terminal transactions
    pub async fn get_active_transactions(&self) -> Vec<BridgeTransaction> {
        let inner = self.inner.read().await;
        inner
            .transactions
            .values()
            .filter(|tx| !tx.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Transactions flagged `Stuck` or quietly past the stuck threshold
    pub async fn get_stuck_transactions(&self) -> Vec<BridgeTransaction> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        inner
            .transactions
            .values()
            .filter(|tx| {
                tx.status == BridgeTxStatus::Stuck
                    || tx.is_stuck(self.config.stuck_threshold_secs, now)
            })
            .cloned()
            .collect()
    }

    /// Failure breakdown over the rolling window
    pub async fn get_failure_analysis(&self) -> FailureAnalysis {
        self.inner.read().await.metrics.failure_analysis(Utc::now())
    }

    /// Rolling-window metrics snapshot
    pub async fn get_metrics(&self) -> BridgeMetrics {
        let inner = self.inner.read().await;
        let snapshot = inner.metrics.snapshot(Utc::now());
        ::metrics::gauge!(
            "bridge_active_transactions",
            inner
                .transactions
                .values()
                .filter(|tx| !tx.status.is_terminal())
                .count() as f64
        );
        snapshot
    }

    /// Spawn the background maintenance tasks. Call once; tasks stop when
    /// `shutdown()` flips the watch channel.
    pub fn start_background_tasks(self: &Arc<Self>) {
        self.spawn_cleanup_task();
        self.spawn_stuck_scan_task();
        self.spawn_rollup_task();
        info!("Tracker background tasks started");
    }

    /// Stop background tasks
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Tracker shutting down");
    }

    fn spawn_cleanup_task(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                tracker.config.cleanup_interval_secs,
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Cleanup task stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        tracker.cleanup_once().await;
                    }
                }
            }
        });
    }

    /// Delete terminal transactions past retention, in bounded batches with a
    /// yield between batches so the lock is not held across the whole sweep.
    pub async fn cleanup_once(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.retention_secs);
        let mut removed_total = 0;
        loop {
            let mut inner = self.inner.write().await;
            let batch: Vec<String> = inner
                .transactions
                .values()
                .filter(|tx| tx.status.is_terminal() && tx.updated_at < cutoff)
                .take(self.config.cleanup_batch_size)
                .map(|tx| tx.id.clone())
                .collect();
            if batch.is_empty() {
                break;
            }
            for id in &batch {
                if let Some(tx) = inner.transactions.remove(id) {
                    inner.unindex(&tx);
                    removed_total += 1;
                }
            }
            let full_batch = batch.len() == self.config.cleanup_batch_size;
            drop(inner);
            if !full_batch {
                break;
            }
            tokio::task::yield_now().await;
        }
        if removed_total > 0 {
            info!("Cleanup removed {} expired bridge transactions", removed_total);
        }
        removed_total
    }

    fn spawn_stuck_scan_task(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                tracker.config.stuck_scan_interval_secs,
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Stuck-scan task stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        tracker.stuck_scan_once().await;
                    }
                }
            }
        });
    }

    /// One stuck-detection pass: promote qualifying transactions to `Stuck`
    /// and emit alerts. Also checks the rolling failure rate.
    pub async fn stuck_scan_once(&self) {
        let now = Utc::now();
        let candidates: Vec<(String, String, i64)> = {
            let inner = self.inner.read().await;
            inner
                .transactions
                .values()
                .filter(|tx| {
                    tx.status != BridgeTxStatus::Stuck
                        && tx.is_stuck(self.config.stuck_threshold_secs, now)
                })
                .map(|tx| {
                    (
                        tx.id.clone(),
                        tx.protocol.clone(),
                        tx.seconds_since_update(now),
                    )
                })
                .collect()
        };

        for (id, protocol, age) in candidates {
            // The transaction may have moved on between the scan and this
            // update; an InvalidStatus rejection here is fine.
            match self.update_status(&id, StatusUpdate::to(BridgeTxStatus::Stuck)).await {
                Ok(_) => {
                    warn!("Bridge transaction {} is stuck ({}s without update)", id, age);
                    ::metrics::increment_counter!("bridge_transactions_stuck");
                    let _ = self.alerts.send(TrackerAlert::StuckTransaction {
                        id,
                        protocol,
                        seconds_since_update: age,
                    });
                }
                Err(e) => debug!("Skipped stuck promotion for {}: {}", id, e),
            }
        }

        let analysis = self.get_failure_analysis().await;
        if analysis.total_terminal > 0
            && analysis.failure_rate >= self.config.failure_rate_alert_threshold
        {
            warn!(
                "Bridge failure rate {:.0}% over the last {}s",
                analysis.failure_rate * 100.0,
                analysis.window_secs
            );
            let _ = self.alerts.send(TrackerAlert::HighFailureRate {
                failure_rate: analysis.failure_rate,
                window_secs: analysis.window_secs,
            });
        }
    }

    fn spawn_rollup_task(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                tracker.config.rollup_interval_secs,
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Rollup task stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        tracker.inner.write().await.metrics.prune(Utc::now());
                    }
                }
            }
        });
    }

    /// Snapshot of every record, for export
    pub async fn all_transactions(&self) -> Vec<BridgeTransaction> {
        self.inner.read().await.transactions.values().cloned().collect()
    }

    /// Merge previously exported records back in. Existing ids are left
    /// untouched; returns the number of records imported.
    pub async fn import_transactions(&self, transactions: Vec<BridgeTransaction>) -> usize {
        let mut inner = self.inner.write().await;
        let mut imported = 0;
        for tx in transactions {
            if inner.transactions.contains_key(&tx.id) {
                continue;
            }
            inner.index(&tx);
            inner.transactions.insert(tx.id.clone(), tx);
            imported += 1;
        }
        if imported > 0 {
            info!("Imported {} bridge transactions", imported);
        }
        imported
    }
}
