//! Tracker metrics aggregation
//!
//! Terminal outcomes are folded into a rolling 24h window plus bounded hourly
//! and daily buckets. Everything here is plain data guarded by the tracker's
//! lock; the `metrics` crate counters are emitted at the recording sites in
//! the tracker itself.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::types::chain::Chain;
use crate::types::transaction::BridgeTxStatus;

/// One terminal outcome, kept for the rolling window
#[derive(Debug, Clone)]
pub(crate) struct TerminalEvent {
    pub at: DateTime<Utc>,
    pub protocol: String,
    pub source_chain: Chain,
    pub status: BridgeTxStatus,
    pub duration_secs: i64,
    pub error_code: Option<String>,
}

/// Aggregated counts for one time bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricBucket {
    /// Bucket start (hour or day boundary)
    pub start: DateTime<Utc>,
    /// Transfers that reached `Completed`
    pub completed: u64,
    /// Transfers that reached `Failed`
    pub failed: u64,
    /// Transfers that reached `Cancelled`
    pub cancelled: u64,
    /// Sum of terminal durations, for averaging
    pub total_duration_secs: i64,
}

impl MetricBucket {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            completed: 0,
            failed: 0,
            cancelled: 0,
            total_duration_secs: 0,
        }
    }

    fn record(&mut self, status: BridgeTxStatus, duration_secs: i64) {
        match status {
            BridgeTxStatus::Completed => self.completed += 1,
            BridgeTxStatus::Failed => self.failed += 1,
            BridgeTxStatus::Cancelled => self.cancelled += 1,
            _ => {}
        }
        self.total_duration_secs += duration_secs;
    }
}

/// Per-protocol or per-chain slice of the rolling window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceMetrics {
    /// Completed in the window
    pub completed: u64,
    /// Failed in the window
    pub failed: u64,
    /// Cancelled in the window
    pub cancelled: u64,
    /// Mean creation-to-terminal duration in seconds
    pub avg_duration_secs: f64,
}

/// Rolling-window snapshot returned by `get_metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMetrics {
    /// Window size in seconds (24h)
    pub window_secs: i64,
    /// Totals across all protocols and chains
    pub totals: SliceMetrics,
    /// Per-protocol breakdown
    pub per_protocol: HashMap<String, SliceMetrics>,
    /// Per-source-chain breakdown
    pub per_chain: HashMap<Chain, SliceMetrics>,
    /// Retained hourly buckets, oldest first
    pub hourly: Vec<MetricBucket>,
    /// Retained daily buckets, oldest first
    pub daily: Vec<MetricBucket>,
}

/// Failure breakdown returned by `get_failure_analysis`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureAnalysis {
    /// Window size in seconds (24h)
    pub window_secs: i64,
    /// Terminal outcomes observed in the window
    pub total_terminal: u64,
    /// Failures observed in the window
    pub total_failed: u64,
    /// `total_failed / total_terminal`, 0.0 when the window is empty
    pub failure_rate: f64,
    /// Failures keyed by error code
    pub by_error_code: HashMap<String, u64>,
    /// Failures keyed by protocol
    pub by_protocol: HashMap<String, u64>,
}

fn window() -> Duration {
    Duration::hours(24)
}

/// In-memory metric accumulator, owned by the tracker's inner state
pub(crate) struct MetricsStore {
    events: VecDeque<TerminalEvent>,
    hourly: VecDeque<MetricBucket>,
    daily: VecDeque<MetricBucket>,
    hourly_retention: usize,
    daily_retention: usize,
}

impl MetricsStore {
    pub fn new(hourly_retention: usize, daily_retention: usize) -> Self {
        Self {
            events: VecDeque::new(),
            hourly: VecDeque::new(),
            daily: VecDeque::new(),
            hourly_retention,
            daily_retention,
        }
    }

    /// Record one terminal outcome
    pub fn record(&mut self, event: TerminalEvent) {
        let hour = event
            .at
            .duration_trunc(Duration::hours(1))
            .unwrap_or(event.at);
        let day = event
            .at
            .duration_trunc(Duration::days(1))
            .unwrap_or(event.at);

        if self.hourly.back().map(|b| b.start) != Some(hour) {
            self.hourly.push_back(MetricBucket::new(hour));
        }
        if self.daily.back().map(|b| b.start) != Some(day) {
            self.daily.push_back(MetricBucket::new(day));
        }
        if let Some(bucket) = self.hourly.back_mut() {
            bucket.record(event.status, event.duration_secs);
        }
        if let Some(bucket) = self.daily.back_mut() {
            bucket.record(event.status, event.duration_secs);
        }
        self.events.push_back(event);
    }

    /// Drop events outside the rolling window and buckets past retention
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - window();
        while self.events.front().map(|e| e.at < cutoff).unwrap_or(false) {
            self.events.pop_front();
        }
        while self.hourly.len() > self.hourly_retention {
            self.hourly.pop_front();
        }
        while self.daily.len() > self.daily_retention {
            self.daily.pop_front();
        }
    }

    fn window_events(&self, now: DateTime<Utc>) -> impl Iterator<Item = &TerminalEvent> {
        let cutoff = now - window();
        self.events.iter().filter(move |e| e.at >= cutoff)
    }

    /// Rolling-window snapshot
    pub fn snapshot(&self, now: DateTime<Utc>) -> BridgeMetrics {
        let mut totals = Accumulator::default();
        let mut per_protocol: HashMap<String, Accumulator> = HashMap::new();
        let mut per_chain: HashMap<Chain, Accumulator> = HashMap::new();

        for event in self.window_events(now) {
            totals.add(event);
            per_protocol
                .entry(event.protocol.clone())
                .or_default()
                .add(event);
            per_chain.entry(event.source_chain).or_default().add(event);
        }

        BridgeMetrics {
            window_secs: window().num_seconds(),
            totals: totals.finish(),
            per_protocol: per_protocol
                .into_iter()
                .map(|(k, v)| (k, v.finish()))
                .collect(),
            per_chain: per_chain.into_iter().map(|(k, v)| (k, v.finish())).collect(),
            hourly: self.hourly.iter().cloned().collect(),
            daily: self.daily.iter().cloned().collect(),
        }
    }

    /// Failure breakdown over the rolling window
    pub fn failure_analysis(&self, now: DateTime<Utc>) -> FailureAnalysis {
        let mut total_terminal = 0u64;
        let mut total_failed = 0u64;
        let mut by_error_code: HashMap<String, u64> = HashMap::new();
        let mut by_protocol: HashMap<String, u64> = HashMap::new();

        for event in self.window_events(now) {
            total_terminal += 1;
            if event.status == BridgeTxStatus::Failed {
                total_failed += 1;
                let code = event
                    .error_code
                    .clone()
                    .unwrap_or_else(|| "UNKNOWN".to_string());
                *by_error_code.entry(code).or_default() += 1;
                *by_protocol.entry(event.protocol.clone()).or_default() += 1;
            }
        }

        FailureAnalysis {
            window_secs: window().num_seconds(),
            total_terminal,
            total_failed,
            failure_rate: if total_terminal == 0 {
                0.0
            } else {
                total_failed as f64 / total_terminal as f64
            },
            by_error_code,
            by_protocol,
        }
    }
}

#[derive(Default)]
struct Accumulator {
    completed: u64,
    failed: u64,
    cancelled: u64,
    total_duration: i64,
}

impl Accumulator {
    fn add(&mut self, event: &TerminalEvent) {
        match event.status {
            BridgeTxStatus::Completed => self.completed += 1,
            BridgeTxStatus::Failed => self.failed += 1,
            BridgeTxStatus::Cancelled => self.cancelled += 1,
            _ => {}
        }
        self.total_duration += event.duration_secs;
    }

    fn finish(self) -> SliceMetrics {
        let n = self.completed + self.failed + self.cancelled;
        SliceMetrics {
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            avg_duration_secs: if n == 0 {
                0.0
            } else {
                self.total_duration as f64 / n as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(
        at: DateTime<Utc>,
        protocol: &str,
        status: BridgeTxStatus,
        duration: i64,
        code: Option<&str>,
    ) -> TerminalEvent {
        TerminalEvent {
            at,
            protocol: protocol.into(),
            source_chain: Chain::Ethereum,
            status,
            duration_secs: duration,
            error_code: code.map(String::from),
        }
    }

    #[test]
    fn test_rolling_window_excludes_old_events() {
        let now = Utc::now();
        let mut store = MetricsStore::new(48, 30);
        store.record(event(now - Duration::hours(30), "axelar", BridgeTxStatus::Completed, 100, None));
        store.record(event(now - Duration::hours(1), "axelar", BridgeTxStatus::Completed, 200, None));

        let snap = store.snapshot(now);
        assert_eq!(snap.totals.completed, 1);
        assert_eq!(snap.totals.avg_duration_secs, 200.0);
        // Buckets keep the older event until retention evicts them
        assert_eq!(snap.hourly.len(), 2);
    }

    #[test]
    fn test_failure_analysis() {
        let now = Utc::now();
        let mut store = MetricsStore::new(48, 30);
        store.record(event(now, "axelar", BridgeTxStatus::Completed, 100, None));
        store.record(event(now, "axelar", BridgeTxStatus::Failed, 50, Some("TX_FAILED")));
        store.record(event(now, "wormhole", BridgeTxStatus::Failed, 60, Some("TX_FAILED")));
        store.record(event(now, "wormhole", BridgeTxStatus::Failed, 70, Some("TIMEOUT")));

        let analysis = store.failure_analysis(now);
        assert_eq!(analysis.total_terminal, 4);
        assert_eq!(analysis.total_failed, 3);
        assert!((analysis.failure_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(analysis.by_error_code.get("TX_FAILED"), Some(&2));
        assert_eq!(analysis.by_protocol.get("wormhole"), Some(&2));
    }

    #[test]
    fn test_prune_bounds_buckets() {
        let now = Utc::now();
        let mut store = MetricsStore::new(2, 30);
        for h in 0..5 {
            store.record(event(
                now - Duration::hours(h),
                "axelar",
                BridgeTxStatus::Completed,
                10,
                None,
            ));
        }
        store.prune(now);
        assert!(store.hourly.len() <= 2);
        // Events outside 24h are gone after prune
        store.record(event(now - Duration::hours(30), "axelar", BridgeTxStatus::Failed, 10, Some("X")));
        store.prune(now);
        assert_eq!(store.failure_analysis(now).total_failed, 0);
    }
}
