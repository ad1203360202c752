//! Configuration module for the bridge system
//!
//! This module defines the configuration structures used throughout the
//! bridge subsystem: polling intervals, confirmation depths, tracker
//! thresholds and adapter endpoints. A config can be loaded from a YAML file
//! or assembled in code from the defaults.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::types::chain::Chain;

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Per-chain overrides; chains absent here use `Chain` defaults
    #[serde(default)]
    pub chains: HashMap<Chain, ChainSettings>,

    /// Tracker thresholds and retention
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Listener polling and history bounds
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Adapter-wide knobs
    #[serde(default)]
    pub adapters: AdapterConfig,
}

/// Per-chain settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainSettings {
    /// Confirmation depth override
    #[serde(default)]
    pub confirmations: Option<u64>,
    /// Polling interval override in milliseconds
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

/// Tracker thresholds and retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Seconds without an update before a non-terminal transaction is stuck
    pub stuck_threshold_secs: i64,
    /// How long terminal transactions are retained before cleanup
    pub retention_secs: i64,
    /// Maximum records deleted per cleanup batch
    pub cleanup_batch_size: usize,
    /// Interval between cleanup passes
    pub cleanup_interval_secs: u64,
    /// Interval between stuck-detection passes
    pub stuck_scan_interval_secs: u64,
    /// Interval between metrics rollup passes
    pub rollup_interval_secs: u64,
    /// Rolling failure rate (0.0..1.0) above which an alert is emitted
    pub failure_rate_alert_threshold: f64,
    /// Hourly metric buckets kept
    pub metrics_hourly_retention: usize,
    /// Daily metric buckets kept
    pub metrics_daily_retention: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_secs: 1800,       // 30 minutes
            retention_secs: 7 * 24 * 3600,    // 1 week
            cleanup_batch_size: 100,
            cleanup_interval_secs: 3600,
            stuck_scan_interval_secs: 300,
            rollup_interval_secs: 600,
            failure_rate_alert_threshold: 0.25,
            metrics_hourly_retention: 48,
            metrics_daily_retention: 30,
        }
    }
}

/// Listener polling and history bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Default polling interval when a chain has no override
    pub default_poll_interval_ms: u64,
    /// Maximum events kept in the replay history
    pub event_history_max_len: usize,
    /// Maximum age of events kept in the replay history
    pub event_history_max_age_secs: i64,
    /// Interval between receipt polls while waiting for confirmations
    pub confirmation_poll_interval_ms: u64,
    /// Read retry bound for log/receipt queries
    pub max_read_retries: u32,
    /// Base backoff between read retries
    pub read_retry_backoff_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            default_poll_interval_ms: 5_000,
            event_history_max_len: 10_000,
            event_history_max_age_secs: 24 * 3600,
            confirmation_poll_interval_ms: 3_000,
            max_read_retries: 5,
            read_retry_backoff_ms: 1_000,
        }
    }
}

/// Adapter-wide knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Percentage premium applied on top of raw fee quotes
    pub fee_premium_percent: u64,
    /// Percentage safety buffer added when raising token allowances
    pub approval_buffer_percent: u64,
    /// Read retry bound for receipt polling during execution
    pub max_read_retries: u32,
    /// Seconds to wait for source confirmations before giving up
    pub source_confirmation_timeout_secs: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            fee_premium_percent: 10,
            approval_buffer_percent: 20,
            max_read_retries: 5,
            source_confirmation_timeout_secs: 1800,
        }
    }
}

/// Contract addresses for one protocol on one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEndpoints {
    /// Core contract the dispatch call goes to (endpoint/gateway/mailbox/core)
    pub core: Address,
    /// Auxiliary contract (gas service, fee oracle) where the protocol has one
    #[serde(default)]
    pub auxiliary: Option<Address>,
}

impl BridgeConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .map_err(|e| BridgeError::Validation(format!("Cannot read config file: {}", e)))?;
        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| BridgeError::Validation(format!("Invalid config file: {}", e)))?;
        info!("Loaded bridge config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Confirmation depth for a chain, honoring overrides
    pub fn confirmations(&self, chain: Chain) -> u64 {
        self.chains
            .get(&chain)
            .and_then(|c| c.confirmations)
            .unwrap_or_else(|| chain.default_confirmations())
    }

    /// Polling interval for a chain, honoring overrides. Defaults to twice
    /// the chain's block time, floored by the listener default.
    pub fn poll_interval(&self, chain: Chain) -> Duration {
        let ms = self
            .chains
            .get(&chain)
            .and_then(|c| c.poll_interval_ms)
            .unwrap_or_else(|| {
                (chain.block_time_ms() * 2).max(self.listener.default_poll_interval_ms)
            });
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.confirmations(Chain::Ethereum), 12);
        assert_eq!(config.tracker.stuck_threshold_secs, 1800);
        assert!(config.poll_interval(Chain::Ethereum) >= Duration::from_millis(5_000));
    }

    #[test]
    fn test_chain_overrides() {
        let mut config = BridgeConfig::default();
        config.chains.insert(
            Chain::Polygon,
            ChainSettings {
                confirmations: Some(128),
                poll_interval_ms: Some(1_000),
            },
        );
        assert_eq!(config.confirmations(Chain::Polygon), 128);
        assert_eq!(config.poll_interval(Chain::Polygon), Duration::from_millis(1_000));
        // Untouched chains keep defaults
        assert_eq!(config.confirmations(Chain::BSC), 15);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = BridgeConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: BridgeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.tracker.cleanup_batch_size, config.tracker.cleanup_batch_size);
    }
}
