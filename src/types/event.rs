//! Standardized on-chain events
//!
//! Raw per-protocol logs are decoded by the listener into one normalized
//! shape so the orchestrator and tracker never need protocol-specific
//! knowledge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chain::Chain;

/// Semantic bucket of a bridge event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Source-chain dispatch observed
    MessageSent,
    /// Destination-chain execution observed
    MessageDelivered,
    /// Destination-chain execution failed
    MessageFailed,
}

/// Normalized on-chain log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardizedEvent {
    /// Deterministic id (`chain:tx_hash:log_index`), idempotent on re-ingestion
    pub id: String,
    /// Protocol that emitted the underlying log
    pub protocol: String,
    /// Chain the log was observed on
    pub chain: Chain,
    /// Protocol-native event name (e.g. `PacketSent`)
    pub event_name: String,
    /// Transaction hash containing the log
    pub tx_hash: String,
    /// Block number of the log
    pub block_number: u64,
    /// Position of the log inside the transaction
    pub log_index: u64,
    /// When the listener ingested the event
    pub timestamp: DateTime<Utc>,
    /// Decoded payload fields, including the correlation key where present
    pub data: serde_json::Value,
}

impl StandardizedEvent {
    /// Deterministic event id
    pub fn make_id(chain: Chain, tx_hash: &str, log_index: u64) -> String {
        format!("{}:{}:{}", chain, tx_hash, log_index)
    }

    /// Correlation key carried in the decoded data, if the decoder found one
    pub fn correlation_key(&self) -> Option<&str> {
        self.data.get("correlation_key").and_then(|v| v.as_str())
    }
}
