//! Bridge transaction data structures
//!
//! This module defines the `BridgeTransaction` record owned by the tracker,
//! the `BridgeTxStatus` lifecycle enum with its transition rules, and the
//! append-only history/error entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::chain::Chain;

/// Status of a bridge transaction over its whole lifecycle.
///
/// Normal progression: `Pending -> Initiated -> Confirmed -> Processing ->
/// Executed -> Completed`. `Failed` and `Cancelled` are terminal and reachable
/// from any non-terminal state. `Stuck` is a diagnostic label, not terminal:
/// it is reachable from any non-terminal state and a regular update moves the
/// transaction onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeTxStatus {
    /// Registered, nothing submitted yet
    Pending,
    /// Source-chain dispatch submitted
    Initiated,
    /// Source-chain confirmation depth reached
    Confirmed,
    /// Picked up by the bridge network, in flight
    Processing,
    /// Executed on the destination chain, awaiting final bookkeeping
    Executed,
    /// Delivered and settled on both chains
    Completed,
    /// Failed with an error recorded
    Failed,
    /// Cancelled before delivery
    Cancelled,
    /// No update past the stuck threshold; flagged for operator attention
    Stuck,
}

impl BridgeTxStatus {
    /// Check if the status is terminal (Completed, Failed or Cancelled).
    /// `Stuck` is deliberately not terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Ordinal position in the happy-path lifecycle. Terminal and diagnostic
    /// statuses have no rank.
    pub fn lifecycle_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Initiated => Some(1),
            Self::Confirmed => Some(2),
            Self::Processing => Some(3),
            Self::Executed => Some(4),
            Self::Completed => Some(5),
            Self::Failed | Self::Cancelled | Self::Stuck => None,
        }
    }

    /// Whether a transition from `self` to `next` is permitted.
    ///
    /// Rules:
    /// - re-entering the same status is allowed (idempotent updates), even on
    ///   a terminal status;
    /// - nothing else leaves a terminal status;
    /// - lifecycle statuses may only move forward;
    /// - `Failed`, `Cancelled` and `Stuck` are reachable from any non-terminal
    ///   status; leaving `Stuck` is always allowed.
    pub fn can_transition_to(&self, next: BridgeTxStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Failed | Self::Cancelled | Self::Stuck) {
            return true;
        }
        match (self.lifecycle_rank(), next.lifecycle_rank()) {
            (Some(a), Some(b)) => b > a,
            // Leaving Stuck: any lifecycle status is fine
            (None, Some(_)) => *self == Self::Stuck,
            _ => false,
        }
    }

    /// All statuses, for index initialization
    pub fn all() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Initiated,
            Self::Confirmed,
            Self::Processing,
            Self::Executed,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
            Self::Stuck,
        ]
    }
}

impl fmt::Display for BridgeTxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Initiated => "initiated",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Executed => "executed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Stuck => "stuck",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for BridgeTxStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "initiated" => Ok(Self::Initiated),
            "confirmed" => Ok(Self::Confirmed),
            "processing" => Ok(Self::Processing),
            "executed" => Ok(Self::Executed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "stuck" => Ok(Self::Stuck),
            _ => Err(format!("Unknown bridge status: {}", s)),
        }
    }
}

/// One entry in the append-only status history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Status that was entered
    pub status: BridgeTxStatus,
    /// When the transition was recorded
    pub timestamp: DateTime<Utc>,
    /// Transition side data (tx hashes, fees, correlation keys...)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// One recorded error on a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxErrorEntry {
    /// When the error happened
    pub timestamp: DateTime<Utc>,
    /// Stable error code (see `BridgeError::code_str`)
    pub code: String,
    /// Human readable message
    pub message: String,
}

/// One cross-chain transfer attempt, owned exclusively by the tracker.
/// Adapters and the listener only submit proposed transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeTransaction {
    /// Caller-assigned unique id
    pub id: String,
    /// Protocol that carries the transfer
    pub protocol: String,
    /// Source blockchain
    pub source_chain: Chain,
    /// Target blockchain
    pub target_chain: Chain,
    /// Token symbol or address
    pub token: String,
    /// Amount being transferred (decimal string, smallest unit)
    pub amount: String,
    /// Receiver address on the target chain
    pub recipient: String,
    /// Sender address on the source chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Current status
    pub status: BridgeTxStatus,
    /// Append-only transition history, non-decreasing in lifecycle order
    pub status_history: Vec<StatusEntry>,

    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Last update of any kind (volatile; excluded from export comparisons)
    pub updated_at: DateTime<Utc>,
    /// Set once when the source dispatch was submitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_at: Option<DateTime<Utc>>,
    /// Set once when source confirmations were reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Set once when the transfer reached a terminal success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Source-chain transaction hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tx_hash: Option<String>,
    /// Destination-chain transaction hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_tx_hash: Option<String>,

    /// Quoted fee at execution time (decimal string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_fee: Option<String>,
    /// Fee actually paid (decimal string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_fee: Option<String>,
    /// Gas used by the source dispatch (decimal string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,

    /// Recorded errors, oldest first
    #[serde(default)]
    pub errors: Vec<TxErrorEntry>,
    /// Number of retries performed by the caller
    #[serde(default)]
    pub retry_count: u32,
    /// Protocol-specific correlation key (message id / command id / sequence)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    /// Wall-clock duration from creation to terminal status, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_secs: Option<i64>,
}

impl BridgeTransaction {
    /// Create a fresh record in `Pending` with an initial history entry
    pub fn new(
        id: String,
        protocol: String,
        source_chain: Chain,
        target_chain: Chain,
        token: String,
        amount: String,
        recipient: String,
        sender: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            protocol,
            source_chain,
            target_chain,
            token,
            amount,
            recipient,
            sender,
            status: BridgeTxStatus::Pending,
            status_history: vec![StatusEntry {
                status: BridgeTxStatus::Pending,
                timestamp: now,
                data: serde_json::Value::Null,
            }],
            created_at: now,
            updated_at: now,
            initiated_at: None,
            confirmed_at: None,
            completed_at: None,
            source_tx_hash: None,
            dest_tx_hash: None,
            estimated_fee: None,
            actual_fee: None,
            gas_used: None,
            errors: Vec::new(),
            retry_count: 0,
            correlation_key: None,
            actual_duration_secs: None,
        }
    }

    /// Seconds since the last update
    pub fn seconds_since_update(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_seconds()
    }

    /// Check if the transaction qualifies as stuck: non-terminal and no update
    /// past the threshold. Terminal transactions are never stuck, regardless
    /// of age.
    pub fn is_stuck(&self, threshold_secs: i64, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.seconds_since_update(now) > threshold_secs
    }
}

impl fmt::Display for BridgeTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bridge [{}] {} {} -> {}, status: {}, amount: {} {}",
            self.id,
            self.protocol,
            self.source_chain,
            self.target_chain,
            self.status,
            self.amount,
            self.token,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tx() -> BridgeTransaction {
        BridgeTransaction::new(
            "tx1".into(),
            "axelar".into(),
            Chain::Ethereum,
            Chain::Polygon,
            "USDC".into(),
            "1000000".into(),
            "0xreceiver".into(),
            Some("0xsender".into()),
        )
    }

    #[test]
    fn test_new_transaction_is_pending() {
        let tx = tx();
        assert_eq!(tx.status, BridgeTxStatus::Pending);
        assert!(tx.errors.is_empty());
        assert_eq!(tx.status_history.len(), 1);
        assert_eq!(tx.status_history[0].status, BridgeTxStatus::Pending);
    }

    #[test]
    fn test_lifecycle_transitions() {
        use BridgeTxStatus::*;
        assert!(Pending.can_transition_to(Initiated));
        assert!(Pending.can_transition_to(Completed));
        assert!(Initiated.can_transition_to(Confirmed));
        assert!(!Confirmed.can_transition_to(Initiated));
        // Idempotent re-entry, including on terminal statuses
        assert!(Processing.can_transition_to(Processing));
        assert!(Completed.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Failed));
        // Failure/cancel/stuck from anywhere non-terminal
        assert!(Pending.can_transition_to(Failed));
        assert!(Executed.can_transition_to(Cancelled));
        assert!(Initiated.can_transition_to(Stuck));
        // Stuck recovers
        assert!(Stuck.can_transition_to(Processing));
        assert!(Stuck.can_transition_to(Completed));
        // Terminal freeze
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Stuck));
    }

    #[test]
    fn test_stuck_detection() {
        let mut tx = tx();
        let now = Utc::now();
        tx.updated_at = now - Duration::seconds(600);
        assert!(tx.is_stuck(300, now));
        assert!(!tx.is_stuck(900, now));

        tx.status = BridgeTxStatus::Completed;
        assert!(!tx.is_stuck(1, now), "terminal is never stuck");
    }

    #[test]
    fn test_status_string_roundtrip() {
        for s in BridgeTxStatus::all() {
            assert_eq!(s.to_string().parse::<BridgeTxStatus>(), Ok(s));
        }
    }
}
