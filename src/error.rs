//! Error types for the bridge system
//!
//! Bao gồm các error type cho:
//! - Validation của tham số đầu vào
//! - Lỗi mạng khi gọi RPC
//! - Lỗi giao thức bridge theo từng giai đoạn
//! - Lỗi tracker (NotFound, AlreadyTracked, InvalidStatus)

use std::fmt;
use thiserror::Error;

use crate::types::chain::Chain;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Stage code identifying where a protocol-level failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BridgeErrorCode {
    /// Adapter initialization failed (chain unreachable, bad config)
    InitFailed,
    /// Fee oracle query failed
    FeeEstimationFailed,
    /// Token approval transaction failed
    ApprovalFailed,
    /// Dispatch receipt logs could not be parsed
    EventParsingFailed,
    /// Dispatch transaction reverted or was dropped
    TxFailed,
    /// Receipt/status lookup failed
    StatusCheckFailed,
    /// Adapter method called before initialize() or after shutdown()
    NotInitialized,
}

impl fmt::Display for BridgeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InitFailed => "INIT_FAILED",
            Self::FeeEstimationFailed => "FEE_ESTIMATION_FAILED",
            Self::ApprovalFailed => "APPROVAL_FAILED",
            Self::EventParsingFailed => "EVENT_PARSING_FAILED",
            Self::TxFailed => "TX_FAILED",
            Self::StatusCheckFailed => "STATUS_CHECK_FAILED",
            Self::NotInitialized => "NOT_INITIALIZED",
        };
        write!(f, "{}", s)
    }
}

/// Errors produced by the bridge system
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Bad input. Rejected before any I/O, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// RPC/transport failure. Retry-eligible for read-only operations.
    #[error("Network error on {chain}: {message}")]
    Network {
        /// Chain whose provider failed
        chain: Chain,
        /// Underlying error message
        message: String,
        /// Number of attempts already made
        attempts: u32,
    },

    /// Not enough balance to cover amount plus fees. Terminal, surfaced verbatim.
    #[error("Insufficient funds on {chain}: need {required}, have {available}")]
    InsufficientFunds {
        /// Source chain that was checked
        chain: Chain,
        /// Amount required (decimal string, native units)
        required: String,
        /// Amount available (decimal string, native units)
        available: String,
    },

    /// Protocol-level failure, tagged with the stage it happened in
    #[error("Bridge error [{code}] from {protocol}: {message}")]
    Bridge {
        /// Stage code
        code: BridgeErrorCode,
        /// Protocol name (layerzero, wormhole, axelar, hyperlane)
        protocol: String,
        /// Human readable context
        message: String,
        /// Transaction hash, when the failure happened after a submission.
        /// Callers use it for manual resolution; it must never be dropped.
        tx_hash: Option<String>,
    },

    /// Confirmation-wait deadline exceeded
    #[error("Timeout waiting for {tx_hash} on {chain} after {waited_secs}s")]
    Timeout {
        /// Transaction being waited on
        tx_hash: String,
        /// Chain being polled
        chain: Chain,
        /// How long we actually waited
        waited_secs: u64,
    },

    /// Tracker: unknown transaction id
    #[error("Transaction not found: {0}")]
    NotFound(String),

    /// Tracker: id is already being tracked
    #[error("Transaction already tracked: {0}")]
    AlreadyTracked(String),

    /// Tracker: transition not permitted from the current status
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidStatus {
        /// Transaction id
        id: String,
        /// Current status (display form)
        from: String,
        /// Requested status (display form)
        to: String,
    },

    /// Registry: no protocol matches the requested chain pair and constraints
    #[error("No bridge protocol available for {source_chain} -> {target_chain}")]
    NoProtocolAvailable {
        /// Requested source chain
        source_chain: Chain,
        /// Requested target chain
        target_chain: Chain,
    },

    /// Listener/orchestrator is shutting down; pending waiters are rejected
    /// with this instead of being left dangling.
    #[error("Shutting down")]
    ShuttingDown,
}

impl BridgeError {
    /// Network error with a single attempt recorded
    pub fn network(chain: Chain, message: impl Into<String>) -> Self {
        Self::Network {
            chain,
            message: message.into(),
            attempts: 1,
        }
    }

    /// Protocol failure without a transaction hash (pre-submission stages)
    pub fn bridge(code: BridgeErrorCode, protocol: &str, message: impl Into<String>) -> Self {
        Self::Bridge {
            code,
            protocol: protocol.to_string(),
            message: message.into(),
            tx_hash: None,
        }
    }

    /// Protocol failure that happened after a transaction was submitted.
    /// Carries the hash so the caller can reconcile manually.
    pub fn bridge_with_tx(
        code: BridgeErrorCode,
        protocol: &str,
        message: impl Into<String>,
        tx_hash: impl Into<String>,
    ) -> Self {
        Self::Bridge {
            code,
            protocol: protocol.to_string(),
            message: message.into(),
            tx_hash: Some(tx_hash.into()),
        }
    }

    /// Whether a local retry is allowed for this error. Only read-side network
    /// failures qualify; writes are surfaced to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether the error is a terminal verdict on the transfer
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. } | Self::Validation(_)
        )
    }

    /// Error code string used in `BridgeTransaction.errors` entries
    pub fn code_str(&self) -> String {
        match self {
            Self::Validation(_) => "VALIDATION".to_string(),
            Self::Network { .. } => "NETWORK".to_string(),
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS".to_string(),
            Self::Bridge { code, .. } => code.to_string(),
            Self::Timeout { .. } => "TIMEOUT".to_string(),
            Self::NotFound(_) => "NOT_FOUND".to_string(),
            Self::AlreadyTracked(_) => "ALREADY_TRACKED".to_string(),
            Self::InvalidStatus { .. } => "INVALID_STATUS".to_string(),
            Self::NoProtocolAvailable { .. } => "NO_PROTOCOL".to_string(),
            Self::ShuttingDown => "SHUTTING_DOWN".to_string(),
        }
    }
}
