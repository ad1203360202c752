//! Fee estimate value object
//!
//! Returned per quote and consumed immediately by the caller; never persisted.

use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Quote confidence, reflecting how stable the underlying oracle answer is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeConfidence {
    /// On-chain oracle answered directly
    High,
    /// Partially derived from gas heuristics
    Medium,
    /// Fallback estimate
    Low,
}

/// Fee estimate for one bridge transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// Source-chain gas cost for the dispatch call, in native wei
    pub gas_fee: U256,
    /// Fee charged by the bridge protocol itself, in native wei
    pub protocol_fee: U256,
    /// Relayer/destination execution fee, in native wei
    pub relayer_fee: U256,
    /// Safety premium applied on top of the raw quote, in native wei
    pub premium: U256,
    /// Sum of all components, in native wei
    pub total_fee: U256,
    /// Gas limit recommended for the dispatch call
    pub gas_limit: U256,
    /// Expected end-to-end delivery time in seconds
    pub estimated_time_secs: u64,
    /// Quote confidence
    pub confidence: FeeConfidence,
}

impl FeeEstimate {
    /// Assemble an estimate from its components, applying a percentage premium
    /// over (protocol + relayer) and computing the total.
    pub fn from_components(
        gas_fee: U256,
        protocol_fee: U256,
        relayer_fee: U256,
        premium_percent: u64,
        gas_limit: U256,
        estimated_time_secs: u64,
        confidence: FeeConfidence,
    ) -> Self {
        let premium = (protocol_fee + relayer_fee) * U256::from(premium_percent) / U256::from(100u64);
        let total_fee = gas_fee + protocol_fee + relayer_fee + premium;
        Self {
            gas_fee,
            protocol_fee,
            relayer_fee,
            premium,
            total_fee,
            gas_limit,
            estimated_time_secs,
            confidence,
        }
    }
}
