//! Chain enum and related functionality
//!
//! This module defines the `Chain` enum representing the blockchain networks
//! supported by the bridge system, along with the per-protocol chain id
//! mappings (LayerZero endpoint ids, Wormhole chain ids, Axelar chain names,
//! Hyperlane domains) and support predicates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Ethereum
    Ethereum,
    /// Binance Smart Chain
    BSC,
    /// Polygon
    Polygon,
    /// Avalanche
    Avalanche,
    /// Arbitrum One
    Arbitrum,
    /// Optimism
    Optimism,
}

impl Chain {
    /// Get string representation of the chain
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::BSC => "bsc",
            Chain::Polygon => "polygon",
            Chain::Avalanche => "avalanche",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
        }
    }

    /// EVM chain id (as used in transaction signing)
    pub fn evm_chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::BSC => 56,
            Chain::Polygon => 137,
            Chain::Avalanche => 43114,
            Chain::Arbitrum => 42161,
            Chain::Optimism => 10,
        }
    }

    /// Convert to LayerZero v2 endpoint id
    pub fn to_layerzero_eid(&self) -> u32 {
        match self {
            Chain::Ethereum => 30101,
            Chain::BSC => 30102,
            Chain::Avalanche => 30106,
            Chain::Polygon => 30109,
            Chain::Arbitrum => 30110,
            Chain::Optimism => 30111,
        }
    }

    /// Convert from LayerZero v2 endpoint id
    pub fn from_layerzero_eid(eid: u32) -> Option<Self> {
        match eid {
            30101 => Some(Chain::Ethereum),
            30102 => Some(Chain::BSC),
            30106 => Some(Chain::Avalanche),
            30109 => Some(Chain::Polygon),
            30110 => Some(Chain::Arbitrum),
            30111 => Some(Chain::Optimism),
            _ => None,
        }
    }

    /// Convert to Wormhole chain id
    pub fn to_wormhole_id(&self) -> u16 {
        match self {
            Chain::Ethereum => 2,
            Chain::BSC => 4,
            Chain::Polygon => 5,
            Chain::Avalanche => 6,
            Chain::Arbitrum => 23,
            Chain::Optimism => 24,
        }
    }

    /// Convert from Wormhole chain id
    pub fn from_wormhole_id(id: u16) -> Option<Self> {
        match id {
            2 => Some(Chain::Ethereum),
            4 => Some(Chain::BSC),
            5 => Some(Chain::Polygon),
            6 => Some(Chain::Avalanche),
            23 => Some(Chain::Arbitrum),
            24 => Some(Chain::Optimism),
            _ => None,
        }
    }

    /// Axelar chain name as used by the gateway contracts
    pub fn axelar_name(&self) -> &'static str {
        match self {
            Chain::Ethereum => "Ethereum",
            Chain::BSC => "binance",
            Chain::Polygon => "Polygon",
            Chain::Avalanche => "Avalanche",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
        }
    }

    /// Convert from Axelar chain name
    pub fn from_axelar_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "ethereum" => Some(Chain::Ethereum),
            "binance" => Some(Chain::BSC),
            "polygon" => Some(Chain::Polygon),
            "avalanche" => Some(Chain::Avalanche),
            "arbitrum" => Some(Chain::Arbitrum),
            "optimism" => Some(Chain::Optimism),
            _ => None,
        }
    }

    /// Hyperlane domain id (equal to the EVM chain id on these networks)
    pub fn hyperlane_domain(&self) -> u32 {
        self.evm_chain_id() as u32
    }

    /// Convert from Hyperlane domain id
    pub fn from_hyperlane_domain(domain: u32) -> Option<Self> {
        Self::supported_chains()
            .into_iter()
            .find(|c| c.hyperlane_domain() == domain)
    }

    /// Native gas token symbol
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETH",
            Chain::BSC => "BNB",
            Chain::Polygon => "MATIC",
            Chain::Avalanche => "AVAX",
            Chain::Arbitrum => "ETH",
            Chain::Optimism => "ETH",
        }
    }

    /// Typical block time in milliseconds, used to derive polling intervals
    pub fn block_time_ms(&self) -> u64 {
        match self {
            Chain::Ethereum => 12_000,
            Chain::BSC => 3_000,
            Chain::Polygon => 2_000,
            Chain::Avalanche => 2_000,
            Chain::Arbitrum => 250,
            Chain::Optimism => 2_000,
        }
    }

    /// Default confirmation depth before a source transaction is considered final
    pub fn default_confirmations(&self) -> u64 {
        match self {
            Chain::Ethereum => 12,
            Chain::BSC => 15,
            Chain::Polygon => 64,
            Chain::Avalanche => 1,
            Chain::Arbitrum => 1,
            Chain::Optimism => 1,
        }
    }

    /// Get a list of all supported chains
    pub fn supported_chains() -> Vec<Self> {
        vec![
            Self::Ethereum,
            Self::BSC,
            Self::Polygon,
            Self::Avalanche,
            Self::Arbitrum,
            Self::Optimism,
        ]
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethereum" => Ok(Self::Ethereum),
            "bsc" => Ok(Self::BSC),
            "polygon" => Ok(Self::Polygon),
            "avalanche" => Ok(Self::Avalanche),
            "arbitrum" => Ok(Self::Arbitrum),
            "optimism" => Ok(Self::Optimism),
            _ => Err(format!("Unknown chain: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_conversions() {
        assert_eq!(Chain::Ethereum.to_layerzero_eid(), 30101);
        assert_eq!(Chain::from_layerzero_eid(30102), Some(Chain::BSC));
        assert_eq!(Chain::from_layerzero_eid(999), None);

        assert_eq!(Chain::Polygon.to_wormhole_id(), 5);
        assert_eq!(Chain::from_wormhole_id(6), Some(Chain::Avalanche));

        assert_eq!(Chain::from_axelar_name("binance"), Some(Chain::BSC));
        assert_eq!(Chain::from_hyperlane_domain(42161), Some(Chain::Arbitrum));

        assert_eq!(Chain::Ethereum.as_str(), "ethereum");
        assert_eq!("ETHEREUM".parse::<Chain>(), Ok(Chain::Ethereum));
        assert!("unknown".parse::<Chain>().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let json = serde_json::to_string(&Chain::Arbitrum).unwrap();
        assert_eq!(json, "\"arbitrum\"");
        let back: Chain = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Chain::Arbitrum);
    }
}
