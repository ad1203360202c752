//! Protocol registry and selection
//!
//! Static metadata about every registered bridge protocol plus a pure
//! ranking function. Descriptors are built once at process start and never
//! mutated; `recommend` is a synchronous function over them with no I/O.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::types::chain::Chain;

/// Trust model backing a bridge protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustModel {
    /// Economic security from staked validators
    StakeBased,
    /// Independent oracle network attests messages
    OracleNetwork,
    /// Fixed guardian set signs messages
    GuardianSet,
    /// Fraud-proof window, honest-minority assumption
    Optimistic,
    /// Multi-party computation signer committee
    Mpc,
}

/// How the protocol charges fees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeShape {
    /// Quoted per message by an on-chain oracle
    OracleQuoted,
    /// Flat fee per publication
    FlatFee,
    /// Prepaid destination gas plus protocol cut
    PrepaidGas,
}

/// Maturity level of the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Maturity {
    /// Freshly deployed, little volume
    Experimental,
    /// Growing usage, limited audit history
    Emerging,
    /// Widely used, audited
    Established,
    /// Years of mainnet volume
    BattleTested,
}

/// Feature flags a protocol can support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFeature {
    /// Plain token transfers
    TokenTransfer,
    /// Arbitrary payload delivery (GMP)
    GeneralMessagePassing,
    /// Destination gas can be prepaid on the source chain
    GasAbstraction,
    /// Delivery can be retried/executed manually on the destination
    ManualExecution,
}

/// Immutable metadata describing one protocol adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    /// Registry key, matches the adapter's `name()`
    pub name: String,
    /// Chains the deployment covers
    pub chains: Vec<Chain>,
    /// Trust model
    pub trust_model: TrustModel,
    /// Fee shape
    pub fee_shape: FeeShape,
    /// Maturity level
    pub maturity: Maturity,
    /// Supported features
    pub features: Vec<ProtocolFeature>,
    /// Average end-to-end delivery time in seconds
    pub avg_time_secs: u64,
    /// Worst-case delivery time in seconds
    pub max_time_secs: u64,
}

impl ProtocolDescriptor {
    /// Whether the protocol covers both chains of a pair
    pub fn supports_pair(&self, source: Chain, target: Chain) -> bool {
        self.chains.contains(&source) && self.chains.contains(&target)
    }

    /// Whether all required features are present
    pub fn has_features(&self, required: &[ProtocolFeature]) -> bool {
        required.iter().all(|f| self.features.contains(f))
    }
}

/// Ranking criterion for `recommend`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankBy {
    /// Strongest trust assumptions first
    Security,
    /// Fastest delivery first
    Speed,
    /// Cheapest fee shape first
    Cost,
    /// Least centralized trust first
    Decentralization,
}

/// Options for `recommend`
#[derive(Debug, Clone)]
pub struct RecommendOptions {
    /// Ranking criterion
    pub prioritize: RankBy,
    /// Maturity levels to exclude outright
    pub exclude_maturity: Vec<Maturity>,
    /// Features every candidate must have
    pub required_features: Vec<ProtocolFeature>,
    /// Number of candidates returned
    pub top_k: usize,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self {
            prioritize: RankBy::Security,
            exclude_maturity: vec![Maturity::Experimental],
            required_features: Vec::new(),
            top_k: 3,
        }
    }
}

// Fixed ordinal score tables per trust model. Higher is better. Ties between
// protocols with the same score preserve registration order.
fn security_score(model: TrustModel) -> u8 {
    match model {
        TrustModel::StakeBased => 5,
        TrustModel::Optimistic => 4,
        TrustModel::OracleNetwork => 3,
        TrustModel::GuardianSet => 2,
        TrustModel::Mpc => 1,
    }
}

fn decentralization_score(model: TrustModel) -> u8 {
    match model {
        TrustModel::StakeBased => 5,
        TrustModel::OracleNetwork => 4,
        TrustModel::Optimistic => 3,
        TrustModel::GuardianSet => 2,
        TrustModel::Mpc => 1,
    }
}

fn cost_score(shape: FeeShape) -> u8 {
    match shape {
        FeeShape::FlatFee => 3,
        FeeShape::PrepaidGas => 2,
        FeeShape::OracleQuoted => 1,
    }
}

/// Registry of protocol descriptors with a selection function
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    descriptors: Vec<ProtocolDescriptor>,
}

impl ProtocolRegistry {
    /// Build a registry from descriptors; input order is the tie-break order
    pub fn new(descriptors: Vec<ProtocolDescriptor>) -> Self {
        Self { descriptors }
    }

    /// All registered protocol names, in registration order
    pub fn list_protocols(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    /// Metadata lookup by name
    pub fn get_metadata(&self, name: &str) -> Option<&ProtocolDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Protocols covering both chains of a pair, in registration order
    pub fn protocols_for_chain_pair(&self, source: Chain, target: Chain) -> Vec<&ProtocolDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.supports_pair(source, target))
            .collect()
    }

    /// Filter by chain pair, maturity exclusions and required features, then
    /// rank by the requested criterion. Stable sort keeps input order on ties.
    pub fn recommend(
        &self,
        source: Chain,
        target: Chain,
        options: &RecommendOptions,
    ) -> Result<Vec<&ProtocolDescriptor>> {
        let mut candidates: Vec<&ProtocolDescriptor> = self
            .protocols_for_chain_pair(source, target)
            .into_iter()
            .filter(|d| !options.exclude_maturity.contains(&d.maturity))
            .filter(|d| d.has_features(&options.required_features))
            .collect();

        if candidates.is_empty() {
            return Err(BridgeError::NoProtocolAvailable {
                source_chain: source,
                target_chain: target,
            });
        }

        match options.prioritize {
            RankBy::Security => {
                candidates.sort_by_key(|d| std::cmp::Reverse(security_score(d.trust_model)))
            }
            RankBy::Decentralization => {
                candidates.sort_by_key(|d| std::cmp::Reverse(decentralization_score(d.trust_model)))
            }
            RankBy::Cost => candidates.sort_by_key(|d| std::cmp::Reverse(cost_score(d.fee_shape))),
            RankBy::Speed => candidates.sort_by_key(|d| d.avg_time_secs),
        }

        candidates.truncate(options.top_k.max(1));
        Ok(candidates)
    }
}

/// Descriptors for the four built-in adapters
pub fn default_descriptors() -> Vec<ProtocolDescriptor> {
    let all = Chain::supported_chains();
    vec![
        ProtocolDescriptor {
            name: "layerzero".into(),
            chains: all.clone(),
            trust_model: TrustModel::OracleNetwork,
            fee_shape: FeeShape::OracleQuoted,
            maturity: Maturity::BattleTested,
            features: vec![
                ProtocolFeature::TokenTransfer,
                ProtocolFeature::GeneralMessagePassing,
                ProtocolFeature::GasAbstraction,
            ],
            avg_time_secs: 180,
            max_time_secs: 3600,
        },
        ProtocolDescriptor {
            name: "wormhole".into(),
            chains: all.clone(),
            trust_model: TrustModel::GuardianSet,
            fee_shape: FeeShape::FlatFee,
            maturity: Maturity::BattleTested,
            features: vec![
                ProtocolFeature::TokenTransfer,
                ProtocolFeature::GeneralMessagePassing,
                ProtocolFeature::ManualExecution,
            ],
            avg_time_secs: 900,
            max_time_secs: 7200,
        },
        ProtocolDescriptor {
            name: "axelar".into(),
            chains: all.clone(),
            trust_model: TrustModel::StakeBased,
            fee_shape: FeeShape::PrepaidGas,
            maturity: Maturity::Established,
            features: vec![
                ProtocolFeature::TokenTransfer,
                ProtocolFeature::GeneralMessagePassing,
                ProtocolFeature::GasAbstraction,
                ProtocolFeature::ManualExecution,
            ],
            avg_time_secs: 300,
            max_time_secs: 5400,
        },
        ProtocolDescriptor {
            name: "hyperlane".into(),
            chains: all,
            trust_model: TrustModel::Optimistic,
            fee_shape: FeeShape::PrepaidGas,
            maturity: Maturity::Emerging,
            features: vec![
                ProtocolFeature::GeneralMessagePassing,
                ProtocolFeature::GasAbstraction,
            ],
            avg_time_secs: 120,
            max_time_secs: 1800,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProtocolRegistry {
        ProtocolRegistry::new(default_descriptors())
    }

    #[test]
    fn test_list_and_lookup() {
        let reg = registry();
        assert_eq!(
            reg.list_protocols(),
            vec!["layerzero", "wormhole", "axelar", "hyperlane"]
        );
        assert!(reg.get_metadata("axelar").is_some());
        assert!(reg.get_metadata("nonexistent").is_none());
    }

    #[test]
    fn test_recommend_subset_of_pair_support() {
        let reg = registry();
        let options = RecommendOptions {
            prioritize: RankBy::Security,
            ..Default::default()
        };
        let recommended = reg
            .recommend(Chain::Ethereum, Chain::Polygon, &options)
            .unwrap();
        let pair: Vec<&str> = reg
            .protocols_for_chain_pair(Chain::Ethereum, Chain::Polygon)
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        for d in &recommended {
            assert!(pair.contains(&d.name.as_str()));
        }
    }

    #[test]
    fn test_recommend_security_ranking() {
        let reg = registry();
        let recommended = reg
            .recommend(Chain::Ethereum, Chain::BSC, &RecommendOptions::default())
            .unwrap();
        // StakeBased axelar outranks oracle/guardian protocols
        assert_eq!(recommended[0].name, "axelar");
        assert_eq!(recommended.len(), 3);
    }

    #[test]
    fn test_recommend_filters() {
        let reg = registry();
        // Excluding everything below BattleTested leaves layerzero + wormhole
        let options = RecommendOptions {
            exclude_maturity: vec![Maturity::Experimental, Maturity::Emerging, Maturity::Established],
            ..Default::default()
        };
        let names: Vec<&str> = reg
            .recommend(Chain::Ethereum, Chain::BSC, &options)
            .unwrap()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["layerzero", "wormhole"]);

        // Feature requirement that only some satisfy
        let options = RecommendOptions {
            required_features: vec![ProtocolFeature::ManualExecution],
            ..Default::default()
        };
        let names: Vec<&str> = reg
            .recommend(Chain::Ethereum, Chain::BSC, &options)
            .unwrap()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["axelar", "wormhole"]);
    }

    #[test]
    fn test_recommend_empty_fails() {
        let reg = registry();
        let options = RecommendOptions {
            exclude_maturity: vec![
                Maturity::Experimental,
                Maturity::Emerging,
                Maturity::Established,
                Maturity::BattleTested,
            ],
            ..Default::default()
        };
        let err = reg
            .recommend(Chain::Ethereum, Chain::BSC, &options)
            .unwrap_err();
        assert!(matches!(err, BridgeError::NoProtocolAvailable { .. }));
    }

    #[test]
    fn test_recommend_speed() {
        let reg = registry();
        let options = RecommendOptions {
            prioritize: RankBy::Speed,
            exclude_maturity: Vec::new(),
            required_features: Vec::new(),
            top_k: 4,
        };
        let names: Vec<&str> = reg
            .recommend(Chain::Ethereum, Chain::BSC, &options)
            .unwrap()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["hyperlane", "layerzero", "axelar", "wormhole"]);
    }
}
