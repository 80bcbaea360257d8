//! Fee Suggestion
//!
//! Turns an `eth_feeHistory` sample into low / medium / high EIP-1559 fee
//! suggestions. Per tier:
//!
//! - the tier's reward percentile column is sorted and its median taken
//!   (index `floor((n-1)/2)`)
//! - the latest base fee is scaled by the tier multiplier
//! - max fee = scaled base fee + max(median, tier floor)

use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CustodyError, CustodyResult};
use crate::utils::{self, quantity};

const GWEI: u64 = 1_000_000_000;

/// Multiplier and priority floor for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierConfig {
    /// Percentage applied to the latest base fee (110 = +10%)
    pub base_fee_multiplier_percent: u64,
    /// Minimum priority fee in wei
    #[serde(with = "quantity")]
    pub priority_fee_floor: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTierConfig {
    pub low: TierConfig,
    pub medium: TierConfig,
    pub high: TierConfig,
}

impl Default for FeeTierConfig {
    fn default() -> Self {
        Self {
            low: TierConfig {
                base_fee_multiplier_percent: 110,
                priority_fee_floor: U256::from(GWEI),
            },
            medium: TierConfig {
                base_fee_multiplier_percent: 120,
                priority_fee_floor: U256::from(3 * GWEI / 2),
            },
            high: TierConfig {
                base_fee_multiplier_percent: 125,
                priority_fee_floor: U256::from(2 * GWEI),
            },
        }
    }
}

impl FeeTierConfig {
    pub fn tiers(&self) -> [(FeeTier, &TierConfig); 3] {
        [
            (FeeTier::Low, &self.low),
            (FeeTier::Medium, &self.medium),
            (FeeTier::High, &self.high),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    Low,
    Medium,
    High,
}

impl FeeTier {
    /// Column of the `eth_feeHistory` reward matrix holding this tier's percentile
    pub fn column(&self) -> usize {
        match self {
            FeeTier::Low => 0,
            FeeTier::Medium => 1,
            FeeTier::High => 2,
        }
    }
}

/// Decoded `eth_feeHistory` response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeHistory {
    pub oldest_block: u64,
    /// One entry per block plus the next block's base fee
    pub base_fee_per_gas: Vec<U256>,
    /// `reward[block][percentile]`
    pub reward: Vec<Vec<U256>>,
}

impl FeeHistory {
    pub fn from_rpc(value: &Value) -> CustodyResult<Self> {
        let oldest_block = match value.get("oldestBlock") {
            Some(v) => utils::value_to_u64(v)?,
            None => 0,
        };

        let base_fee_per_gas = value
            .get("baseFeePerGas")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CustodyError::parse_error("eth_feeHistory missing baseFeePerGas"))?
            .iter()
            .map(utils::value_to_quantity)
            .collect::<CustodyResult<Vec<_>>>()?;

        let reward = match value.get("reward").and_then(|v| v.as_array()) {
            Some(rows) => rows
                .iter()
                .map(|row| {
                    row.as_array()
                        .ok_or_else(|| CustodyError::parse_error("eth_feeHistory reward row is not an array"))?
                        .iter()
                        .map(utils::value_to_quantity)
                        .collect::<CustodyResult<Vec<_>>>()
                })
                .collect::<CustodyResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            oldest_block,
            base_fee_per_gas,
            reward,
        })
    }

    pub fn latest_base_fee(&self) -> U256 {
        self.base_fee_per_gas.last().copied().unwrap_or_default()
    }

    /// Reward samples of one percentile column; rows missing the column are skipped
    pub fn column(&self, index: usize) -> Vec<U256> {
        self.reward.iter().filter_map(|row| row.get(index).copied()).collect()
    }
}

/// Suggested fees for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSuggestion {
    #[serde(with = "quantity")]
    pub max_priority_fee_per_gas: U256,
    #[serde(with = "quantity")]
    pub max_fee_per_gas: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSuggestions {
    #[serde(with = "quantity")]
    pub base_fee: U256,
    pub low: TierSuggestion,
    pub medium: TierSuggestion,
    pub high: TierSuggestion,
}

impl FeeSuggestions {
    pub fn tier(&self, tier: FeeTier) -> &TierSuggestion {
        match tier {
            FeeTier::Low => &self.low,
            FeeTier::Medium => &self.medium,
            FeeTier::High => &self.high,
        }
    }
}

/// Lower median: element `floor((n-1)/2)` of the ascending-sorted samples
pub fn median<T: Ord + Copy>(samples: &[T]) -> Option<T> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    Some(sorted[(sorted.len() - 1) / 2])
}

fn suggest_tier(history: &FeeHistory, tier: FeeTier, config: &TierConfig) -> TierSuggestion {
    let fair = median(&history.column(tier.column())).unwrap_or_default();
    let priority = fair.max(config.priority_fee_floor);
    let adjusted_base = history
        .latest_base_fee()
        .saturating_mul(U256::from(config.base_fee_multiplier_percent))
        / U256::from(100);

    TierSuggestion {
        max_priority_fee_per_gas: priority,
        max_fee_per_gas: adjusted_base.saturating_add(priority),
    }
}

pub fn suggest_fees(history: &FeeHistory, tiers: &FeeTierConfig) -> CustodyResult<FeeSuggestions> {
    if history.base_fee_per_gas.is_empty() {
        return Err(CustodyError::invalid_input("Fee history contains no blocks"));
    }

    let [low, medium, high] = tiers.tiers().map(|(tier, config)| suggest_tier(history, tier, config));
    Ok(FeeSuggestions {
        base_fee: history.latest_base_fee(),
        low,
        medium,
        high,
    })
}
