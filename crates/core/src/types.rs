use alloy_primitives::{Address, FixedBytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StakecraftError};
use crate::quoted;

/// 48-byte BLS validator public key
pub type ValidatorPubkey = FixedBytes<48>;

/// Beacon chain validator index
pub type ValidatorIndex = u64;

/// 1 ETH (or 1 RPL, or 100%) in wei
pub const ONE_ETH: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Convert a whole number of ETH to wei
pub fn eth_to_wei(eth: u64) -> U256 {
    U256::from(eth) * ONE_ETH
}

/// Convert gwei (beacon chain balances) to wei
pub fn gwei_to_wei(gwei: u64) -> U256 {
    U256::from(gwei) * U256::from(1_000_000_000u64)
}

/// Lossy wei -> ETH conversion for log output only
pub fn wei_to_eth(wei: &U256) -> f64 {
    let s = wei.to_string();
    s.parse::<f64>().unwrap_or(0.0) / 1e18
}

// =========================================================================
// Beacon chain
// =========================================================================

/// Timing constants of the beacon chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconConfig {
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl BeaconConfig {
    pub fn mainnet() -> Self {
        Self {
            genesis_time: 1_606_824_023,
            seconds_per_slot: 12,
            slots_per_epoch: 32,
        }
    }

    /// Reject timing constants the slot and epoch math cannot use
    pub fn validate(&self) -> Result<()> {
        if self.slots_per_epoch == 0 {
            return Err(StakecraftError::InvalidBeaconConfig(
                "slots per epoch is zero".to_string(),
            ));
        }
        if self.seconds_per_slot == 0 {
            return Err(StakecraftError::InvalidBeaconConfig(
                "seconds per slot is zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn epoch_of(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch
    }

    pub fn first_slot_of_epoch(&self, epoch: u64) -> u64 {
        epoch * self.slots_per_epoch
    }

    pub fn last_slot_of_epoch(&self, epoch: u64) -> u64 {
        (epoch + 1) * self.slots_per_epoch - 1
    }

    /// Unix timestamp of the start of `slot`
    pub fn slot_time(&self, slot: u64) -> u64 {
        self.genesis_time + slot * self.seconds_per_slot
    }

    /// Slot containing the timestamp (rounded down)
    pub fn slot_at(&self, timestamp: u64) -> u64 {
        timestamp.saturating_sub(self.genesis_time) / self.seconds_per_slot
    }

    /// First slot starting at or after the timestamp
    pub fn slot_at_or_after(&self, timestamp: u64) -> u64 {
        let offset = timestamp.saturating_sub(self.genesis_time);
        offset.div_ceil(self.seconds_per_slot)
    }
}

/// A consensus block and the execution block it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconBlock {
    pub slot: u64,
    pub execution_block_number: u64,
}

/// Chain head as reported by the beacon node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconHead {
    pub slot: u64,
    pub epoch: u64,
    pub finalized_epoch: u64,
}

/// One attestation committee for a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Committee {
    pub slot: u64,
    pub index: u64,
    /// Validator indices in committee position order
    pub validators: Vec<ValidatorIndex>,
}

/// An aggregate attestation as included in a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationInfo {
    /// Slot being attested to
    pub slot: u64,
    pub committee_index: u64,
    /// SSZ bitlist bytes
    pub aggregation_bits: Vec<u8>,
}

impl AttestationInfo {
    /// Whether the committee member at `position` took part
    pub fn bit_at(&self, position: usize) -> bool {
        self.aggregation_bits
            .get(position / 8)
            .map(|byte| byte & (1 << (position % 8)) != 0)
            .unwrap_or(false)
    }

    /// Build the bitlist for the given participating positions. `None` if a
    /// position is outside the committee.
    pub fn bits_for(positions: &[usize], committee_size: usize) -> Option<Vec<u8>> {
        if positions.iter().any(|&p| p >= committee_size) {
            return None;
        }
        let mut bits = vec![0u8; committee_size / 8 + 1];
        for &p in positions {
            bits[p / 8] |= 1 << (p % 8);
        }
        // SSZ bitlist length marker
        bits[committee_size / 8] |= 1 << (committee_size % 8);
        Some(bits)
    }
}

/// Consensus-layer status of one validator at a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorStatus {
    pub index: ValidatorIndex,
    pub pubkey: ValidatorPubkey,
    pub activation_epoch: u64,
    pub exit_epoch: u64,
    /// Gwei
    pub effective_balance: u64,
    /// Gwei
    pub balance: u64,
    pub withdrawal_credentials: B256,
}

/// Sentinel used by beacon nodes for "not yet scheduled"
pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;

// =========================================================================
// Protocol state (execution layer)
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinipoolStatus {
    Initialized,
    Prelaunch,
    Staking,
    Withdrawable,
    Dissolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DepositType {
    #[default]
    Variable,
    Full,
    Half,
    Empty,
}

/// Network-wide settings and balances at one execution block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDetails {
    /// Current (not yet finalized) rewards interval
    pub reward_index: u64,
    /// Unix timestamp of the current interval's start
    pub interval_start: u64,
    /// Seconds
    pub interval_duration: u64,
    #[serde(with = "quoted")]
    pub pending_rpl_rewards: U256,
    #[serde(with = "quoted")]
    pub node_operator_rewards_percent: U256,
    #[serde(with = "quoted")]
    pub trusted_node_operator_rewards_percent: U256,
    #[serde(with = "quoted")]
    pub protocol_dao_rewards_percent: U256,
    #[serde(with = "quoted")]
    pub smoothing_pool_balance: U256,
    #[serde(with = "quoted")]
    pub rpl_price: U256,
    #[serde(with = "quoted")]
    pub min_collateral_fraction: U256,
    #[serde(with = "quoted")]
    pub max_collateral_fraction: U256,
    /// Execution block of the last submitted balances
    pub balances_block: u64,
    /// Most recent execution block balances may be reported for
    pub latest_reportable_balances_block: u64,
    #[serde(with = "quoted")]
    pub deposit_pool_balance: U256,
    #[serde(with = "quoted")]
    pub reth_contract_balance: U256,
    #[serde(with = "quoted")]
    pub reth_supply: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    pub address: Address,
    pub registration_time: u64,
    #[serde(with = "quoted")]
    pub rpl_stake: U256,
    pub reward_network: u64,
    pub smoothing_pool_registration_state: bool,
    /// Unix timestamp of the last opt-in/opt-out
    pub smoothing_pool_registration_changed: u64,
    /// User share of the node's fee distributor balance
    #[serde(with = "quoted")]
    pub distributor_balance_user_eth: U256,
    #[serde(with = "quoted")]
    pub deposit_credit_balance: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolDetails {
    pub address: Address,
    pub pubkey: ValidatorPubkey,
    pub node_address: Address,
    pub status: MinipoolStatus,
    /// Unix timestamp of the last status change
    pub status_time: u64,
    #[serde(default)]
    pub deposit_type: DepositType,
    /// Node bond
    #[serde(with = "quoted")]
    pub node_deposit_balance: U256,
    #[serde(with = "quoted")]
    pub user_deposit_balance: U256,
    #[serde(with = "quoted")]
    pub node_fee: U256,
    /// Zero if the bond was never reduced
    pub last_bond_reduction_time: u64,
    #[serde(with = "quoted")]
    pub last_bond_reduction_prev_value: U256,
    #[serde(with = "quoted")]
    pub last_bond_reduction_prev_node_fee: U256,
    pub penalty_count: u64,
    /// User share of (beacon balance + minipool balance - refund)
    #[serde(with = "quoted")]
    pub user_share_of_balance: U256,
    pub is_vacant: bool,
}

impl MinipoolDetails {
    /// Bond and commission in force at `block_time`.
    ///
    /// Before the last bond reduction the previous values apply. Minipools
    /// reduced before previous fees were tracked fall back to the current fee.
    pub fn bond_and_fee_at(&self, block_time: u64) -> (U256, U256) {
        if self.last_bond_reduction_time == 0 || block_time >= self.last_bond_reduction_time {
            return (self.node_deposit_balance, self.node_fee);
        }

        let fee = if self.last_bond_reduction_prev_node_fee.is_zero() {
            self.node_fee
        } else {
            self.last_bond_reduction_prev_node_fee
        };
        (self.last_bond_reduction_prev_value, fee)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleDaoMember {
    pub address: Address,
    /// Unix timestamp
    pub joined_time: u64,
}

/// Everything read from the protocol contracts at one execution block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolState {
    pub network: NetworkDetails,
    pub nodes: Vec<NodeDetails>,
    pub minipools: Vec<MinipoolDetails>,
    pub oracle_dao_members: Vec<OracleDaoMember>,
}

// =========================================================================
// Oracle artifacts shared between generator and submitter
// =========================================================================

/// On-chain interval finalization event, emitted once committee consensus
/// is reached for an interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsEvent {
    pub index: u64,
    pub merkle_root: B256,
    pub intervals_passed: u64,
    pub consensus_block: u64,
    pub execution_block: u64,
    pub interval_start_time: u64,
    pub interval_end_time: u64,
}

/// A committee member's vote for an interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSubmission {
    pub reward_index: u64,
    pub execution_block: u64,
    pub consensus_block: u64,
    pub merkle_root: B256,
    pub merkle_tree_cid: String,
    pub intervals_passed: u64,
    #[serde(with = "quoted")]
    pub treasury_rpl: U256,
    /// Indexed by network
    #[serde(with = "quoted::vec")]
    pub trusted_node_rpl: Vec<U256>,
    #[serde(with = "quoted::vec")]
    pub node_rpl: Vec<U256>,
    #[serde(with = "quoted::vec")]
    pub node_eth: Vec<U256>,
    #[serde(with = "quoted")]
    pub user_eth: U256,
}

/// Network balance report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBalances {
    pub block: u64,
    pub slot_timestamp: u64,
    #[serde(with = "quoted")]
    pub total_eth: U256,
    #[serde(with = "quoted")]
    pub staking_eth: U256,
    #[serde(with = "quoted")]
    pub reth_supply: U256,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minipool() -> MinipoolDetails {
        MinipoolDetails {
            address: Address::repeat_byte(1),
            pubkey: ValidatorPubkey::repeat_byte(2),
            node_address: Address::repeat_byte(3),
            status: MinipoolStatus::Staking,
            status_time: 0,
            deposit_type: DepositType::Variable,
            node_deposit_balance: eth_to_wei(8),
            user_deposit_balance: eth_to_wei(24),
            node_fee: U256::from(140_000_000_000_000_000u64),
            last_bond_reduction_time: 0,
            last_bond_reduction_prev_value: U256::ZERO,
            last_bond_reduction_prev_node_fee: U256::ZERO,
            penalty_count: 0,
            user_share_of_balance: eth_to_wei(24),
            is_vacant: false,
        }
    }

    #[test]
    fn test_epoch_math() {
        let cfg = BeaconConfig::mainnet();
        assert_eq!(cfg.epoch_of(0), 0);
        assert_eq!(cfg.epoch_of(31), 0);
        assert_eq!(cfg.epoch_of(32), 1);
        assert_eq!(cfg.first_slot_of_epoch(3), 96);
        assert_eq!(cfg.last_slot_of_epoch(3), 127);
    }

    #[test]
    fn test_slot_time_conversions() {
        let cfg = BeaconConfig {
            genesis_time: 1000,
            seconds_per_slot: 12,
            slots_per_epoch: 32,
        };
        assert_eq!(cfg.slot_time(10), 1120);
        assert_eq!(cfg.slot_at(1120), 10);
        assert_eq!(cfg.slot_at(1125), 10);
        assert_eq!(cfg.slot_at_or_after(1120), 10);
        assert_eq!(cfg.slot_at_or_after(1121), 11);
        assert_eq!(cfg.slot_at(500), 0);
    }

    #[test]
    fn test_attestation_bits() {
        let bits = AttestationInfo::bits_for(&[0, 3, 9], 12).unwrap();
        let att = AttestationInfo {
            slot: 1,
            committee_index: 0,
            aggregation_bits: bits,
        };
        assert!(att.bit_at(0));
        assert!(!att.bit_at(1));
        assert!(att.bit_at(3));
        assert!(att.bit_at(9));
        assert!(!att.bit_at(10));
        assert!(!att.bit_at(100));

        assert!(AttestationInfo::bits_for(&[12], 12).is_none());
        assert!(AttestationInfo::bits_for(&[0], 0).is_none());
        assert_eq!(AttestationInfo::bits_for(&[], 0), Some(vec![1]));
    }

    #[test]
    fn test_beacon_config_validate() {
        assert!(BeaconConfig::mainnet().validate().is_ok());

        let mut cfg = BeaconConfig::mainnet();
        cfg.slots_per_epoch = 0;
        assert!(matches!(
            cfg.validate(),
            Err(StakecraftError::InvalidBeaconConfig(_))
        ));

        let mut cfg = BeaconConfig::mainnet();
        cfg.seconds_per_slot = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bond_and_fee_without_reduction() {
        let mp = minipool();
        let (bond, fee) = mp.bond_and_fee_at(12345);
        assert_eq!(bond, eth_to_wei(8));
        assert_eq!(fee, mp.node_fee);
    }

    #[test]
    fn test_bond_and_fee_before_reduction() {
        let mut mp = minipool();
        mp.last_bond_reduction_time = 5000;
        mp.last_bond_reduction_prev_value = eth_to_wei(16);
        mp.last_bond_reduction_prev_node_fee = U256::from(50_000_000_000_000_000u64);

        let (bond, fee) = mp.bond_and_fee_at(4999);
        assert_eq!(bond, eth_to_wei(16));
        assert_eq!(fee, U256::from(50_000_000_000_000_000u64));

        let (bond, fee) = mp.bond_and_fee_at(5000);
        assert_eq!(bond, eth_to_wei(8));
        assert_eq!(fee, mp.node_fee);
    }

    #[test]
    fn test_bond_and_fee_missing_previous_fee() {
        let mut mp = minipool();
        mp.last_bond_reduction_time = 5000;
        mp.last_bond_reduction_prev_value = eth_to_wei(16);

        let (bond, fee) = mp.bond_and_fee_at(100);
        assert_eq!(bond, eth_to_wei(16));
        assert_eq!(fee, mp.node_fee);
    }

    #[test]
    fn test_minipool_json_uses_quoted_amounts() {
        let json = serde_json::to_value(minipool()).unwrap();
        assert_eq!(json["nodeDepositBalance"], "8000000000000000000");
        assert_eq!(json["status"], "staking");
    }

    #[test]
    fn test_unit_helpers() {
        assert_eq!(eth_to_wei(2), U256::from(2_000_000_000_000_000_000u64));
        assert_eq!(gwei_to_wei(32_000_000_000), eth_to_wei(32));
        assert!((wei_to_eth(&eth_to_wei(3)) - 3.0).abs() < 1e-9);
    }
}
