//! Rewards tree generation from a rolling record

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{info, warn};

use stakecraft_beacon::BeaconClient;
use stakecraft_core::{wei_to_eth, Address, StateSnapshot, ONE_ETH, U256};
use stakecraft_merkle::merkle::{merkle_leaf, MerkleTree};
use stakecraft_records::{MinipoolInfo, RollingRecord};
use stakecraft_settlement::ProtocolReader;

use crate::files::{
    MinipoolPerformance, NetworkRewards, NodeRewards, PerformanceFile, RewardsFile,
    REWARDS_FILE_VERSION, RULESET_VERSION,
};
use crate::weights::{self, MAX_COLLATERAL_FRACTION};
use crate::{RewardsError, Result};

/// Penalties at which a node forfeits its smoothing pool rewards
const CHEATER_PENALTY_COUNT: u64 = 3;

/// The interval a tree is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardsInterval {
    pub index: u64,
    pub intervals_passed: u64,
    pub start_time: u64,
    pub end_time: u64,
}

/// Output of a full generation run
#[derive(Debug, Clone)]
pub struct GeneratedTree {
    pub rewards: RewardsFile,
    pub performance: PerformanceFile,
    pub tree: MerkleTree,
}

/// Smoothing pool split before it is written into the file
struct EthSplit {
    pool_stakers: U256,
    node_operators: U256,
    /// Node -> (ETH, minipools with their share)
    nodes: BTreeMap<Address, (U256, Vec<(MinipoolInfo, U256)>)>,
}

/// Generates the rewards tree for one interval.
///
/// The snapshot must be taken at the interval's end slot and the record
/// must have been extended to that slot.
pub struct TreeGenerator<'a> {
    snapshot: &'a StateSnapshot,
    record: &'a RollingRecord,
    beacon: &'a dyn BeaconClient,
    protocol: &'a dyn ProtocolReader,
    interval: RewardsInterval,
    valid_networks: HashMap<u64, bool>,
    epsilon: U256,
    rewards: RewardsFile,
}

impl<'a> TreeGenerator<'a> {
    pub fn new(
        snapshot: &'a StateSnapshot,
        record: &'a RollingRecord,
        beacon: &'a dyn BeaconClient,
        protocol: &'a dyn ProtocolReader,
        network_name: &str,
        interval: RewardsInterval,
    ) -> Self {
        // Division truncation can lose at most one wei per participant
        let epsilon = U256::from(snapshot.nodes.len().max(snapshot.minipools.len()));

        let rewards = RewardsFile {
            rewards_file_version: REWARDS_FILE_VERSION,
            ruleset_version: RULESET_VERSION,
            index: interval.index,
            network: network_name.to_string(),
            start_time: interval.start_time,
            end_time: interval.end_time,
            consensus_end_block: snapshot.slot,
            execution_end_block: snapshot.execution_block,
            intervals_passed: interval.intervals_passed,
            ..Default::default()
        };

        Self {
            snapshot,
            record,
            beacon,
            protocol,
            interval,
            valid_networks: HashMap::from([(0, true)]),
            epsilon,
            rewards,
        }
    }

    pub async fn generate(mut self) -> Result<GeneratedTree> {
        info!(
            "[Interval {}] Generating tree using ruleset v{} for {} nodes",
            self.interval.index,
            RULESET_VERSION,
            self.snapshot.nodes.len()
        );

        self.calculate_rpl_rewards().await?;
        let eth = self.calculate_eth_rewards().await?;
        let performance = self.apply_eth_rewards(eth).await?;
        self.fill_networks();
        let tree = self.build_tree();

        Ok(GeneratedTree {
            rewards: self.rewards,
            performance,
            tree,
        })
    }

    /// Pool stakers' share of the smoothing pool, without the RPL pass or a tree
    pub async fn approximate_staker_share(mut self) -> Result<U256> {
        info!(
            "[Interval {}] Approximating pool staker share of the smoothing pool",
            self.interval.index
        );
        let split = self.calculate_eth_rewards().await?;
        Ok(split
            .map(|s| s.pool_stakers)
            .unwrap_or_default())
    }

    async fn validate_network(&mut self, network: u64) -> Result<bool> {
        if let Some(valid) = self.valid_networks.get(&network) {
            return Ok(*valid);
        }
        let valid = self
            .protocol
            .network_enabled(network, self.snapshot.execution_block)
            .await?;
        self.valid_networks.insert(network, valid);
        Ok(valid)
    }

    /// Entry for `address`, created on first use with its validated network
    async fn node_entry(&mut self, address: Address) -> Result<&mut NodeRewards> {
        if !self.rewards.node_rewards.contains_key(&address) {
            let requested = self
                .snapshot
                .node(&address)
                .map(|n| n.reward_network)
                .ok_or_else(|| RewardsError::MissingData(format!("node {} not in snapshot", address)))?;
            let network = if self.validate_network(requested).await? {
                requested
            } else {
                warn!(
                    "Node {} has invalid reward network {}, using network 0",
                    address, requested
                );
                self.rewards.invalid_network_nodes.insert(address, requested);
                0
            };
            self.rewards.node_rewards.insert(
                address,
                NodeRewards {
                    reward_network: network,
                    ..Default::default()
                },
            );
        }
        self.rewards
            .node_rewards
            .get_mut(&address)
            .ok_or_else(|| RewardsError::MissingData(format!("node {}", address)))
    }

    fn network_entry(&mut self, network: u64) -> &mut NetworkRewards {
        self.rewards.network_rewards.entry(network).or_default()
    }

    fn check_total(&self, what: &'static str, expected: U256, actual: U256) -> Result<U256> {
        let delta = if expected > actual {
            expected - actual
        } else {
            actual - expected
        };
        if delta > self.epsilon {
            return Err(RewardsError::SanityCheck {
                what,
                expected,
                actual,
            });
        }
        Ok(delta)
    }

    async fn calculate_rpl_rewards(&mut self) -> Result<()> {
        let network = self.snapshot.network.clone();
        let pending = network.pending_rpl_rewards;
        info!(
            "Pending RPL rewards: {} ({:.3})",
            pending,
            wei_to_eth(&pending)
        );
        if pending.is_zero() {
            return Err(RewardsError::NoPendingRpl(self.interval.index));
        }

        let mut pdao_rewards = pending * network.protocol_dao_rewards_percent / ONE_ETH;
        info!("Expected Protocol DAO rewards: {}", pdao_rewards);

        let collateral_total = pending * network.node_operator_rewards_percent / ONE_ETH;
        info!(
            "Approx. total collateral RPL rewards: {} ({:.3})",
            collateral_total,
            wei_to_eth(&collateral_total)
        );

        let stakes = weights::effective_stakes(self.snapshot, MAX_COLLATERAL_FRACTION);
        let node_weights = weights::node_weights(self.snapshot);

        if !stakes.total.is_zero() && !node_weights.total.is_zero() {
            self.rewards.total_rewards.total_node_weight = node_weights.total;

            let addresses: Vec<Address> = self.snapshot.nodes.iter().map(|n| n.address).collect();
            for address in addresses {
                let amount = weights::node_collateral_rewards(
                    network.reward_index,
                    collateral_total,
                    stakes.get(&address),
                    stakes.total,
                    node_weights.get(&address),
                    node_weights.total,
                );
                if amount.is_zero() {
                    continue;
                }
                let entry = self.node_entry(address).await?;
                entry.collateral_rpl += amount;
                let reward_network = entry.reward_network;
                self.network_entry(reward_network).collateral_rpl += amount;
            }

            let calculated: U256 = self
                .rewards
                .network_rewards
                .values()
                .fold(U256::ZERO, |acc, n| acc + n.collateral_rpl);
            let delta = self.check_total("collateral RPL", collateral_total, calculated)?;
            self.rewards.total_rewards.total_collateral_rpl = calculated;
            info!("Calculated collateral rewards: {} (error = {} wei)", calculated, delta);
            pdao_rewards = pending - calculated;
        } else {
            pdao_rewards += collateral_total;
            info!(
                "No node was eligible for collateral rewards, sending everything to the pDAO; now at {}",
                pdao_rewards
            );
        }

        let odao_total = pending * network.trusted_node_operator_rewards_percent / ONE_ETH;
        info!(
            "Total Oracle DAO RPL rewards: {} ({:.3})",
            odao_total,
            wei_to_eth(&odao_total)
        );

        let snapshot_time = self.snapshot.execution_block_time;
        let participation: Vec<(Address, U256)> = self
            .snapshot
            .oracle_dao_members
            .iter()
            .map(|m| {
                let served = snapshot_time
                    .saturating_sub(m.joined_time)
                    .min(network.interval_duration);
                (m.address, U256::from(served))
            })
            .collect();
        let total_time = participation
            .iter()
            .fold(U256::ZERO, |acc, (_, t)| acc + *t);

        if !total_time.is_zero() {
            for (address, time) in participation {
                let amount = time * odao_total / total_time;
                let entry = self.node_entry(address).await?;
                entry.oracle_dao_rpl += amount;
                let reward_network = entry.reward_network;
                self.network_entry(reward_network).oracle_dao_rpl += amount;
            }
        }

        let calculated: U256 = self
            .rewards
            .network_rewards
            .values()
            .fold(U256::ZERO, |acc, n| acc + n.oracle_dao_rpl);
        let delta = self.check_total("Oracle DAO RPL", odao_total, calculated)?;
        self.rewards.total_rewards.total_oracle_dao_rpl = calculated;
        info!("Calculated Oracle DAO rewards: {} (error = {} wei)", calculated, delta);

        pdao_rewards = pdao_rewards.saturating_sub(calculated);
        self.rewards.total_rewards.protocol_dao_rpl = pdao_rewards;
        info!(
            "Actual Protocol DAO rewards: {} to account for truncation",
            pdao_rewards
        );
        Ok(())
    }

    /// Nodes with any minipool at or above the penalty threshold
    fn cheaters(&self) -> HashSet<Address> {
        self.snapshot
            .minipools
            .iter()
            .filter(|mp| mp.penalty_count >= CHEATER_PENALTY_COUNT)
            .map(|mp| mp.node_address)
            .collect()
    }

    /// Split the smoothing pool. `None` when there is nothing to split.
    async fn calculate_eth_rewards(&mut self) -> Result<Option<EthSplit>> {
        let balance = self.snapshot.network.smoothing_pool_balance;
        info!(
            "Smoothing pool balance: {} ({:.3})",
            balance,
            wei_to_eth(&balance)
        );
        // The first interval has no discrete start, so it pays no ETH
        if balance.is_zero() || self.interval.index == 0 {
            return Ok(None);
        }

        self.set_start_blocks().await?;

        let record = self.record;
        let cheaters = self.cheaters();
        let (minipools, total_score, attestation_count) = record.get_scores(&cheaters);
        if total_score.is_zero() || attestation_count == 0 {
            warn!(
                "Total attestation score = {}, successful attestations = {}; sending the whole smoothing pool balance to the pool stakers",
                total_score, attestation_count
            );
            return Ok(Some(EthSplit {
                pool_stakers: balance,
                node_operators: U256::ZERO,
                nodes: BTreeMap::new(),
            }));
        }

        let node_op_share =
            balance * total_score / U256::from(attestation_count) / ONE_ETH;

        let mut nodes: BTreeMap<Address, (U256, Vec<(MinipoolInfo, U256)>)> = BTreeMap::new();
        for mp in minipools {
            let share = node_op_share * mp.attestation_score / total_score;
            let entry = nodes.entry(mp.node_address).or_default();
            entry.0 += share;
            entry.1.push((mp.clone(), share));
        }

        let node_operators = nodes.values().fold(U256::ZERO, |acc, (eth, _)| acc + *eth);
        let delta = self.check_total("smoothing pool ETH", node_op_share, node_operators)?;
        let pool_stakers = balance - node_operators;

        info!(
            "Pool staker ETH: {} ({:.3})",
            balance - node_op_share,
            wei_to_eth(&(balance - node_op_share))
        );
        info!("Node Op ETH: {} ({:.3})", node_op_share, wei_to_eth(&node_op_share));
        info!("Calculated NO ETH: {} (error = {} wei)", node_operators, delta);
        info!("Adjusting pool staker ETH to {} to account for truncation", pool_stakers);

        Ok(Some(EthSplit {
            pool_stakers,
            node_operators,
            nodes,
        }))
    }

    /// Start blocks come from the record's first slot
    async fn set_start_blocks(&mut self) -> Result<()> {
        let start_slot = self.record.start_slot;
        let block = self.beacon.beacon_block(start_slot).await?.ok_or_else(|| {
            RewardsError::MissingData(format!(
                "no beacon block at interval start slot {}; the beacon node may not have backfilled that far",
                start_slot
            ))
        })?;
        self.rewards.consensus_start_block = start_slot;
        self.rewards.execution_start_block = block.execution_block_number;
        Ok(())
    }

    async fn apply_eth_rewards(&mut self, split: Option<EthSplit>) -> Result<PerformanceFile> {
        let mut performance = PerformanceFile {
            rewards_file_version: REWARDS_FILE_VERSION,
            ruleset_version: RULESET_VERSION,
            index: self.interval.index,
            network: self.rewards.network.clone(),
            start_time: self.interval.start_time,
            end_time: self.interval.end_time,
            consensus_start_block: self.rewards.consensus_start_block,
            consensus_end_block: self.rewards.consensus_end_block,
            execution_start_block: self.rewards.execution_start_block,
            execution_end_block: self.rewards.execution_end_block,
            minipool_performance: BTreeMap::new(),
        };

        let Some(split) = split else {
            return Ok(performance);
        };

        for (address, (eth, minipools)) in split.nodes {
            if eth.is_zero() {
                continue;
            }
            let entry = self.node_entry(address).await?;
            entry.smoothing_pool_eth += eth;
            let reward_network = entry.reward_network;
            self.network_entry(reward_network).smoothing_pool_eth += eth;

            for (mp, share) in minipools {
                let missed = mp.missing_attestation_slots.len() as u64;
                if mp.attestation_count + missed == 0 {
                    continue;
                }
                performance.minipool_performance.insert(
                    mp.address,
                    MinipoolPerformance {
                        pubkey: mp.pubkey,
                        successful_attestations: mp.attestation_count,
                        missed_attestations: missed,
                        attestation_score: mp.attestation_score,
                        eth_earned: share,
                        missing_attestation_slots: mp.missing_attestation_slots.into_iter().collect(),
                    },
                );
            }
        }

        let totals = &mut self.rewards.total_rewards;
        totals.pool_staker_smoothing_pool_eth = split.pool_stakers;
        totals.node_operator_smoothing_pool_eth = split.node_operators;
        totals.total_smoothing_pool_eth = self.snapshot.network.smoothing_pool_balance;
        Ok(performance)
    }

    /// Give every network up to the highest used one an entry
    fn fill_networks(&mut self) {
        let highest = self
            .rewards
            .network_rewards
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0);
        for network in 0..=highest {
            self.network_entry(network);
        }
    }

    fn build_tree(&mut self) -> MerkleTree {
        let leaves: Vec<(Address, _)> = self
            .rewards
            .node_rewards
            .iter()
            .filter(|(_, node)| !node.is_empty())
            .map(|(address, node)| (*address, merkle_leaf(&node.leaf_data(address))))
            .collect();
        let tree = MerkleTree::from_leaves(leaves.iter().map(|(_, leaf)| *leaf).collect());

        for (i, (address, _)) in leaves.iter().enumerate() {
            if let (Some(node), Some(proof)) =
                (self.rewards.node_rewards.get_mut(address), tree.proof(i))
            {
                node.merkle_proof = proof.to_hex_strings();
            }
        }

        self.rewards.merkle_root = format!("{:#x}", tree.root());
        info!(
            "[Interval {}] Merkle root {} over {} nodes",
            self.interval.index,
            self.rewards.merkle_root,
            leaves.len()
        );
        tree
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use stakecraft_beacon::MockBeaconClient;
    use stakecraft_core::{
        eth_to_wei, BeaconConfig, DepositType, MinipoolDetails, MinipoolStatus, NetworkDetails,
        NodeDetails, OracleDaoMember, ProtocolState, ValidatorPubkey, ValidatorStatus, B256,
        FAR_FUTURE_EPOCH,
    };
    use stakecraft_records::attestation_score;
    use stakecraft_settlement::MockProtocol;

    use super::*;

    const NODE_A: Address = Address::repeat_byte(0x0a);
    const NODE_B: Address = Address::repeat_byte(0x0b);
    const NODE_C: Address = Address::repeat_byte(0x0c);

    fn beacon_config() -> BeaconConfig {
        BeaconConfig {
            genesis_time: 0,
            seconds_per_slot: 1,
            slots_per_epoch: 32,
        }
    }

    fn network() -> NetworkDetails {
        NetworkDetails {
            reward_index: 20,
            interval_start: 220,
            interval_duration: 100,
            pending_rpl_rewards: eth_to_wei(1000),
            node_operator_rewards_percent: U256::from(700_000_000_000_000_000u64),
            trusted_node_operator_rewards_percent: U256::from(50_000_000_000_000_000u64),
            protocol_dao_rewards_percent: U256::from(250_000_000_000_000_000u64),
            smoothing_pool_balance: eth_to_wei(10),
            rpl_price: U256::from(10_000_000_000_000_000u64),
            min_collateral_fraction: U256::from(100_000_000_000_000_000u64),
            max_collateral_fraction: U256::from(1_500_000_000_000_000_000u64),
            balances_block: 0,
            latest_reportable_balances_block: 0,
            deposit_pool_balance: U256::ZERO,
            reth_contract_balance: U256::ZERO,
            reth_supply: U256::ZERO,
        }
    }

    fn node(address: Address, stake_rpl: u64, reward_network: u64) -> NodeDetails {
        NodeDetails {
            address,
            registration_time: 0,
            rpl_stake: eth_to_wei(stake_rpl),
            reward_network,
            smoothing_pool_registration_state: true,
            smoothing_pool_registration_changed: 0,
            distributor_balance_user_eth: U256::ZERO,
            deposit_credit_balance: U256::ZERO,
        }
    }

    fn minipool(seed: u8, node_address: Address, penalty_count: u64) -> MinipoolDetails {
        MinipoolDetails {
            address: Address::repeat_byte(seed),
            pubkey: ValidatorPubkey::repeat_byte(seed),
            node_address,
            status: MinipoolStatus::Staking,
            status_time: 0,
            deposit_type: DepositType::Variable,
            node_deposit_balance: eth_to_wei(8),
            user_deposit_balance: eth_to_wei(24),
            node_fee: U256::from(140_000_000_000_000_000u64),
            last_bond_reduction_time: 0,
            last_bond_reduction_prev_value: U256::ZERO,
            last_bond_reduction_prev_node_fee: U256::ZERO,
            penalty_count,
            user_share_of_balance: U256::ZERO,
            is_vacant: false,
        }
    }

    fn validator(seed: u8) -> (ValidatorPubkey, ValidatorStatus) {
        let pubkey = ValidatorPubkey::repeat_byte(seed);
        (
            pubkey,
            ValidatorStatus {
                index: seed as u64,
                pubkey,
                activation_epoch: 0,
                exit_epoch: FAR_FUTURE_EPOCH,
                effective_balance: 32_000_000_000,
                balance: 32_000_000_000,
                withdrawal_credentials: B256::ZERO,
            },
        )
    }

    /// A: 500 RPL on network 1. B: 240 RPL on disabled network 5, with a
    /// penalized minipool. C: oracle DAO member without minipools.
    fn snapshot(network: NetworkDetails) -> StateSnapshot {
        let protocol = ProtocolState {
            network,
            nodes: vec![node(NODE_A, 500, 1), node(NODE_B, 240, 5), node(NODE_C, 0, 0)],
            minipools: vec![
                minipool(0xa1, NODE_A, 0),
                minipool(0xa2, NODE_A, 0),
                minipool(0xb1, NODE_B, 3),
            ],
            oracle_dao_members: vec![OracleDaoMember {
                address: NODE_C,
                joined_time: 0,
            }],
        };
        let validators: HashMap<_, _> = [validator(0xa1), validator(0xb1)].into_iter().collect();
        StateSnapshot::new(320, 900, 320, beacon_config(), protocol, validators)
    }

    fn record_entry(seed: u8, node_address: Address, count: u64, missing: &[u64]) -> MinipoolInfo {
        let per_attestation = attestation_score(eth_to_wei(8), U256::from(140_000_000_000_000_000u64));
        MinipoolInfo {
            address: Address::repeat_byte(seed),
            pubkey: ValidatorPubkey::repeat_byte(seed),
            index: seed as u64,
            node_address,
            missing_attestation_slots: missing.iter().copied().collect::<BTreeSet<_>>(),
            attestation_score: per_attestation * U256::from(count),
            attestation_count: count,
        }
    }

    fn record() -> RollingRecord {
        let mut record = RollingRecord::new(32, 20);
        record.last_duties_slot = 320;
        for mp in [
            record_entry(0xa1, NODE_A, 2, &[300, 40]),
            record_entry(0xa2, NODE_A, 0, &[]),
            record_entry(0xb1, NODE_B, 5, &[]),
        ] {
            record.validator_index_map.insert(mp.index, mp);
        }
        record
    }

    fn chain() -> (MockBeaconClient, MockProtocol) {
        let beacon = MockBeaconClient::new(beacon_config());
        beacon.insert_block(32, 77);
        let protocol = MockProtocol::default();
        protocol.enable_network(1);
        (beacon, protocol)
    }

    fn interval(index: u64) -> RewardsInterval {
        RewardsInterval {
            index,
            intervals_passed: 1,
            start_time: 220,
            end_time: 320,
        }
    }

    async fn generate(network: NetworkDetails) -> Result<GeneratedTree> {
        let (beacon, protocol) = chain();
        let snapshot = snapshot(network.clone());
        let record = record();
        TreeGenerator::new(
            &snapshot,
            &record,
            &beacon,
            &protocol,
            "testnet",
            interval(network.reward_index),
        )
        .generate()
        .await
    }

    #[tokio::test]
    async fn test_rpl_distribution() {
        let out = generate(network()).await.unwrap();
        let file = &out.rewards;

        let a = &file.node_rewards[&NODE_A];
        let b = &file.node_rewards[&NODE_B];
        let c = &file.node_rewards[&NODE_C];
        assert_eq!(a.collateral_rpl, U256::from(460_271_560_837_262_595_140u128));
        assert_eq!(b.collateral_rpl, U256::from(239_728_439_162_737_404_858u128));
        assert_eq!(c.collateral_rpl, U256::ZERO);
        assert_eq!(c.oracle_dao_rpl, eth_to_wei(50));

        let totals = &file.total_rewards;
        assert_eq!(totals.total_collateral_rpl, U256::from(699_999_999_999_999_999_998u128));
        assert_eq!(totals.total_oracle_dao_rpl, eth_to_wei(50));
        // Truncation dust goes to the protocol DAO
        assert_eq!(totals.protocol_dao_rpl, U256::from(250_000_000_000_000_000_002u128));
        assert_eq!(
            totals.protocol_dao_rpl + totals.total_collateral_rpl + totals.total_oracle_dao_rpl,
            eth_to_wei(1000)
        );
        assert!(!totals.total_node_weight.is_zero());
    }

    #[tokio::test]
    async fn test_invalid_network_rerouted() {
        let out = generate(network()).await.unwrap();
        let file = &out.rewards;

        assert_eq!(file.node_rewards[&NODE_A].reward_network, 1);
        assert_eq!(file.node_rewards[&NODE_B].reward_network, 0);
        assert_eq!(file.invalid_network_nodes.get(&NODE_B), Some(&5));
        assert_eq!(file.invalid_network_nodes.len(), 1);
        assert_eq!(file.network_rewards.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(
            file.network_rewards[&1].collateral_rpl,
            file.node_rewards[&NODE_A].collateral_rpl
        );
    }

    #[tokio::test]
    async fn test_smoothing_pool_split() {
        let out = generate(network()).await.unwrap();
        let file = &out.rewards;

        // Only A's 2 attestations count (B is penalized): 10 * 0.71 / 2
        let node_share = U256::from(3_550_000_000_000_000_000u64);
        assert_eq!(file.node_rewards[&NODE_A].smoothing_pool_eth, node_share);
        assert_eq!(file.node_rewards[&NODE_B].smoothing_pool_eth, U256::ZERO);
        assert_eq!(file.total_rewards.node_operator_smoothing_pool_eth, node_share);
        assert_eq!(
            file.total_rewards.pool_staker_smoothing_pool_eth,
            eth_to_wei(10) - node_share
        );
        assert_eq!(file.total_rewards.total_smoothing_pool_eth, eth_to_wei(10));
        assert_eq!(file.network_rewards[&1].smoothing_pool_eth, node_share);

        assert_eq!(file.consensus_start_block, 32);
        assert_eq!(file.execution_start_block, 77);
        assert_eq!(file.consensus_end_block, 320);
        assert_eq!(file.execution_end_block, 900);
    }

    #[tokio::test]
    async fn test_performance_file() {
        let out = generate(network()).await.unwrap();
        let perf = &out.performance.minipool_performance;

        // a2 had no duties, b1 belongs to a penalized node
        assert_eq!(perf.len(), 1);
        let a1 = &perf[&Address::repeat_byte(0xa1)];
        assert_eq!(a1.successful_attestations, 2);
        assert_eq!(a1.missed_attestations, 2);
        assert_eq!(a1.missing_attestation_slots, vec![40, 300]);
        assert_eq!(a1.eth_earned, U256::from(3_550_000_000_000_000_000u64));
        assert_eq!(out.performance.execution_start_block, 77);
    }

    #[tokio::test]
    async fn test_proofs_verify_against_root() {
        let out = generate(network()).await.unwrap();
        let file = &out.rewards;
        assert_eq!(file.root().unwrap(), out.tree.root());
        assert_eq!(out.tree.leaf_count(), 3);
        for address in [NODE_A, NODE_B, NODE_C] {
            assert_eq!(file.verify_node(&address).unwrap(), Some(true));
        }
    }

    #[tokio::test]
    async fn test_generation_is_deterministic() {
        let first = generate(network()).await.unwrap();
        let second = generate(network()).await.unwrap();
        assert_eq!(first.rewards, second.rewards);
        assert_eq!(
            first.rewards.to_bytes().unwrap(),
            second.rewards.to_bytes().unwrap()
        );
    }

    #[tokio::test]
    async fn test_no_pending_rpl_fails() {
        let mut n = network();
        n.pending_rpl_rewards = U256::ZERO;
        let err = generate(n).await.unwrap_err();
        assert!(matches!(err, RewardsError::NoPendingRpl(20)));
    }

    #[tokio::test]
    async fn test_no_eligible_nodes_pays_pdao() {
        let mut n = network();
        // Nobody meets the minimum collateral
        n.min_collateral_fraction = eth_to_wei(10);
        let out = generate(n).await.unwrap();
        let totals = &out.rewards.total_rewards;
        assert_eq!(totals.total_collateral_rpl, U256::ZERO);
        assert_eq!(totals.protocol_dao_rpl, eth_to_wei(900));
        assert_eq!(totals.total_node_weight, U256::ZERO);
    }

    #[tokio::test]
    async fn test_first_interval_has_no_eth() {
        let mut n = network();
        n.reward_index = 0;
        let out = generate(n).await.unwrap();
        let totals = &out.rewards.total_rewards;
        assert_eq!(totals.total_smoothing_pool_eth, U256::ZERO);
        assert_eq!(totals.pool_staker_smoothing_pool_eth, U256::ZERO);
        assert!(out.performance.minipool_performance.is_empty());
        assert_eq!(out.rewards.execution_start_block, 0);
    }

    #[tokio::test]
    async fn test_missing_start_block_fails() {
        let beacon = MockBeaconClient::new(beacon_config());
        let protocol = MockProtocol::default();
        let snapshot = snapshot(network());
        let record = record();
        let err = TreeGenerator::new(&snapshot, &record, &beacon, &protocol, "testnet", interval(20))
            .generate()
            .await
            .unwrap_err();
        assert!(matches!(err, RewardsError::MissingData(_)));
    }

    #[tokio::test]
    async fn test_approximate_staker_share() {
        let (beacon, protocol) = chain();
        let snapshot = snapshot(network());
        let record = record();
        let share = TreeGenerator::new(&snapshot, &record, &beacon, &protocol, "testnet", interval(20))
            .approximate_staker_share()
            .await
            .unwrap();
        assert_eq!(share, eth_to_wei(10) - U256::from(3_550_000_000_000_000_000u64));
    }
}
