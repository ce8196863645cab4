//! In-memory protocol contracts
//!
//! Tracks protocol state per execution block, committee votes and the
//! finalization events that follow once a quorum agrees. Pruning can be
//! simulated to exercise archive fallback.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use stakecraft_core::{
    Address, NetworkBalances, ProtocolState, RewardSubmission, RewardsEvent, B256,
};

use crate::{OracleWriter, ProtocolReader, Result, SettlementError, TransactionHash};

#[derive(Debug, Default)]
struct MockState {
    /// Protocol state keyed by the execution block it became valid at
    states: BTreeMap<u64, ProtocolState>,
    block_times: BTreeMap<u64, u64>,
    /// Reads below this block fail as pruned
    pruned_below: u64,
    enabled_networks: HashSet<u64>,
    events: BTreeMap<u64, RewardsEvent>,
    /// index -> node -> vote
    reward_votes: HashMap<u64, HashMap<Address, RewardSubmission>>,
    /// block -> node -> vote
    balance_votes: HashMap<u64, HashMap<Address, NetworkBalances>>,
    quorum: usize,
    tx_counter: u64,
}

impl MockState {
    fn generate_tx_hash(&mut self) -> TransactionHash {
        self.tx_counter += 1;
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&self.tx_counter.to_be_bytes());
        hash[8..16].copy_from_slice(b"mocktxn!");
        B256::from(hash)
    }

    fn latest_state_mut(&mut self) -> Option<&mut ProtocolState> {
        self.states.values_mut().next_back()
    }
}

/// Protocol contracts simulated in memory.
///
/// Cloning shares state, so several oracle nodes can vote against the same
/// mock.
#[derive(Debug, Clone)]
pub struct MockProtocol {
    state: Arc<RwLock<MockState>>,
}

impl Default for MockProtocol {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MockProtocol {
    /// Create a mock whose committee reaches consensus after `quorum` matching votes
    pub fn new(quorum: usize) -> Self {
        let state = MockState {
            quorum: quorum.max(1),
            enabled_networks: HashSet::from([0]),
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Protocol state in force from `block` onwards
    pub fn set_state(&self, block: u64, state: ProtocolState) {
        self.state.write().states.insert(block, state);
    }

    /// Apply `f` to the state in force at `block`, storing the result at `block`
    pub fn update_state<F>(&self, block: u64, f: F) -> Result<()>
    where
        F: FnOnce(&mut ProtocolState),
    {
        let mut state = self.state.write();
        let mut current = state
            .states
            .range(..=block)
            .next_back()
            .map(|(_, s)| s.clone())
            .ok_or_else(|| SettlementError::NotFound(format!("state at block {}", block)))?;
        f(&mut current);
        state.states.insert(block, current);
        Ok(())
    }

    pub fn set_block_time(&self, block: u64, timestamp: u64) {
        self.state.write().block_times.insert(block, timestamp);
    }

    pub fn enable_network(&self, network: u64) {
        self.state.write().enabled_networks.insert(network);
    }

    /// Make reads of blocks below `block` fail as pruned
    pub fn prune_below(&self, block: u64) {
        self.state.write().pruned_below = block;
    }

    /// Record a finalization event directly
    pub fn insert_event(&self, event: RewardsEvent) {
        self.state.write().events.insert(event.index, event);
    }

    /// Votes cast for interval `index`
    pub fn reward_votes(&self, index: u64) -> usize {
        self.state
            .read()
            .reward_votes
            .get(&index)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    pub fn balance_votes(&self, block: u64) -> usize {
        self.state
            .read()
            .balance_votes
            .get(&block)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Number of transactions accepted so far
    pub fn transaction_count(&self) -> u64 {
        self.state.read().tx_counter
    }
}

#[async_trait]
impl ProtocolReader for MockProtocol {
    async fn protocol_state(&self, block: u64) -> Result<ProtocolState> {
        let state = self.state.read();
        if block < state.pruned_below {
            return Err(SettlementError::StatePruned(block));
        }
        state
            .states
            .range(..=block)
            .next_back()
            .map(|(_, s)| s.clone())
            .ok_or_else(|| SettlementError::NotFound(format!("state at block {}", block)))
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        self.state
            .read()
            .block_times
            .get(&block)
            .copied()
            .ok_or_else(|| SettlementError::NotFound(format!("execution block {}", block)))
    }

    async fn network_enabled(&self, network: u64, _block: u64) -> Result<bool> {
        Ok(self.state.read().enabled_networks.contains(&network))
    }

    async fn rewards_event(&self, index: u64) -> Result<Option<RewardsEvent>> {
        Ok(self.state.read().events.get(&index).cloned())
    }

    async fn has_submitted_rewards(&self, node: Address, index: u64) -> Result<bool> {
        Ok(self
            .state
            .read()
            .reward_votes
            .get(&index)
            .is_some_and(|votes| votes.contains_key(&node)))
    }

    async fn has_submitted_specific_rewards(
        &self,
        node: Address,
        submission: &RewardSubmission,
    ) -> Result<bool> {
        Ok(self
            .state
            .read()
            .reward_votes
            .get(&submission.reward_index)
            .and_then(|votes| votes.get(&node))
            .is_some_and(|vote| vote == submission))
    }

    async fn has_submitted_balances(&self, node: Address, block: u64) -> Result<bool> {
        Ok(self
            .state
            .read()
            .balance_votes
            .get(&block)
            .is_some_and(|votes| votes.contains_key(&node)))
    }
}

#[async_trait]
impl OracleWriter for MockProtocol {
    async fn submit_reward_snapshot(
        &self,
        from: Address,
        submission: &RewardSubmission,
    ) -> Result<TransactionHash> {
        let index = submission.reward_index;
        info!(
            "[MOCK] Rewards vote from {} for interval {} (root {})",
            from,
            index,
            hex::encode(&submission.merkle_root[..8])
        );

        let mut state = self.state.write();
        if state.events.contains_key(&index) {
            return Err(SettlementError::ConsensusAlreadyReached(format!(
                "interval {}",
                index
            )));
        }

        let votes = state.reward_votes.entry(index).or_default();
        if votes.get(&from) == Some(submission) {
            return Err(SettlementError::AlreadySubmitted(format!("interval {}", index)));
        }
        votes.insert(from, submission.clone());
        let agreeing = votes.values().filter(|v| *v == submission).count();

        if agreeing >= state.quorum {
            let (start, end) = match state.latest_state_mut() {
                Some(latest) => {
                    let start = latest.network.interval_start;
                    let end = start + latest.network.interval_duration * submission.intervals_passed;
                    // The contract opens the next interval where this one ended
                    latest.network.reward_index = index + 1;
                    latest.network.interval_start = end;
                    (start, end)
                }
                None => (0, 0),
            };
            state.events.insert(
                index,
                RewardsEvent {
                    index,
                    merkle_root: submission.merkle_root,
                    intervals_passed: submission.intervals_passed,
                    consensus_block: submission.consensus_block,
                    execution_block: submission.execution_block,
                    interval_start_time: start,
                    interval_end_time: end,
                },
            );
            info!("[MOCK] Consensus reached for interval {}", index);
        }

        Ok(state.generate_tx_hash())
    }

    async fn submit_network_balances(
        &self,
        from: Address,
        balances: &NetworkBalances,
    ) -> Result<TransactionHash> {
        info!(
            "[MOCK] Balances vote from {} for block {}",
            from, balances.block
        );

        let mut state = self.state.write();
        let finalized_block = state
            .states
            .values()
            .next_back()
            .map(|s| s.network.balances_block)
            .unwrap_or(0);
        if finalized_block >= balances.block {
            return Err(SettlementError::ConsensusAlreadyReached(format!(
                "balances block {}",
                balances.block
            )));
        }

        let votes = state.balance_votes.entry(balances.block).or_default();
        if votes.contains_key(&from) {
            return Err(SettlementError::AlreadySubmitted(format!(
                "balances block {}",
                balances.block
            )));
        }
        votes.insert(from, balances.clone());
        let agreeing = votes.values().filter(|v| *v == balances).count();

        if agreeing >= state.quorum {
            if let Some(latest) = state.latest_state_mut() {
                latest.network.balances_block = balances.block;
                latest.network.reth_supply = balances.reth_supply;
            }
            debug!("[MOCK] Balances finalized at block {}", balances.block);
        }

        Ok(state.generate_tx_hash())
    }
}
