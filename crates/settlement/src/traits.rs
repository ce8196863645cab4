use async_trait::async_trait;
use stakecraft_core::{Address, NetworkBalances, ProtocolState, RewardSubmission, RewardsEvent};

use crate::{Result, TransactionHash};

/// Read access to the protocol contracts
#[async_trait]
pub trait ProtocolReader: Send + Sync {
    /// One consistent read of everything the oracle needs at `block`
    async fn protocol_state(&self, block: u64) -> Result<ProtocolState>;

    async fn block_timestamp(&self, block: u64) -> Result<u64>;

    /// Whether `network` is a valid reward network at `block`
    async fn network_enabled(&self, network: u64, block: u64) -> Result<bool>;

    /// The finalization event for interval `index`, if consensus was reached
    async fn rewards_event(&self, index: u64) -> Result<Option<RewardsEvent>>;

    /// Whether `node` has voted for interval `index` at all
    async fn has_submitted_rewards(&self, node: Address, index: u64) -> Result<bool>;

    /// Whether `node` has voted for exactly this submission
    async fn has_submitted_specific_rewards(
        &self,
        node: Address,
        submission: &RewardSubmission,
    ) -> Result<bool>;

    async fn has_submitted_balances(&self, node: Address, block: u64) -> Result<bool>;
}

/// Oracle committee votes
#[async_trait]
pub trait OracleWriter: Send + Sync {
    async fn submit_reward_snapshot(
        &self,
        from: Address,
        submission: &RewardSubmission,
    ) -> Result<TransactionHash>;

    async fn submit_network_balances(
        &self,
        from: Address,
        balances: &NetworkBalances,
    ) -> Result<TransactionHash>;
}
