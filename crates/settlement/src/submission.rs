//! Rewards submission decisions

use std::fs;
use std::path::PathBuf;

use tracing::{error, info, warn};

use stakecraft_core::{Address, RewardSubmission, RewardsEvent, B256};

use crate::{OracleWriter, ProtocolReader, Result, TransactionHash};

/// Where this node's "already submitted" state lives.
///
/// Committee members vote on-chain, so the contract is the source of truth.
/// Other nodes only generate the tree and leave a marker file behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionRecord {
    OnChain(Address),
    LocalMarker(PathBuf),
}

impl SubmissionRecord {
    pub fn for_node(committee_member: bool, node: Address, marker: PathBuf) -> Self {
        if committee_member {
            Self::OnChain(node)
        } else {
            Self::LocalMarker(marker)
        }
    }

    pub async fn is_submitted(&self, reader: &dyn ProtocolReader, index: u64) -> Result<bool> {
        match self {
            Self::OnChain(node) => reader.has_submitted_rewards(*node, index).await,
            Self::LocalMarker(path) => Ok(path.exists()),
        }
    }

    /// Persist the submitted state. On-chain records need nothing.
    pub fn mark(&self) -> Result<()> {
        if let Self::LocalMarker(path) = self {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, b"")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionDecision {
    /// Nothing to do
    AlreadySubmitted,
    /// Consensus agrees with us but we have not voted yet
    Submit,
    /// No consensus yet, cast our vote
    SubmitVote,
    /// The finalized root differs from ours
    RootMismatch { local: B256, canonical: B256 },
}

/// Compare the local root against the on-chain event for the interval
pub fn decide(
    local_root: B256,
    event: Option<&RewardsEvent>,
    already_submitted: bool,
) -> SubmissionDecision {
    match event {
        Some(event) if event.merkle_root != local_root => SubmissionDecision::RootMismatch {
            local: local_root,
            canonical: event.merkle_root,
        },
        _ if already_submitted => SubmissionDecision::AlreadySubmitted,
        Some(_) => SubmissionDecision::Submit,
        None => SubmissionDecision::SubmitVote,
    }
}

/// Send a rewards vote. A rejection because another member already closed
/// the interval counts as success and yields `None`.
pub async fn submit_rewards(
    writer: &dyn OracleWriter,
    from: Address,
    submission: &RewardSubmission,
) -> Result<Option<TransactionHash>> {
    match writer.submit_reward_snapshot(from, submission).await {
        Ok(tx) => {
            info!(
                "Submitted rewards for interval {} (tx {})",
                submission.reward_index,
                hex::encode(&tx[..8])
            );
            Ok(Some(tx))
        }
        Err(e) if e.is_race() => {
            warn!(
                "Rewards for interval {} not submitted: {}",
                submission.reward_index, e
            );
            Ok(None)
        }
        Err(e) => {
            error!(
                "Submitting rewards for interval {} failed: {}",
                submission.reward_index, e
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockProtocol;
    use stakecraft_core::{NetworkDetails, ProtocolState, ONE_ETH, U256};

    fn event(root: u8) -> RewardsEvent {
        RewardsEvent {
            index: 7,
            merkle_root: B256::repeat_byte(root),
            intervals_passed: 1,
            consensus_block: 100,
            execution_block: 90,
            interval_start_time: 0,
            interval_end_time: 10,
        }
    }

    fn submission() -> RewardSubmission {
        RewardSubmission {
            reward_index: 7,
            execution_block: 90,
            consensus_block: 100,
            merkle_root: B256::repeat_byte(1),
            merkle_tree_cid: String::new(),
            intervals_passed: 1,
            treasury_rpl: U256::ZERO,
            trusted_node_rpl: vec![],
            node_rpl: vec![],
            node_eth: vec![],
            user_eth: U256::ZERO,
        }
    }

    fn protocol() -> MockProtocol {
        let mock = MockProtocol::new(1);
        mock.set_state(
            0,
            ProtocolState {
                network: NetworkDetails {
                    reward_index: 7,
                    interval_start: 0,
                    interval_duration: 10,
                    pending_rpl_rewards: U256::ZERO,
                    node_operator_rewards_percent: U256::ZERO,
                    trusted_node_operator_rewards_percent: U256::ZERO,
                    protocol_dao_rewards_percent: U256::ZERO,
                    smoothing_pool_balance: U256::ZERO,
                    rpl_price: ONE_ETH,
                    min_collateral_fraction: U256::ZERO,
                    max_collateral_fraction: U256::ZERO,
                    balances_block: 0,
                    latest_reportable_balances_block: 0,
                    deposit_pool_balance: U256::ZERO,
                    reth_contract_balance: U256::ZERO,
                    reth_supply: U256::ZERO,
                },
                nodes: vec![],
                minipools: vec![],
                oracle_dao_members: vec![],
            },
        );
        mock
    }

    #[test]
    fn test_decide_matching_root_already_submitted() {
        let root = B256::repeat_byte(1);
        assert_eq!(
            decide(root, Some(&event(1)), true),
            SubmissionDecision::AlreadySubmitted
        );
    }

    #[test]
    fn test_decide_matching_root_not_submitted() {
        let root = B256::repeat_byte(1);
        assert_eq!(decide(root, Some(&event(1)), false), SubmissionDecision::Submit);
    }

    #[test]
    fn test_decide_no_event_votes() {
        let root = B256::repeat_byte(1);
        assert_eq!(decide(root, None, false), SubmissionDecision::SubmitVote);
        assert_eq!(decide(root, None, true), SubmissionDecision::AlreadySubmitted);
    }

    #[test]
    fn test_decide_root_mismatch() {
        let root = B256::repeat_byte(1);
        assert_eq!(
            decide(root, Some(&event(2)), true),
            SubmissionDecision::RootMismatch {
                local: root,
                canonical: B256::repeat_byte(2),
            }
        );
    }

    #[test]
    fn test_local_marker_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("rewards").join("marker-7");
        let record = SubmissionRecord::for_node(false, Address::ZERO, marker.clone());
        assert_eq!(record, SubmissionRecord::LocalMarker(marker.clone()));

        record.mark().unwrap();
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_submission_record_lookup() {
        let mock = protocol();
        let node = Address::repeat_byte(9);
        let on_chain = SubmissionRecord::for_node(true, node, PathBuf::from("/unused"));
        assert!(!on_chain.is_submitted(&mock, 7).await.unwrap());

        submit_rewards(&mock, node, &submission()).await.unwrap();
        assert!(on_chain.is_submitted(&mock, 7).await.unwrap());

        let dir = tempfile::tempdir().unwrap();
        let marker = SubmissionRecord::LocalMarker(dir.path().join("m"));
        assert!(!marker.is_submitted(&mock, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_race_counts_as_success() {
        let mock = protocol();
        let first = submit_rewards(&mock, Address::repeat_byte(1), &submission())
            .await
            .unwrap();
        assert!(first.is_some());

        // Quorum of one: the interval is closed now
        let second = submit_rewards(&mock, Address::repeat_byte(2), &submission())
            .await
            .unwrap();
        assert!(second.is_none());
    }
}
