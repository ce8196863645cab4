//! Oracle reports: due-checks, network balances and rewards trees

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use stakecraft_beacon::BeaconClient;
use stakecraft_core::{Address, BeaconBlock, BeaconConfig, StakecraftError, StateSnapshot};
use stakecraft_merkle::ContentAddresser;
use stakecraft_records::RollingRecord;
use stakecraft_rewards::{
    calculate_network_balances, ArtifactStore, RewardsFile, RewardsInterval, TreeGenerator,
};
use stakecraft_settlement::{decide, submit_rewards, OracleWriter, SubmissionDecision, SubmissionRecord};
use stakecraft_state::SnapshotProvider;

use crate::Result;

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub node_address: Address,
    /// Committee members vote; other nodes only generate trees
    pub committee_member: bool,
    /// Used in artifact names and file headers
    pub network_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Rewards,
    Balances,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportOutcome {
    /// Our vote was accepted
    Submitted,
    /// Tree written, no vote cast (non-committee node)
    Generated,
    AlreadySubmitted,
    /// The interval closed before our vote landed
    ConsensusReached,
    RootMismatch,
}

/// Result of one report, kept in the daemon status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedReport {
    pub kind: ReportKind,
    pub slot: u64,
    pub execution_block: u64,
    pub interval: Option<u64>,
    pub merkle_root: Option<String>,
    pub outcome: ReportOutcome,
}

/// A rewards interval that has ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardsDue {
    pub interval: RewardsInterval,
    /// Last slot of the epoch containing the interval's end time
    pub target_slot: u64,
    pub already_submitted: bool,
}

/// A reportable balances block newer than the finalized one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancesDue {
    pub block: u64,
    pub target_slot: u64,
    pub already_submitted: bool,
}

/// The ended interval at `snapshot` and its target slot, if any.
///
/// Several whole intervals may have passed since the interval start; they
/// are covered by one tree.
pub fn rewards_due(snapshot: &StateSnapshot) -> Option<(RewardsInterval, u64)> {
    let network = &snapshot.network;
    if network.interval_duration == 0 {
        return None;
    }

    let elapsed = snapshot.slot_time().saturating_sub(network.interval_start);
    let intervals_passed = elapsed / network.interval_duration;
    if intervals_passed == 0 {
        return None;
    }

    let end_time = network.interval_start + network.interval_duration * intervals_passed;
    let config = snapshot.beacon;
    let end_slot = config.slot_at_or_after(end_time);
    let target_slot = config.last_slot_of_epoch(config.epoch_of(end_slot));

    Some((
        RewardsInterval {
            index: network.reward_index,
            intervals_passed,
            start_time: network.interval_start,
            end_time,
        },
        target_slot,
    ))
}

/// Slot whose start is at or before the balances block's timestamp
pub fn balances_target_slot(config: &BeaconConfig, block_time: u64) -> u64 {
    config.slot_at(block_time)
}

/// The block at `target`, or at the closest earlier slot that has one
pub async fn find_true_slot(beacon: &dyn BeaconClient, target: u64) -> Result<BeaconBlock> {
    let mut slot = target;
    loop {
        if let Some(block) = beacon.beacon_block(slot).await? {
            if slot != target {
                info!("Slot {} was missing, using slot {} instead", target, slot);
            }
            return Ok(block);
        }
        if slot == 0 {
            return Err(StakecraftError::SlotEmpty(target).into());
        }
        slot -= 1;
    }
}

/// Runs the due-checks and produces the reports
pub struct Reporter {
    provider: SnapshotProvider,
    writer: Arc<dyn OracleWriter>,
    artifacts: ArtifactStore,
    addresser: Arc<dyn ContentAddresser>,
    config: ReportConfig,
}

impl Reporter {
    pub fn new(
        provider: SnapshotProvider,
        writer: Arc<dyn OracleWriter>,
        artifacts: ArtifactStore,
        addresser: Arc<dyn ContentAddresser>,
        config: ReportConfig,
    ) -> Self {
        Self {
            provider,
            writer,
            artifacts,
            addresser,
            config,
        }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn submission_record(&self, index: u64) -> SubmissionRecord {
        SubmissionRecord::for_node(
            self.config.committee_member,
            self.config.node_address,
            self.artifacts.marker_path(index),
        )
    }

    /// Whether the current interval has ended at `head`
    pub async fn check_rewards(&self, head: &StateSnapshot) -> Result<Option<RewardsDue>> {
        let Some((interval, target_slot)) = rewards_due(head) else {
            return Ok(None);
        };

        let already_submitted = self
            .submission_record(interval.index)
            .is_submitted(self.provider.protocol().as_ref(), interval.index)
            .await?;

        info!(
            "Interval {} has ended ({} interval(s) passed), target slot {}",
            interval.index, interval.intervals_passed, target_slot
        );
        Ok(Some(RewardsDue {
            interval,
            target_slot,
            already_submitted,
        }))
    }

    /// Whether a balances report is due at `head`. Only committee members
    /// report balances.
    pub async fn check_balances(&self, head: &StateSnapshot) -> Result<Option<BalancesDue>> {
        if !self.config.committee_member {
            return Ok(None);
        }

        let network = &head.network;
        let block = network.latest_reportable_balances_block;
        if block <= network.balances_block {
            return Ok(None);
        }

        let protocol = self.provider.protocol();
        let block_time = protocol.block_timestamp(block).await?;
        let target_slot = balances_target_slot(&head.beacon, block_time);
        let already_submitted = protocol
            .has_submitted_balances(self.config.node_address, block)
            .await?;

        info!(
            "Balances for block {} are reportable, target slot {}",
            block, target_slot
        );
        Ok(Some(BalancesDue {
            block,
            target_slot,
            already_submitted,
        }))
    }

    /// Vote on the network balances at `snapshot`. `record` must end at
    /// the snapshot's slot.
    pub async fn report_balances(
        &self,
        snapshot: &StateSnapshot,
        record: &RollingRecord,
    ) -> Result<CompletedReport> {
        let network = &snapshot.network;
        let interval = RewardsInterval {
            index: network.reward_index,
            intervals_passed: 1,
            start_time: network.interval_start,
            end_time: snapshot.slot_time(),
        };
        let share = TreeGenerator::new(
            snapshot,
            record,
            self.provider.beacon().as_ref(),
            self.provider.protocol().as_ref(),
            &self.config.network_name,
            interval,
        )
        .approximate_staker_share()
        .await?;

        let balances = calculate_network_balances(snapshot, share);
        info!(
            "Network balances at block {}: total {} ETH, staking {} ETH, rETH supply {}",
            balances.block,
            stakecraft_core::wei_to_eth(&balances.total_eth),
            stakecraft_core::wei_to_eth(&balances.staking_eth),
            balances.reth_supply
        );

        let outcome = match self
            .writer
            .submit_network_balances(self.config.node_address, &balances)
            .await
        {
            Ok(tx) => {
                info!(
                    "Submitted balances for block {} (tx {})",
                    balances.block,
                    hex::encode(&tx[..8])
                );
                ReportOutcome::Submitted
            }
            Err(e) if e.is_race() => {
                warn!("Balances for block {} not submitted: {}", balances.block, e);
                ReportOutcome::AlreadySubmitted
            }
            Err(e) => return Err(e.into()),
        };

        Ok(CompletedReport {
            kind: ReportKind::Balances,
            slot: snapshot.slot,
            execution_block: snapshot.execution_block,
            interval: None,
            merkle_root: None,
            outcome,
        })
    }

    /// Generate (or reuse) the tree for `due` and vote on it.
    ///
    /// `snapshot` is taken at the interval's true end slot and `record`
    /// must end there.
    pub async fn report_rewards(
        &self,
        snapshot: &StateSnapshot,
        record: &RollingRecord,
        due: &RewardsDue,
    ) -> Result<CompletedReport> {
        let index = due.interval.index;
        let committee = self.config.committee_member;

        let existing = match self.artifacts.load_rewards(index)? {
            Some(file) if file.intervals_passed == due.interval.intervals_passed => Some(file),
            Some(file) => {
                warn!(
                    "Existing rewards file for interval {} covers {} interval(s) but {} passed; regenerating",
                    index, file.intervals_passed, due.interval.intervals_passed
                );
                None
            }
            None => None,
        };

        let (rewards, cid) = match existing {
            Some(file) => {
                info!("Reusing existing rewards file for interval {}", index);
                let cid = if committee {
                    Some(self.artifacts.publish_rewards(&file, self.addresser.as_ref())?)
                } else {
                    None
                };
                (file, cid)
            }
            None => self.generate_tree(snapshot, record, due).await?,
        };

        let root = rewards.root()?;
        let report = |outcome| CompletedReport {
            kind: ReportKind::Rewards,
            slot: snapshot.slot,
            execution_block: snapshot.execution_block,
            interval: Some(index),
            merkle_root: Some(rewards.merkle_root.clone()),
            outcome,
        };

        if !committee {
            self.submission_record(index).mark()?;
            info!("Generated tree for interval {} (root {})", index, root);
            return Ok(report(ReportOutcome::Generated));
        }

        let submission = rewards.submission(cid.as_deref().unwrap_or_default())?;
        let protocol = self.provider.protocol();
        let already_submitted = protocol
            .has_submitted_specific_rewards(self.config.node_address, &submission)
            .await?;
        let event = protocol.rewards_event(index).await?;

        let outcome = match decide(root, event.as_ref(), already_submitted) {
            SubmissionDecision::AlreadySubmitted => {
                info!("Already submitted rewards for interval {}", index);
                ReportOutcome::AlreadySubmitted
            }
            SubmissionDecision::RootMismatch { local, canonical } => {
                error!(
                    "Interval {} was finalized with root {} but ours is {}",
                    index, canonical, local
                );
                ReportOutcome::RootMismatch
            }
            SubmissionDecision::Submit | SubmissionDecision::SubmitVote => {
                match submit_rewards(self.writer.as_ref(), self.config.node_address, &submission)
                    .await?
                {
                    Some(_) => ReportOutcome::Submitted,
                    None => ReportOutcome::ConsensusReached,
                }
            }
        };

        Ok(report(outcome))
    }

    async fn generate_tree(
        &self,
        snapshot: &StateSnapshot,
        record: &RollingRecord,
        due: &RewardsDue,
    ) -> Result<(RewardsFile, Option<String>)> {
        let generated = TreeGenerator::new(
            snapshot,
            record,
            self.provider.beacon().as_ref(),
            self.provider.protocol().as_ref(),
            &self.config.network_name,
            due.interval,
        )
        .generate()
        .await?;

        let mut rewards = generated.rewards;
        let publish = self
            .config
            .committee_member
            .then(|| self.addresser.as_ref());
        let written = self
            .artifacts
            .write(&mut rewards, &generated.performance, publish)?;
        Ok((rewards, written.rewards_cid))
    }
}
