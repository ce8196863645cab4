use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use semver::Version;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use stakecraft_beacon::BeaconClient;
use stakecraft_core::{
    quoted, Address, AttestationInfo, MinipoolStatus, Result, StakecraftError, StateSnapshot,
    ValidatorIndex, ValidatorPubkey, U256,
};

use crate::duties::{attestation_score, PendingDuties, Positions};

/// Software version stamped into every record
pub const RECORD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oldest record version whose scoring matches this build
pub const MIN_COMPATIBLE_VERSION: Version = Version::new(0, 1, 0);

/// Attestation performance of one minipool validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolInfo {
    pub address: Address,
    pub pubkey: ValidatorPubkey,
    pub index: ValidatorIndex,
    pub node_address: Address,
    /// Duty slots not (yet) matched by an included attestation
    pub missing_attestation_slots: BTreeSet<u64>,
    #[serde(with = "quoted")]
    pub attestation_score: U256,
    pub attestation_count: u64,
}

impl MinipoolInfo {
    fn is_active(&self) -> bool {
        self.attestation_count > 0 || !self.missing_attestation_slots.is_empty()
    }
}

/// Smoothing pool attestation record for one rewards interval.
///
/// `last_duties_slot` is the last slot whose duties have been collected and
/// scored; zero means the record is fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingRecord {
    pub start_slot: u64,
    pub last_duties_slot: u64,
    #[serde(serialize_with = "serialize_active")]
    pub validator_index_map: BTreeMap<ValidatorIndex, MinipoolInfo>,
    pub rewards_interval: u64,
    #[serde(default)]
    pub version: String,
}

fn serialize_active<S: Serializer>(
    map: &BTreeMap<ValidatorIndex, MinipoolInfo>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(map.iter().filter(|(_, mp)| mp.is_active()))
}

impl RollingRecord {
    pub fn new(start_slot: u64, rewards_interval: u64) -> Self {
        Self {
            start_slot,
            last_duties_slot: 0,
            validator_index_map: BTreeMap::new(),
            rewards_interval,
            version: RECORD_VERSION.to_string(),
        }
    }

    /// Canonical JSON encoding. Minipools with no duties are omitted.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Whether the record was written by a build at or after
    /// [`MIN_COMPATIBLE_VERSION`]. Records without a version predate it.
    pub fn is_compatible(&self) -> bool {
        match Version::parse(&self.version) {
            Ok(version) => version >= MIN_COMPATIBLE_VERSION,
            Err(_) => false,
        }
    }

    /// First slot the next update will collect duties for
    pub fn next_slot(&self) -> u64 {
        if self.last_duties_slot == 0 {
            self.start_slot
        } else {
            self.last_duties_slot + 1
        }
    }

    /// Scores of minipools not belonging to `cheaters`, with the total score
    /// and total attestation count across them.
    pub fn get_scores(&self, cheaters: &HashSet<Address>) -> (Vec<&MinipoolInfo>, U256, u64) {
        let mut total_score = U256::ZERO;
        let mut total_count = 0u64;
        let minipools: Vec<&MinipoolInfo> = self
            .validator_index_map
            .values()
            .filter(|mp| !cheaters.contains(&mp.node_address))
            .inspect(|mp| {
                total_score += mp.attestation_score;
                total_count += mp.attestation_count;
            })
            .collect();
        (minipools, total_score, total_count)
    }

    /// Extend the record to `target_slot`.
    ///
    /// Requires the epoch after `target_slot` to be finalized so late
    /// attestations for the final slots are seen. The update runs on a copy
    /// and only replaces `self` once it has fully succeeded.
    pub async fn update_to_slot(
        &mut self,
        beacon: &dyn BeaconClient,
        snapshot: &StateSnapshot,
        target_slot: u64,
        thread_limit: usize,
    ) -> Result<()> {
        if self.last_duties_slot != 0 {
            if target_slot < self.last_duties_slot {
                return Err(StakecraftError::RecordRegression {
                    target: target_slot,
                    last: self.last_duties_slot,
                });
            }
            if target_slot == self.last_duties_slot {
                debug!("Record already at slot {}, nothing to do", target_slot);
                return Ok(());
            }
        }

        let mut working = self.clone();
        working
            .apply_update(beacon, snapshot, target_slot, thread_limit.max(1))
            .await?;
        *self = working;
        Ok(())
    }

    async fn apply_update(
        &mut self,
        beacon: &dyn BeaconClient,
        snapshot: &StateSnapshot,
        target_slot: u64,
        thread_limit: usize,
    ) -> Result<()> {
        let config = snapshot.beacon;
        let start_epoch = config.epoch_of(self.next_slot());
        let target_epoch = config.epoch_of(target_slot);
        let started = Instant::now();

        self.update_validator_indices(snapshot);

        let mut duties = PendingDuties::default();
        for epoch in start_epoch..=target_epoch {
            self.collect_duties(beacon, snapshot, epoch, target_slot, &mut duties)
                .await?;
            self.process_attestations_in_epoch(beacon, snapshot, epoch, &mut duties, thread_limit)
                .await?;
            if epoch % 100 == 0 {
                debug!(
                    "Processed up to epoch {} ({:.1?} so far)",
                    epoch,
                    started.elapsed()
                );
            }
        }

        // Attestations for the last slots land in the following epoch
        self.process_attestations_in_epoch(
            beacon,
            snapshot,
            target_epoch + 1,
            &mut duties,
            thread_limit,
        )
        .await?;

        debug!(
            "Record updated to slot {} in {:.1?}, {} duties unmatched",
            target_slot,
            started.elapsed(),
            duties.len()
        );
        Ok(())
    }

    /// Track staking minipools whose validators have appeared on the beacon chain
    fn update_validator_indices(&mut self, snapshot: &StateSnapshot) {
        for mp in &snapshot.minipools {
            let Some(validator) = snapshot.validator(&mp.pubkey) else {
                continue;
            };
            if mp.status != MinipoolStatus::Staking
                || self.validator_index_map.contains_key(&validator.index)
            {
                continue;
            }
            self.validator_index_map.insert(
                validator.index,
                MinipoolInfo {
                    address: mp.address,
                    pubkey: mp.pubkey,
                    index: validator.index,
                    node_address: mp.node_address,
                    missing_attestation_slots: BTreeSet::new(),
                    attestation_score: U256::ZERO,
                    attestation_count: 0,
                },
            );
        }
    }

    /// Collect the duties of tracked minipools in `epoch` up to `end_slot`
    async fn collect_duties(
        &mut self,
        beacon: &dyn BeaconClient,
        snapshot: &StateSnapshot,
        epoch: u64,
        end_slot: u64,
        duties: &mut PendingDuties,
    ) -> Result<()> {
        let config = snapshot.beacon;
        let last_slot_in_epoch = config.last_slot_of_epoch(epoch);
        if self.last_duties_slot >= last_slot_in_epoch {
            debug!("All duties already collected for epoch {}, skipping", epoch);
            return Ok(());
        }

        let committees = beacon.committees(epoch).await?;
        for committee in &committees {
            let slot = committee.slot;
            if slot < self.start_slot || slot > end_slot || slot <= self.last_duties_slot {
                continue;
            }
            let block_time = config.slot_time(slot);

            let mut positions = Positions::new();
            for (position, validator) in committee.validators.iter().enumerate() {
                let Some(info) = self.validator_index_map.get_mut(validator) else {
                    continue;
                };
                let Some(node) = snapshot.node(&info.node_address) else {
                    continue;
                };

                // Only slots while the node was opted into the smoothing pool count
                let changed = node.smoothing_pool_registration_changed;
                let opted_in = node.smoothing_pool_registration_state;
                if (opted_in && block_time < changed) || (!opted_in && changed < block_time) {
                    continue;
                }

                let Some(mp) = snapshot.minipool(&info.address) else {
                    continue;
                };
                if mp.status != MinipoolStatus::Staking || block_time < mp.status_time {
                    continue;
                }

                positions.insert(position, *validator);
                info.missing_attestation_slots.insert(slot);
            }
            duties.insert(slot, committee.index, positions);
        }

        self.last_duties_slot = last_slot_in_epoch.min(end_slot);
        Ok(())
    }

    async fn process_attestations_in_epoch(
        &mut self,
        beacon: &dyn BeaconClient,
        snapshot: &StateSnapshot,
        epoch: u64,
        duties: &mut PendingDuties,
        thread_limit: usize,
    ) -> Result<()> {
        let config = snapshot.beacon;
        let slots = config.first_slot_of_epoch(epoch)..=config.last_slot_of_epoch(epoch);

        let blocks: Vec<(u64, Vec<AttestationInfo>)> = stream::iter(slots)
            .map(|slot| async move {
                let attestations = beacon.attestations(slot).await?;
                Ok::<_, StakecraftError>((slot, attestations.unwrap_or_default()))
            })
            .buffered(thread_limit)
            .try_collect()
            .await?;

        for (inclusion_slot, attestations) in &blocks {
            if !attestations.is_empty() {
                self.process_attestations_in_slot(snapshot, *inclusion_slot, attestations, duties);
            }
        }
        Ok(())
    }

    fn process_attestations_in_slot(
        &mut self,
        snapshot: &StateSnapshot,
        inclusion_slot: u64,
        attestations: &[AttestationInfo],
        duties: &mut PendingDuties,
    ) {
        let spe = snapshot.beacon.slots_per_epoch;
        for attestation in attestations {
            if !duties.has_slot(attestation.slot)
                || inclusion_slot.saturating_sub(attestation.slot) > spe
            {
                continue;
            }

            let block_time = snapshot.beacon.slot_time(attestation.slot);
            for validator in duties.take_attested(attestation) {
                let Some(info) = self.validator_index_map.get_mut(&validator) else {
                    continue;
                };
                info.missing_attestation_slots.remove(&attestation.slot);

                let Some(mp) = snapshot.minipool(&info.address) else {
                    continue;
                };
                let (bond, fee) = mp.bond_and_fee_at(block_time);
                info.attestation_score += attestation_score(bond, fee);
                info.attestation_count += 1;
            }
        }
    }

    /// One-line summary for logs
    pub fn describe(&self, slots_per_epoch: u64) -> String {
        format!(
            "interval {}, slots {}-{} (epochs {}-{}), {} minipools",
            self.rewards_interval,
            self.start_slot,
            self.last_duties_slot,
            self.start_slot / slots_per_epoch,
            self.last_duties_slot / slots_per_epoch,
            self.validator_index_map.len()
        )
    }
}

impl Default for RollingRecord {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

pub(crate) fn log_loaded(record: &RollingRecord, filename: &str, slots_per_epoch: u64) {
    info!(
        "Loaded rolling record {} ({})",
        filename,
        record.describe(slots_per_epoch)
    );
}
