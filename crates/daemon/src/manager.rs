//! Rolling record manager

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use stakecraft_beacon::BeaconClient;
use stakecraft_core::{BeaconConfig, RewardsEvent, StakecraftError, StateSnapshot};
use stakecraft_records::{CheckpointStore, RollingRecord, DEFAULT_THREAD_LIMIT};
use stakecraft_state::SnapshotProvider;

use crate::{DaemonError, Result};

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Epochs per update chunk; the record is saved after every chunk
    pub checkpoint_interval_epochs: u64,
    pub thread_limit: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_epochs: 45,
            thread_limit: DEFAULT_THREAD_LIMIT,
        }
    }
}

/// Range of the active record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub start_slot: u64,
    pub last_duties_slot: u64,
    pub rewards_interval: u64,
}

/// First slot of the interval after `previous`: the first block in the
/// epoch following the previous interval's consensus block. Probes forward
/// up to the chain head.
pub async fn interval_start_slot(
    beacon: &dyn BeaconClient,
    previous: &RewardsEvent,
    config: &BeaconConfig,
) -> Result<u64> {
    let head = beacon.head().await?;

    if beacon.beacon_block(previous.consensus_block).await?.is_none() {
        return Err(StakecraftError::BlockNotFound(format!(
            "consensus block {} of interval {} is not available; the beacon node may not have backfilled it yet",
            previous.consensus_block, previous.index
        ))
        .into());
    }

    let mut slot = config.first_slot_of_epoch(config.epoch_of(previous.consensus_block) + 1);
    while config.epoch_of(slot) <= head.epoch {
        if beacon.beacon_block(slot).await?.is_some() {
            return Ok(slot);
        }
        debug!("Slot {} is empty, trying the next one", slot);
        slot += 1;
    }

    Err(StakecraftError::SlotEmpty(slot).into())
}

/// Owns the active rolling record.
///
/// The record sits behind a mutex that is only held to read or swap it.
/// Updates work on a copy, so at most one caller may update at a time;
/// the daemon's single-flight flag guarantees that.
pub struct RollingRecordManager {
    provider: SnapshotProvider,
    store: CheckpointStore,
    config: ManagerConfig,
    record: Mutex<RollingRecord>,
}

impl RollingRecordManager {
    pub fn new(
        provider: SnapshotProvider,
        store: CheckpointStore,
        config: ManagerConfig,
        record: RollingRecord,
    ) -> Self {
        Self {
            provider,
            store,
            config,
            record: Mutex::new(record),
        }
    }

    /// Start from the best checkpoint for the interval, or a fresh record
    pub fn load(
        provider: SnapshotProvider,
        store: CheckpointStore,
        config: ManagerConfig,
        start_slot: u64,
        latest_finalized_slot: u64,
        rewards_interval: u64,
    ) -> Result<Self> {
        let record = store.load_best(start_slot, latest_finalized_slot, rewards_interval)?;
        Ok(Self::new(provider, store, config, record))
    }

    pub fn record(&self) -> RollingRecord {
        self.record.lock().clone()
    }

    pub fn summary(&self) -> RecordSummary {
        let record = self.record.lock();
        RecordSummary {
            start_slot: record.start_slot,
            last_duties_slot: record.last_duties_slot,
            rewards_interval: record.rewards_interval,
        }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    fn beacon_config(&self) -> BeaconConfig {
        self.provider.beacon_config()
    }

    /// Start a new record if `head` is in a later interval than the record.
    /// Returns whether a new record was started.
    pub async fn roll_over(&self, head: &StateSnapshot) -> Result<bool> {
        let current = head.network.reward_index;
        let record_interval = self.record.lock().rewards_interval;
        if record_interval >= current {
            return Ok(false);
        }

        let previous = current - 1;
        let event = self
            .provider
            .protocol()
            .rewards_event(previous)
            .await?
            .ok_or(DaemonError::MissingEvent(previous))?;
        let config = self.beacon_config();
        let start_slot =
            interval_start_slot(self.provider.beacon().as_ref(), &event, &config).await?;

        info!(
            "Current record is for interval {}, starting a new record for interval {} at slot {} (epoch {})",
            record_interval,
            current,
            start_slot,
            config.epoch_of(start_slot)
        );
        *self.record.lock() = RollingRecord::new(start_slot, current);
        Ok(true)
    }

    /// Extend the record to `target_slot` in chunks of
    /// `checkpoint_interval_epochs`, saving a checkpoint after each chunk.
    ///
    /// `snapshot` supplies the minipool and smoothing pool state used for
    /// every chunk. A failed chunk leaves the record at the last saved one.
    pub async fn update_to_slot(&self, snapshot: &StateSnapshot, target_slot: u64) -> Result<()> {
        let mut record = self.record();
        if record.last_duties_slot != 0 && target_slot < record.last_duties_slot {
            return Err(StakecraftError::RecordRegression {
                target: target_slot,
                last: record.last_duties_slot,
            }
            .into());
        }

        let mut next_slot = record.next_slot();
        if next_slot > target_slot {
            debug!("Record already covers slot {}", target_slot);
            return Ok(());
        }

        let config = self.beacon_config();
        let final_epoch = config.epoch_of(target_slot);
        let chunk_epochs = self.config.checkpoint_interval_epochs.max(1);
        let initial_slot = next_slot;
        let total_slots = (target_slot - initial_slot + 1) as f64;
        let started = Instant::now();

        info!(
            "Updating record from slot {} (epoch {}) to slot {} (epoch {})",
            next_slot,
            config.epoch_of(next_slot),
            target_slot,
            final_epoch
        );

        while next_slot <= target_slot {
            let chunk_start_epoch = config.epoch_of(next_slot);
            let chunk_epoch = (chunk_start_epoch + chunk_epochs - 1).min(final_epoch);
            let chunk_target = config.last_slot_of_epoch(chunk_epoch).min(target_slot);

            record
                .update_to_slot(
                    self.provider.beacon().as_ref(),
                    snapshot,
                    chunk_target,
                    self.config.thread_limit,
                )
                .await?;
            self.store.save(&record)?;
            *self.record.lock() = record.clone();

            let processed = (chunk_target - initial_slot + 1) as f64;
            info!(
                "({:.2}%) Updated from slot {} (epoch {}) to slot {} (epoch {}), {:.1?} elapsed",
                processed / total_slots * 100.0,
                next_slot,
                chunk_start_epoch,
                chunk_target,
                chunk_epoch,
                started.elapsed()
            );
            next_slot = chunk_target + 1;
        }

        info!(
            "Record update complete ({})",
            record.describe(config.slots_per_epoch)
        );
        Ok(())
    }

    /// Make the record end exactly at `snapshot.slot`, extending it or
    /// rebuilding it from disk if it already went past.
    pub async fn prepare_for_report(&self, snapshot: &StateSnapshot) -> Result<RollingRecord> {
        let summary = self.summary();
        if summary.rewards_interval != snapshot.network.reward_index {
            return Err(StakecraftError::IntervalMismatch {
                record: summary.rewards_interval,
                expected: snapshot.network.reward_index,
            }
            .into());
        }

        if snapshot.slot < summary.last_duties_slot {
            info!(
                "Record is at slot {}, past target slot {}; rebuilding from a checkpoint",
                summary.last_duties_slot, snapshot.slot
            );
            self.generate_record_for_state(snapshot).await?;
        } else {
            info!(
                "Record at slot {} can be used, updating to slot {}",
                summary.last_duties_slot, snapshot.slot
            );
            self.update_to_slot(snapshot, snapshot.slot).await?;
        }
        Ok(self.record())
    }

    /// Replace the record with the best checkpoint at or before
    /// `snapshot.slot`, then extend it to that slot
    pub async fn generate_record_for_state(&self, snapshot: &StateSnapshot) -> Result<()> {
        let slot = snapshot.slot;
        let (start_slot, interval) = {
            let record = self.record.lock();
            (record.start_slot, record.rewards_interval)
        };

        let loaded = self.store.load_best(start_slot, slot, interval)?;
        if loaded.last_duties_slot > slot {
            return Err(StakecraftError::RecordRegression {
                target: slot,
                last: loaded.last_duties_slot,
            }
            .into());
        }
        let up_to_date = loaded.last_duties_slot == slot;
        *self.record.lock() = loaded;

        if up_to_date {
            info!("Loaded record is already at slot {}", slot);
            return Ok(());
        }
        if let Err(e) = self.update_to_slot(snapshot, slot).await {
            warn!("Failed to rebuild record for slot {}: {}", slot, e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use stakecraft_beacon::MockBeaconClient;
    use stakecraft_core::{
        eth_to_wei, Address, DepositType, MinipoolDetails, MinipoolStatus, NetworkDetails,
        NodeDetails, ProtocolState, ValidatorPubkey, ValidatorStatus, B256, FAR_FUTURE_EPOCH,
        ONE_ETH, U256,
    };
    use stakecraft_settlement::MockProtocol;

    const SPE: u64 = 4;

    fn config() -> BeaconConfig {
        BeaconConfig {
            genesis_time: 0,
            seconds_per_slot: 1,
            slots_per_epoch: SPE,
        }
    }

    fn protocol_state(reward_index: u64) -> ProtocolState {
        ProtocolState {
            network: NetworkDetails {
                reward_index,
                interval_start: 0,
                interval_duration: 1000,
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
            nodes: vec![NodeDetails {
                address: Address::repeat_byte(1),
                registration_time: 0,
                rpl_stake: U256::ZERO,
                reward_network: 0,
                smoothing_pool_registration_state: true,
                smoothing_pool_registration_changed: 0,
                distributor_balance_user_eth: U256::ZERO,
                deposit_credit_balance: U256::ZERO,
            }],
            minipools: (0..2u8)
                .map(|i| MinipoolDetails {
                    address: Address::repeat_byte(10 + i),
                    pubkey: ValidatorPubkey::repeat_byte(10 + i),
                    node_address: Address::repeat_byte(1),
                    status: MinipoolStatus::Staking,
                    status_time: 0,
                    deposit_type: DepositType::Variable,
                    node_deposit_balance: eth_to_wei(8),
                    user_deposit_balance: eth_to_wei(24),
                    node_fee: U256::ZERO,
                    last_bond_reduction_time: 0,
                    last_bond_reduction_prev_value: U256::ZERO,
                    last_bond_reduction_prev_node_fee: U256::ZERO,
                    penalty_count: 0,
                    user_share_of_balance: U256::ZERO,
                    is_vacant: false,
                })
                .collect(),
            oracle_dao_members: vec![],
        }
    }

    struct Fixture {
        beacon: MockBeaconClient,
        protocol: MockProtocol,
        provider: SnapshotProvider,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let beacon = MockBeaconClient::new(config());
        beacon.populate_epochs(0..20, &[100, 101], |_, _| false);
        beacon.set_head(79, 18);
        for i in 0..2u8 {
            beacon.insert_validator(ValidatorStatus {
                index: 100 + i as u64,
                pubkey: ValidatorPubkey::repeat_byte(10 + i),
                activation_epoch: 0,
                exit_epoch: FAR_FUTURE_EPOCH,
                effective_balance: 32_000_000_000,
                balance: 32_000_000_000,
                withdrawal_credentials: B256::ZERO,
            });
        }

        let protocol = MockProtocol::new(1);
        protocol.set_state(0, protocol_state(3));
        for block in 0..=80 {
            protocol.set_block_time(block, block);
        }

        let provider = SnapshotProvider::new(
            Arc::new(beacon.clone()),
            Arc::new(protocol.clone()),
            config(),
        );
        Fixture {
            beacon,
            protocol,
            provider,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn manager(f: &Fixture, record: RollingRecord) -> RollingRecordManager {
        let store = CheckpointStore::new(f.dir.path(), 100, config());
        let config = ManagerConfig {
            checkpoint_interval_epochs: 2,
            thread_limit: 2,
        };
        RollingRecordManager::new(f.provider.clone(), store, config, record)
    }

    #[tokio::test]
    async fn test_update_saves_each_chunk() {
        let f = fixture();
        let manager = manager(&f, RollingRecord::new(0, 3));
        let snapshot = f.provider.get_state_for_slot(40).await.unwrap();

        manager.update_to_slot(&snapshot, 21).await.unwrap();

        // Chunks end at slots 7, 15 and 21
        let slots: Vec<u64> = manager
            .store()
            .load_index()
            .unwrap()
            .unwrap()
            .iter()
            .map(|e| e.slot)
            .collect();
        assert_eq!(slots, vec![7, 15, 21]);
        assert_eq!(manager.summary().last_duties_slot, 21);

        // Chunked result equals a single update
        let mut single = RollingRecord::new(0, 3);
        single.update_to_slot(&f.beacon, &snapshot, 21, 2).await.unwrap();
        assert_eq!(manager.record(), single);
    }

    #[tokio::test]
    async fn test_update_backward_rejected() {
        let f = fixture();
        let manager = manager(&f, RollingRecord::new(0, 3));
        let snapshot = f.provider.get_state_for_slot(40).await.unwrap();
        manager.update_to_slot(&snapshot, 15).await.unwrap();

        let err = manager.update_to_slot(&snapshot, 11).await.unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Stakecraft(StakecraftError::RecordRegression { target: 11, last: 15 })
        ));
        assert_eq!(manager.summary().last_duties_slot, 15);

        // Same slot is a no-op
        manager.update_to_slot(&snapshot, 15).await.unwrap();
        assert_eq!(manager.summary().last_duties_slot, 15);
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_saved_progress() {
        let f = fixture();
        let manager = manager(&f, RollingRecord::new(0, 3));
        let snapshot = f.provider.get_state_for_slot(40).await.unwrap();
        f.beacon.fail_attestations_at(13);

        assert!(manager.update_to_slot(&snapshot, 21).await.is_err());
        assert_eq!(manager.summary().last_duties_slot, 7);

        f.beacon.clear_failures();
        manager.update_to_slot(&snapshot, 21).await.unwrap();
        assert_eq!(manager.summary().last_duties_slot, 21);
    }

    #[tokio::test]
    async fn test_prepare_rebuilds_when_past_target() {
        let f = fixture();
        let manager = manager(&f, RollingRecord::new(0, 3));
        let head = f.provider.get_state_for_slot(40).await.unwrap();
        manager.update_to_slot(&head, 31).await.unwrap();

        let snapshot = f.provider.get_state_for_slot(18).await.unwrap();
        let record = manager.prepare_for_report(&snapshot).await.unwrap();
        assert_eq!(record.last_duties_slot, 18);
        assert_eq!(manager.summary().last_duties_slot, 18);

        let mut expected = RollingRecord::new(0, 3);
        expected.update_to_slot(&f.beacon, &snapshot, 18, 2).await.unwrap();
        assert_eq!(record.validator_index_map, expected.validator_index_map);
    }

    #[tokio::test]
    async fn test_prepare_rejects_other_interval() {
        let f = fixture();
        let manager = manager(&f, RollingRecord::new(0, 2));
        let snapshot = f.provider.get_state_for_slot(18).await.unwrap();
        let err = manager.prepare_for_report(&snapshot).await.unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Stakecraft(StakecraftError::IntervalMismatch { record: 2, expected: 3 })
        ));
    }

    #[tokio::test]
    async fn test_roll_over_starts_after_previous_consensus_block() {
        let f = fixture();
        let manager = manager(&f, RollingRecord::new(0, 2));
        // Previous interval closed at slot 21 (epoch 5); first slot of
        // epoch 6 is missing
        f.protocol.insert_event(RewardsEvent {
            index: 2,
            merkle_root: B256::ZERO,
            intervals_passed: 1,
            consensus_block: 21,
            execution_block: 21,
            interval_start_time: 0,
            interval_end_time: 21,
        });
        f.beacon.remove_block(24);

        let head = f.provider.get_state_for_slot(40).await.unwrap();
        assert!(manager.roll_over(&head).await.unwrap());
        assert_eq!(
            manager.summary(),
            RecordSummary {
                start_slot: 25,
                last_duties_slot: 0,
                rewards_interval: 3,
            }
        );
        assert!(!manager.roll_over(&head).await.unwrap());
    }

    #[tokio::test]
    async fn test_roll_over_without_event() {
        let f = fixture();
        let manager = manager(&f, RollingRecord::new(0, 2));
        let head = f.provider.get_state_for_slot(40).await.unwrap();
        let err = manager.roll_over(&head).await.unwrap_err();
        assert!(matches!(err, DaemonError::MissingEvent(2)));
        assert_eq!(manager.summary().rewards_interval, 2);
    }
}
