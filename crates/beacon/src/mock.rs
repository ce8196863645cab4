//! In-memory beacon chain

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use stakecraft_core::{
    AttestationInfo, BeaconBlock, BeaconConfig, BeaconHead, Committee, ValidatorIndex,
    ValidatorPubkey, ValidatorStatus,
};

use crate::{BeaconClient, BeaconError, Result};

#[derive(Debug, Default)]
struct MockChain {
    config: BeaconConfig,
    head: BeaconHead,
    blocks: BTreeMap<u64, BeaconBlock>,
    committees: HashMap<u64, Vec<Committee>>,
    /// Keyed by inclusion slot
    attestations: HashMap<u64, Vec<AttestationInfo>>,
    validators: HashMap<ValidatorPubkey, ValidatorStatus>,
    failing_slots: HashSet<u64>,
}

/// Beacon client backed by an in-memory chain.
///
/// Cloning shares the underlying chain, so a test can keep a handle and
/// mutate the chain while the code under test reads from it.
#[derive(Debug, Clone, Default)]
pub struct MockBeaconClient {
    chain: Arc<RwLock<MockChain>>,
    calls: Arc<AtomicU64>,
    duty_reads: Arc<AtomicU64>,
}

impl MockBeaconClient {
    pub fn new(config: BeaconConfig) -> Self {
        let client = Self::default();
        client.chain.write().config = config;
        client
    }

    /// Set the head slot and finalized epoch
    pub fn set_head(&self, slot: u64, finalized_epoch: u64) {
        let mut chain = self.chain.write();
        let epoch = chain.config.epoch_of(slot);
        chain.head = BeaconHead {
            slot,
            epoch,
            finalized_epoch,
        };
    }

    pub fn insert_block(&self, slot: u64, execution_block_number: u64) {
        self.chain.write().blocks.insert(
            slot,
            BeaconBlock {
                slot,
                execution_block_number,
            },
        );
    }

    /// Turn `slot` into a missed slot
    pub fn remove_block(&self, slot: u64) {
        let mut chain = self.chain.write();
        chain.blocks.remove(&slot);
        chain.attestations.remove(&slot);
    }

    pub fn insert_committees(&self, epoch: u64, committees: Vec<Committee>) {
        self.chain.write().committees.insert(epoch, committees);
    }

    /// Append attestations to the block at `inclusion_slot`
    pub fn insert_attestations(&self, inclusion_slot: u64, attestations: Vec<AttestationInfo>) {
        self.chain
            .write()
            .attestations
            .entry(inclusion_slot)
            .or_default()
            .extend(attestations);
    }

    pub fn insert_validator(&self, status: ValidatorStatus) {
        self.chain.write().validators.insert(status.pubkey, status);
    }

    /// Make attestation reads at `slot` fail until cleared
    pub fn fail_attestations_at(&self, slot: u64) {
        self.chain.write().failing_slots.insert(slot);
    }

    pub fn clear_failures(&self) {
        self.chain.write().failing_slots.clear();
    }

    /// Fill `epochs` with one block per slot, one committee per slot and
    /// attestations included one slot later.
    ///
    /// Validators are spread round-robin across the slots of each epoch.
    /// `missed(slot, validator)` decides which duties go unattested. The
    /// execution block number of each block equals its slot.
    pub fn populate_epochs<F>(&self, epochs: Range<u64>, validators: &[ValidatorIndex], missed: F)
    where
        F: Fn(u64, ValidatorIndex) -> bool,
    {
        let config = self.chain.read().config;
        let spe = config.slots_per_epoch;

        for epoch in epochs {
            let mut committees = Vec::with_capacity(spe as usize);
            for slot in config.first_slot_of_epoch(epoch)..=config.last_slot_of_epoch(epoch) {
                let members: Vec<ValidatorIndex> = validators
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i as u64 % spe == slot % spe)
                    .map(|(_, v)| *v)
                    .collect();

                let attesting: Vec<usize> = members
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| !missed(slot, **v))
                    .map(|(pos, _)| pos)
                    .collect();

                self.insert_block(slot, slot);
                self.insert_block(slot + 1, slot + 1);
                let bits = AttestationInfo::bits_for(&attesting, members.len());
                if let Some(aggregation_bits) = bits.filter(|_| !members.is_empty()) {
                    self.insert_attestations(
                        slot + 1,
                        vec![AttestationInfo {
                            slot,
                            committee_index: 0,
                            aggregation_bits,
                        }],
                    );
                }

                committees.push(Committee {
                    slot,
                    index: 0,
                    validators: members,
                });
            }
            self.insert_committees(epoch, committees);
        }
    }

    /// Total trait calls served
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Committee and attestation reads served
    pub fn duty_read_count(&self) -> u64 {
        self.duty_reads.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.duty_reads.store(0, Ordering::SeqCst);
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn count_duty(&self) {
        self.count();
        self.duty_reads.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BeaconClient for MockBeaconClient {
    async fn eth2_config(&self) -> Result<BeaconConfig> {
        self.count();
        Ok(self.chain.read().config)
    }

    async fn head(&self) -> Result<BeaconHead> {
        self.count();
        Ok(self.chain.read().head)
    }

    async fn beacon_block(&self, slot: u64) -> Result<Option<BeaconBlock>> {
        self.count();
        Ok(self.chain.read().blocks.get(&slot).copied())
    }

    async fn committees(&self, epoch: u64) -> Result<Vec<Committee>> {
        self.count_duty();
        self.chain
            .read()
            .committees
            .get(&epoch)
            .cloned()
            .ok_or_else(|| BeaconError::Unavailable(format!("committees for epoch {}", epoch)))
    }

    async fn attestations(&self, slot: u64) -> Result<Option<Vec<AttestationInfo>>> {
        self.count_duty();
        let chain = self.chain.read();
        if chain.failing_slots.contains(&slot) {
            debug!("[MOCK] Injected failure reading attestations at slot {}", slot);
            return Err(BeaconError::Unavailable(format!("attestations at slot {}", slot)));
        }
        if !chain.blocks.contains_key(&slot) {
            return Ok(None);
        }
        Ok(Some(chain.attestations.get(&slot).cloned().unwrap_or_default()))
    }

    async fn validator_statuses(
        &self,
        _slot: u64,
        pubkeys: &[ValidatorPubkey],
    ) -> Result<HashMap<ValidatorPubkey, ValidatorStatus>> {
        self.count();
        let chain = self.chain.read();
        Ok(pubkeys
            .iter()
            .filter_map(|p| chain.validators.get(p).map(|s| (*p, s.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakecraft_core::{B256, FAR_FUTURE_EPOCH};

    fn config() -> BeaconConfig {
        BeaconConfig {
            genesis_time: 0,
            seconds_per_slot: 12,
            slots_per_epoch: 4,
        }
    }

    #[tokio::test]
    async fn test_populate_epochs() {
        let mock = MockBeaconClient::new(config());
        mock.populate_epochs(0..2, &[10, 11, 12, 13, 14], |slot, v| slot == 1 && v == 11);

        let committees = mock.committees(0).await.unwrap();
        assert_eq!(committees.len(), 4);
        // 5 validators over 4 slots: slot 0 gets positions 0 and 4
        assert_eq!(committees[0].validators, vec![10, 14]);
        assert_eq!(committees[1].validators, vec![11]);

        let atts = mock.attestations(2).await.unwrap().unwrap();
        assert_eq!(atts.len(), 1);
        assert_eq!(atts[0].slot, 1);
        assert!(!atts[0].bit_at(0));

        let atts = mock.attestations(1).await.unwrap().unwrap();
        assert!(atts[0].bit_at(0));
        assert!(atts[0].bit_at(1));

        // Inclusion block after the last populated epoch exists
        assert!(mock.beacon_block(8).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_block() {
        let mock = MockBeaconClient::new(config());
        mock.populate_epochs(0..1, &[1], |_, _| false);
        mock.remove_block(2);

        assert!(mock.beacon_block(2).await.unwrap().is_none());
        assert!(mock.attestations(2).await.unwrap().is_none());
        assert!(mock.attestations(3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mock = MockBeaconClient::new(config());
        mock.populate_epochs(0..1, &[1], |_, _| false);
        mock.fail_attestations_at(1);

        assert!(mock.attestations(1).await.is_err());
        mock.clear_failures();
        assert!(mock.attestations(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_call_counters() {
        let mock = MockBeaconClient::new(config());
        mock.populate_epochs(0..1, &[1], |_, _| false);

        mock.head().await.unwrap();
        mock.committees(0).await.unwrap();
        mock.attestations(1).await.unwrap();
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.duty_read_count(), 2);

        mock.reset_counters();
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_committees_error() {
        let mock = MockBeaconClient::new(config());
        assert!(mock.committees(7).await.is_err());
    }

    #[tokio::test]
    async fn test_validator_statuses_filters_unknown() {
        let mock = MockBeaconClient::new(config());
        let known = ValidatorPubkey::repeat_byte(1);
        mock.insert_validator(ValidatorStatus {
            index: 5,
            pubkey: known,
            activation_epoch: 0,
            exit_epoch: FAR_FUTURE_EPOCH,
            effective_balance: 32_000_000_000,
            balance: 32_000_000_000,
            withdrawal_credentials: B256::ZERO,
        });

        let statuses = mock
            .validator_statuses(0, &[known, ValidatorPubkey::repeat_byte(2)])
            .await
            .unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[&known].index, 5);
    }

    #[tokio::test]
    async fn test_clone_shares_chain() {
        let mock = MockBeaconClient::new(config());
        let handle = mock.clone();
        handle.set_head(40, 8);

        let head = mock.head().await.unwrap();
        assert_eq!(head.slot, 40);
        assert_eq!(head.epoch, 10);
        assert_eq!(head.finalized_epoch, 8);
        assert_eq!(handle.call_count(), 1);
    }
}
