//! Beacon node access trait

use std::collections::HashMap;

use async_trait::async_trait;
use stakecraft_core::{
    AttestationInfo, BeaconBlock, BeaconConfig, BeaconHead, Committee, ValidatorPubkey,
    ValidatorStatus,
};

use crate::Result;

/// Consensus-layer reads used by the oracle.
///
/// Missing data is reported as `Ok(None)` rather than an error so callers
/// can probe for empty slots.
#[async_trait]
pub trait BeaconClient: Send + Sync {
    /// Genesis time and slot timing
    async fn eth2_config(&self) -> Result<BeaconConfig>;

    /// Current head and finality
    async fn head(&self) -> Result<BeaconHead>;

    /// The block at `slot`, or `None` if the slot was missed
    async fn beacon_block(&self, slot: u64) -> Result<Option<BeaconBlock>>;

    /// All attestation committees for an epoch
    async fn committees(&self, epoch: u64) -> Result<Vec<Committee>>;

    /// Attestations included in the block at `slot`, or `None` if the slot was missed
    async fn attestations(&self, slot: u64) -> Result<Option<Vec<AttestationInfo>>>;

    /// Status of the given validators at `slot`. Unknown pubkeys are omitted.
    async fn validator_statuses(
        &self,
        slot: u64,
        pubkeys: &[ValidatorPubkey],
    ) -> Result<HashMap<ValidatorPubkey, ValidatorStatus>>;
}
