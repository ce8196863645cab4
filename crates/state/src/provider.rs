use std::sync::Arc;

use tracing::{debug, info};

use stakecraft_beacon::BeaconClient;
use stakecraft_core::{BeaconConfig, ProtocolState, Result, StakecraftError, StateSnapshot};
use stakecraft_settlement::{ProtocolReader, SettlementError};

/// Snapshot source for the record manager and the rewards generator.
///
/// Reads go to the primary protocol reader. When it reports pruned state and
/// an archive reader is configured, the read is retried once against the
/// archive.
#[derive(Clone)]
pub struct SnapshotProvider {
    beacon: Arc<dyn BeaconClient>,
    protocol: Arc<dyn ProtocolReader>,
    archive: Option<Arc<dyn ProtocolReader>>,
    config: BeaconConfig,
}

impl SnapshotProvider {
    pub fn new(
        beacon: Arc<dyn BeaconClient>,
        protocol: Arc<dyn ProtocolReader>,
        config: BeaconConfig,
    ) -> Self {
        Self {
            beacon,
            protocol,
            archive: None,
            config,
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn ProtocolReader>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn beacon(&self) -> &Arc<dyn BeaconClient> {
        &self.beacon
    }

    pub fn protocol(&self) -> &Arc<dyn ProtocolReader> {
        &self.protocol
    }

    pub fn beacon_config(&self) -> BeaconConfig {
        self.config
    }

    /// Snapshot at the block in `slot`. Empty slots are an error; callers
    /// pick the slot.
    pub async fn get_state_for_slot(&self, slot: u64) -> Result<StateSnapshot> {
        let block = self
            .beacon
            .beacon_block(slot)
            .await?
            .ok_or(StakecraftError::SlotEmpty(slot))?;
        let execution_block = block.execution_block_number;
        debug!(
            "Building snapshot for slot {} (execution block {})",
            slot, execution_block
        );

        let (protocol, block_time) = self.read_protocol(execution_block).await?;

        let pubkeys: Vec<_> = protocol.minipools.iter().map(|mp| mp.pubkey).collect();
        let validators = self.beacon.validator_statuses(slot, &pubkeys).await?;

        Ok(StateSnapshot::new(
            slot,
            execution_block,
            block_time,
            self.config,
            protocol,
            validators,
        ))
    }

    async fn read_protocol(&self, block: u64) -> Result<(ProtocolState, u64)> {
        match Self::read_from(self.protocol.as_ref(), block).await {
            Err(SettlementError::StatePruned(_)) if self.archive.is_some() => {
                info!(
                    "State for execution block {} is pruned, retrying on archive node",
                    block
                );
                let archive = self.archive.as_deref().ok_or(StakecraftError::StatePruned(block))?;
                Ok(Self::read_from(archive, block).await?)
            }
            other => Ok(other?),
        }
    }

    async fn read_from(
        reader: &dyn ProtocolReader,
        block: u64,
    ) -> std::result::Result<(ProtocolState, u64), SettlementError> {
        let state = reader.protocol_state(block).await?;
        let time = reader.block_timestamp(block).await?;
        Ok((state, time))
    }
}
