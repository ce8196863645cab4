//! Joint execution/consensus view of the protocol at one slot.

use std::collections::HashMap;

use alloy_primitives::Address;

use crate::types::*;

/// Immutable protocol state at one `(execution block, consensus slot)` pair.
///
/// Built on demand by the snapshot provider and dropped when no longer
/// needed. Lookup indices are computed once at construction.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub slot: u64,
    pub execution_block: u64,
    /// Timestamp of the execution block header
    pub execution_block_time: u64,
    pub beacon: BeaconConfig,
    pub network: NetworkDetails,
    pub nodes: Vec<NodeDetails>,
    pub minipools: Vec<MinipoolDetails>,
    pub oracle_dao_members: Vec<OracleDaoMember>,
    pub validators: HashMap<ValidatorPubkey, ValidatorStatus>,

    node_index: HashMap<Address, usize>,
    minipool_index: HashMap<Address, usize>,
    minipools_by_node: HashMap<Address, Vec<usize>>,
}

impl StateSnapshot {
    pub fn new(
        slot: u64,
        execution_block: u64,
        execution_block_time: u64,
        beacon: BeaconConfig,
        protocol: ProtocolState,
        validators: HashMap<ValidatorPubkey, ValidatorStatus>,
    ) -> Self {
        let node_index = protocol
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.address, i))
            .collect();

        let mut minipool_index = HashMap::with_capacity(protocol.minipools.len());
        let mut minipools_by_node: HashMap<Address, Vec<usize>> = HashMap::new();
        for (i, mp) in protocol.minipools.iter().enumerate() {
            minipool_index.insert(mp.address, i);
            minipools_by_node.entry(mp.node_address).or_default().push(i);
        }

        Self {
            slot,
            execution_block,
            execution_block_time,
            beacon,
            network: protocol.network,
            nodes: protocol.nodes,
            minipools: protocol.minipools,
            oracle_dao_members: protocol.oracle_dao_members,
            validators,
            node_index,
            minipool_index,
            minipools_by_node,
        }
    }

    pub fn node(&self, address: &Address) -> Option<&NodeDetails> {
        self.node_index.get(address).map(|&i| &self.nodes[i])
    }

    pub fn minipool(&self, address: &Address) -> Option<&MinipoolDetails> {
        self.minipool_index.get(address).map(|&i| &self.minipools[i])
    }

    pub fn minipools_for_node<'a>(
        &'a self,
        node: &Address,
    ) -> impl Iterator<Item = &'a MinipoolDetails> + 'a {
        self.minipools_by_node
            .get(node)
            .into_iter()
            .flatten()
            .map(move |&i| &self.minipools[i])
    }

    pub fn validator(&self, pubkey: &ValidatorPubkey) -> Option<&ValidatorStatus> {
        self.validators.get(pubkey)
    }

    pub fn epoch(&self) -> u64 {
        self.beacon.epoch_of(self.slot)
    }

    /// Unix timestamp of the snapshot's consensus slot
    pub fn slot_time(&self) -> u64 {
        self.beacon.slot_time(self.slot)
    }
}
