//! Rewards and performance files
//!
//! Both files are JSON with camelCase keys and quoted decimal amounts.
//! Maps are ordered so the encoding of a given tree is byte-stable.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use stakecraft_core::{quoted, Address, RewardSubmission, ValidatorPubkey, B256, U256};
use stakecraft_merkle::cid::ContentAddresser;
use stakecraft_merkle::merkle::{merkle_leaf, MerkleProof};

use crate::{RewardsError, Result};

pub const REWARDS_FILE_VERSION: u64 = 3;
pub const RULESET_VERSION: u64 = 8;

/// zstd level for published artifacts
const COMPRESSION_LEVEL: i32 = 19;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalRewards {
    #[serde(with = "quoted")]
    pub protocol_dao_rpl: U256,
    #[serde(with = "quoted")]
    pub total_collateral_rpl: U256,
    #[serde(with = "quoted")]
    pub total_oracle_dao_rpl: U256,
    #[serde(with = "quoted")]
    pub total_smoothing_pool_eth: U256,
    #[serde(with = "quoted")]
    pub pool_staker_smoothing_pool_eth: U256,
    #[serde(with = "quoted")]
    pub node_operator_smoothing_pool_eth: U256,
    #[serde(with = "quoted")]
    pub total_node_weight: U256,
}

/// Amounts routed to one reward network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRewards {
    #[serde(with = "quoted")]
    pub collateral_rpl: U256,
    #[serde(with = "quoted")]
    pub oracle_dao_rpl: U256,
    #[serde(with = "quoted")]
    pub smoothing_pool_eth: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRewards {
    pub reward_network: u64,
    #[serde(with = "quoted")]
    pub collateral_rpl: U256,
    #[serde(with = "quoted")]
    pub oracle_dao_rpl: U256,
    #[serde(with = "quoted")]
    pub smoothing_pool_eth: U256,
    #[serde(default)]
    pub merkle_proof: Vec<String>,
}

impl NodeRewards {
    pub fn is_empty(&self) -> bool {
        self.collateral_rpl.is_zero()
            && self.oracle_dao_rpl.is_zero()
            && self.smoothing_pool_eth.is_zero()
    }

    /// Leaf preimage: `address ‖ network ‖ rpl ‖ eth`, 32-byte big-endian words
    pub fn leaf_data(&self, address: &Address) -> Vec<u8> {
        let mut data = Vec::with_capacity(20 + 32 * 3);
        data.extend_from_slice(address.as_slice());
        data.extend_from_slice(&U256::from(self.reward_network).to_be_bytes::<32>());
        let rpl = self.collateral_rpl + self.oracle_dao_rpl;
        data.extend_from_slice(&rpl.to_be_bytes::<32>());
        data.extend_from_slice(&self.smoothing_pool_eth.to_be_bytes::<32>());
        data
    }
}

/// Complete rewards tree for one interval
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsFile {
    pub rewards_file_version: u64,
    pub ruleset_version: u64,
    pub index: u64,
    pub network: String,
    /// Unix timestamps
    pub start_time: u64,
    pub end_time: u64,
    pub consensus_start_block: u64,
    pub consensus_end_block: u64,
    pub execution_start_block: u64,
    pub execution_end_block: u64,
    pub intervals_passed: u64,
    pub merkle_root: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub minipool_performance_file_cid: String,
    pub total_rewards: TotalRewards,
    pub network_rewards: BTreeMap<u64, NetworkRewards>,
    pub node_rewards: BTreeMap<Address, NodeRewards>,
    #[serde(default)]
    pub invalid_network_nodes: BTreeMap<Address, u64>,
}

impl RewardsFile {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn root(&self) -> Result<B256> {
        self.merkle_root
            .parse()
            .map_err(|_| RewardsError::MissingData(format!("invalid merkle root '{}'", self.merkle_root)))
    }

    /// Check a node's stored proof against the stored root.
    ///
    /// Returns `None` if the node has no entry.
    pub fn verify_node(&self, address: &Address) -> Result<Option<bool>> {
        let Some(node) = self.node_rewards.get(address) else {
            return Ok(None);
        };
        let leaf = merkle_leaf(&node.leaf_data(address));
        let proof = MerkleProof::from_hex_strings(leaf, &node.merkle_proof)?;
        Ok(Some(proof.verify(&self.root()?)))
    }

    /// Per-network amounts for networks `0..=max`
    fn network_vectors(&self) -> (Vec<U256>, Vec<U256>, Vec<U256>) {
        let count = self
            .network_rewards
            .keys()
            .next_back()
            .map(|max| *max as usize + 1)
            .unwrap_or(0);
        let mut collateral = vec![U256::ZERO; count];
        let mut oracle = vec![U256::ZERO; count];
        let mut eth = vec![U256::ZERO; count];
        for (network, rewards) in &self.network_rewards {
            let i = *network as usize;
            collateral[i] = rewards.collateral_rpl;
            oracle[i] = rewards.oracle_dao_rpl;
            eth[i] = rewards.smoothing_pool_eth;
        }
        (collateral, oracle, eth)
    }

    /// The committee vote for this tree
    pub fn submission(&self, merkle_tree_cid: &str) -> Result<RewardSubmission> {
        let (node_rpl, trusted_node_rpl, node_eth) = self.network_vectors();
        Ok(RewardSubmission {
            reward_index: self.index,
            execution_block: self.execution_end_block,
            consensus_block: self.consensus_end_block,
            merkle_root: self.root()?,
            merkle_tree_cid: merkle_tree_cid.to_string(),
            intervals_passed: self.intervals_passed,
            treasury_rpl: self.total_rewards.protocol_dao_rpl,
            trusted_node_rpl,
            node_rpl,
            node_eth,
            user_eth: self.total_rewards.pool_staker_smoothing_pool_eth,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolPerformance {
    pub pubkey: ValidatorPubkey,
    pub successful_attestations: u64,
    pub missed_attestations: u64,
    #[serde(with = "quoted")]
    pub attestation_score: U256,
    #[serde(with = "quoted")]
    pub eth_earned: U256,
    pub missing_attestation_slots: Vec<u64>,
}

/// Attestation performance of every rewarded minipool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceFile {
    pub rewards_file_version: u64,
    pub ruleset_version: u64,
    pub index: u64,
    pub network: String,
    pub start_time: u64,
    pub end_time: u64,
    pub consensus_start_block: u64,
    pub consensus_end_block: u64,
    pub execution_start_block: u64,
    pub execution_end_block: u64,
    pub minipool_performance: BTreeMap<Address, MinipoolPerformance>,
}

impl PerformanceFile {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Paths and identifiers of one interval's written artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifacts {
    pub rewards_path: PathBuf,
    pub performance_path: PathBuf,
    /// CID of the compressed rewards file, if published
    pub rewards_cid: Option<String>,
    pub performance_cid: Option<String>,
}

/// Rewards artifacts directory, one file pair per interval
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    network: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            network: network.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn rewards_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("rewards-{}-{}.json", self.network, index))
    }

    pub fn performance_path(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("performance-{}-{}.json", self.network, index))
    }

    /// Marker left by nodes that generate trees without voting
    pub fn marker_path(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("rewards-{}-{}.submitted", self.network, index))
    }

    pub fn load_rewards(&self, index: u64) -> Result<Option<RewardsFile>> {
        let path = self.rewards_path(index);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(RewardsFile::from_bytes(&bytes)?))
    }

    /// Write both files. With `publish`, also write zstd siblings and compute
    /// their content identifiers; the performance CID is recorded in the
    /// rewards header before the rewards file is encoded.
    pub fn write(
        &self,
        rewards: &mut RewardsFile,
        performance: &PerformanceFile,
        publish: Option<&dyn ContentAddresser>,
    ) -> Result<WrittenArtifacts> {
        fs::create_dir_all(&self.dir)?;
        let index = rewards.index;

        let performance_path = self.performance_path(index);
        let performance_bytes = performance.to_bytes()?;
        write_atomic(&performance_path, &performance_bytes)?;
        let performance_cid = match publish {
            Some(addresser) => {
                let cid = write_compressed(&performance_path, &performance_bytes, addresser)?;
                rewards.minipool_performance_file_cid = cid.clone();
                Some(cid)
            }
            None => None,
        };

        let rewards_path = self.rewards_path(index);
        let rewards_bytes = rewards.to_bytes()?;
        write_atomic(&rewards_path, &rewards_bytes)?;
        let rewards_cid = match publish {
            Some(addresser) => Some(write_compressed(&rewards_path, &rewards_bytes, addresser)?),
            None => None,
        };

        info!(
            "Saved interval {} rewards to {} (cid {})",
            index,
            rewards_path.display(),
            rewards_cid.as_deref().unwrap_or("-")
        );
        Ok(WrittenArtifacts {
            rewards_path,
            performance_path,
            rewards_cid,
            performance_cid,
        })
    }
}

impl ArtifactStore {
    /// Compress an already written rewards file and return its CID
    pub fn publish_rewards(
        &self,
        rewards: &RewardsFile,
        addresser: &dyn ContentAddresser,
    ) -> Result<String> {
        fs::create_dir_all(&self.dir)?;
        let path = self.rewards_path(rewards.index);
        write_compressed(&path, &rewards.to_bytes()?, addresser)
    }
}

/// zstd `bytes` next to `path` and return the CID of the compressed file
fn write_compressed(
    path: &Path,
    bytes: &[u8],
    addresser: &dyn ContentAddresser,
) -> Result<String> {
    let compressed = zstd::encode_all(bytes, COMPRESSION_LEVEL)?;

    let mut name = path.as_os_str().to_owned();
    name.push(".zst");
    let zst_path = PathBuf::from(name);
    write_atomic(&zst_path, &compressed)?;

    let cid = addresser.compute_cid(&compressed);
    debug!("{} -> {}", zst_path.display(), cid);
    Ok(cid)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    let tmp = PathBuf::from(name);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
