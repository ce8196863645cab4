//! StakeCraft Rewards
//!
//! Converts a rolling record and the snapshot at an interval's end slot into
//! the canonical rewards tree.
//!
//! ## Distribution
//!
//! - **Collateral RPL**: node operators, by effective stake and node weight
//! - **Oracle DAO RPL**: committee members, by time served in the interval
//! - **Protocol DAO RPL**: whatever remains, including truncation dust
//! - **Smoothing pool ETH**: minipools by attestation score, the remainder
//!   to pool stakers
//!
//! Every node that earned anything becomes one Merkle leaf. The rewards and
//! performance files are written next to each other; committee members also
//! publish compressed copies under their content identifiers.

mod balances;
mod files;
mod generator;
pub mod weights;

pub use balances::{calculate_network_balances, minipool_user_balance};
pub use files::{
    ArtifactStore, MinipoolPerformance, NetworkRewards, NodeRewards, PerformanceFile,
    RewardsFile, TotalRewards, WrittenArtifacts, REWARDS_FILE_VERSION, RULESET_VERSION,
};
pub use generator::{GeneratedTree, RewardsInterval, TreeGenerator};

use stakecraft_beacon::BeaconError;
use stakecraft_core::{StakecraftError, U256};
use stakecraft_merkle::MerkleError;
use stakecraft_settlement::SettlementError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewardsError {
    #[error("There are no pending RPL rewards, interval {0} cannot be used for a rewards submission")]
    NoPendingRpl(u64),

    #[error("Error calculating {what}: total was {actual}, expected {expected}; error was too large")]
    SanityCheck {
        what: &'static str,
        expected: U256,
        actual: U256,
    },

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Beacon error: {0}")]
    Beacon(#[from] BeaconError),

    #[error("Protocol error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RewardsError>;

impl From<RewardsError> for StakecraftError {
    fn from(e: RewardsError) -> Self {
        match e {
            RewardsError::Beacon(e) => e.into(),
            RewardsError::Settlement(e) => e.into(),
            RewardsError::Serialization(e) => e.into(),
            RewardsError::Io(e) => StakecraftError::Io(e),
            other => StakecraftError::Generation(other.to_string()),
        }
    }
}
