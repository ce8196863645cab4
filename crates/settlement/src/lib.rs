//! StakeCraft Settlement
//!
//! The oracle's view of the protocol contracts.
//!
//! ## Settlement Flow
//!
//! 1. **Read**: `ProtocolReader` exposes the contract state at an execution
//!    block, the finalized rewards events and per-node submission status.
//! 2. **Decide**: the submission logic compares the locally generated Merkle
//!    root with the on-chain event for the interval and decides whether to
//!    vote, resubmit, or stay silent.
//! 3. **Write**: `OracleWriter` sends the reward snapshot or network
//!    balances vote. Once a quorum of the oracle committee agrees, the
//!    contract finalizes the interval and emits the rewards event.
//!
//! Signing and the RPC transport live outside this crate. `MockProtocol`
//! implements both traits in memory.

mod mock;
mod submission;
mod traits;

pub use mock::MockProtocol;
pub use submission::{decide, submit_rewards, SubmissionDecision, SubmissionRecord};
pub use traits::{OracleWriter, ProtocolReader};

use stakecraft_core::{StakecraftError, B256};
use thiserror::Error;

/// Hash of a submitted transaction
pub type TransactionHash = B256;

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Consensus already reached for {0}")]
    ConsensusAlreadyReached(String),

    #[error("Node already submitted for {0}")]
    AlreadySubmitted(String),

    #[error("State for execution block {0} has been pruned")]
    StatePruned(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SettlementError {
    /// Rejections caused by another committee member getting there first
    pub fn is_race(&self) -> bool {
        matches!(
            self,
            Self::ConsensusAlreadyReached(_) | Self::AlreadySubmitted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;

impl From<SettlementError> for StakecraftError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::StatePruned(block) => StakecraftError::StatePruned(block),
            SettlementError::IoError(e) => StakecraftError::Io(e),
            SettlementError::NotFound(what) => StakecraftError::BlockNotFound(what),
            other => StakecraftError::TransientIo(other.to_string()),
        }
    }
}
