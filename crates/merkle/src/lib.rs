//! StakeCraft Merkle
//!
//! Keccak-256 Merkle tree for rewards distribution and content addressing
//! for published artifacts.
//!
//! The `MerkleTree` is built by the rewards generator (one leaf per node
//! with rewards) and checked by claimants through `MerkleProof::verify`.
//! Siblings are hashed in sorted order so proofs carry no direction bits.

pub mod cid;
pub mod merkle;

pub use cid::{Cidv0Addresser, ContentAddresser};
pub use merkle::{hash_pair, merkle_leaf, MerkleProof, MerkleTree};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MerkleError {
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
}

pub type Result<T> = std::result::Result<T, MerkleError>;
