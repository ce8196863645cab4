//! Sorted-pair keccak Merkle tree

use alloy_primitives::{keccak256, B256};

use crate::{MerkleError, Result};

/// Hash raw leaf data
pub fn merkle_leaf(data: &[u8]) -> B256 {
    keccak256(data)
}

/// Parent of two nodes, order independent
pub fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_slice());
    buf[32..].copy_from_slice(hi.as_slice());
    keccak256(buf)
}

/// Binary Merkle tree over pre-hashed leaves.
///
/// The leaf level is padded with zero hashes up to the next power of two.
/// A tree with a single leaf has that leaf as its root; an empty tree has a
/// zero root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// levels[0] is the padded leaf level, the last level holds the root
    levels: Vec<Vec<B256>>,
    leaf_count: usize,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<B256>) -> Self {
        let leaf_count = leaves.len();
        if leaf_count == 0 {
            return Self {
                levels: vec![vec![B256::ZERO]],
                leaf_count,
            };
        }

        let mut level = leaves;
        level.resize(leaf_count.next_power_of_two(), B256::ZERO);

        let mut levels = vec![level];
        while levels[levels.len() - 1].len() > 1 {
            let next = levels[levels.len() - 1]
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(next);
        }

        Self { levels, leaf_count }
    }

    /// Build from raw leaf data, hashing each entry
    pub fn from_data<D: AsRef<[u8]>>(data: &[D]) -> Self {
        Self::from_leaves(data.iter().map(|d| merkle_leaf(d.as_ref())).collect())
    }

    pub fn root(&self) -> B256 {
        self.levels
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or(B256::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn leaf(&self, index: usize) -> Option<B256> {
        if index >= self.leaf_count {
            return None;
        }
        self.levels.first().and_then(|l| l.get(index)).copied()
    }

    /// Proof for the leaf at `index`
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let leaf = self.leaf(index)?;
        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            siblings.push(level[position ^ 1]);
            position /= 2;
        }
        Some(MerkleProof { leaf, siblings })
    }
}

/// Inclusion proof of one leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf: B256,
    /// Sibling hashes from the leaf level upwards
    pub siblings: Vec<B256>,
}

impl MerkleProof {
    pub fn compute_root(&self) -> B256 {
        self.siblings
            .iter()
            .fold(self.leaf, |acc, sibling| hash_pair(&acc, sibling))
    }

    pub fn verify(&self, root: &B256) -> bool {
        self.compute_root() == *root
    }

    /// `0x`-prefixed hex strings, as stored in rewards files
    pub fn to_hex_strings(&self) -> Vec<String> {
        self.siblings.iter().map(|h| format!("{:#x}", h)).collect()
    }

    pub fn from_hex_strings(leaf: B256, hashes: &[String]) -> Result<Self> {
        let siblings = hashes
            .iter()
            .map(|h| {
                h.parse::<B256>()
                    .map_err(|_| MerkleError::InvalidHash(h.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { leaf, siblings })
    }
}
