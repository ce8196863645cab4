//! Content identifiers for published artifacts

use sha2::{Digest, Sha256};

/// Computes the content identifier under which a file is published
pub trait ContentAddresser: Send + Sync {
    fn compute_cid(&self, bytes: &[u8]) -> String;
}

/// CIDv0: base58btc of the sha2-256 multihash (`0x12 0x20 || digest`)
#[derive(Debug, Clone, Copy, Default)]
pub struct Cidv0Addresser;

impl ContentAddresser for Cidv0Addresser {
    fn compute_cid(&self, bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        let mut multihash = Vec::with_capacity(34);
        multihash.extend_from_slice(&[0x12, 0x20]);
        multihash.extend_from_slice(&digest);
        bs58::encode(multihash).into_string()
    }
}
