//! StakeCraft Records
//!
//! Rolling attestation record for the smoothing pool and its on-disk
//! checkpoints.
//!
//! ## Record lifecycle
//!
//! A record covers one rewards interval from its start slot. It is extended
//! forward in chunks as epochs finalize. Each update collects the committee
//! duties of tracked minipools, marks them missing, then clears them again
//! as matching attestations are found in the blocks up to one epoch after
//! the target. Every successful attestation adds the minipool's
//! bond-weighted commission to its score.
//!
//! ## Checkpoints
//!
//! Records are stored as zstd-compressed JSON named `{slot}-{epoch}.json.zst`,
//! indexed by `checksums.sha384` (SHA-384 over the compressed bytes). On
//! startup the newest usable checkpoint for the interval is resumed.

mod checkpoint;
mod duties;
mod record;

pub use checkpoint::{CheckpointEntry, CheckpointStore, INDEX_FILENAME};
pub use duties::attestation_score;
pub use record::{MinipoolInfo, RollingRecord, MIN_COMPATIBLE_VERSION, RECORD_VERSION};

/// Default number of concurrent attestation fetches
pub const DEFAULT_THREAD_LIMIT: usize = 12;
