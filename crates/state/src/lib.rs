//! StakeCraft State
//!
//! Builds consistent execution/consensus snapshots for a consensus slot.

mod provider;

pub use provider::SnapshotProvider;
