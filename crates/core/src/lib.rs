//! StakeCraft Core Types
//!
//! This crate defines the data structures shared by every StakeCraft crate:
//! beacon chain primitives, the protocol state read from the execution layer,
//! the joint [`StateSnapshot`], and the error taxonomy.
//!
//! ## Units
//!
//! All ETH and RPL amounts are `U256` values in wei. Percentages and
//! fractions use the same 18-decimal fixed point (`1e18 == 100%`).
//! Amounts that end up in JSON artifacts are written as quoted decimal
//! strings via the [`quoted`] serde helpers.

mod error;
pub mod quoted;
mod snapshot;
mod types;

pub use error::*;
pub use snapshot::*;
pub use types::*;

pub use alloy_primitives::{Address, FixedBytes, B256, U256};
