//! StakeCraft Beacon
//!
//! Read-only access to a consensus-layer (beacon) node.
//!
//! ## Implementations
//!
//! - **HttpBeaconClient**: standard Beacon REST API over `reqwest`
//! - **MockBeaconClient**: in-memory chain for development and tests. Blocks,
//!   committees and attestations are inserted directly and every call is
//!   counted so tests can assert on chain access.

mod client;
mod http;
mod mock;

pub use client::BeaconClient;
pub use http::{HttpBeaconClient, HttpBeaconConfig};
pub use mock::MockBeaconClient;

use stakecraft_core::StakecraftError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Beacon node returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, BeaconError>;

impl From<BeaconError> for StakecraftError {
    fn from(e: BeaconError) -> Self {
        match e {
            BeaconError::InvalidResponse(msg) => StakecraftError::Serialization(msg),
            other => StakecraftError::TransientIo(other.to_string()),
        }
    }
}
