//! StakeCraft Daemon
//!
//! Keeps the rolling record current and runs the oracle reports.
//!
//! ## Components
//!
//! - **RollingRecordManager**: owns the active record, extends it in
//!   checkpointed chunks and rebuilds it from disk for past slots
//! - **Reporter**: due-checks, network balance reports, rewards tree
//!   generation and submission
//! - **DaemonService**: one update cycle at a time on a background task,
//!   with status tracking
//! - **IpcServer**: JSON-RPC 2.0 over a Unix socket
//!
//! ## IPC Methods
//!
//! - `status` - Record range, finalized epoch, last error and last report
//! - `trigger_update` - Start an update cycle now

mod ipc;
mod manager;
mod reports;
mod service;

pub use ipc::{IpcConfig, IpcHandler, IpcServer, JsonRpcRequest, JsonRpcResponse};
pub use manager::{interval_start_slot, ManagerConfig, RecordSummary, RollingRecordManager};
pub use reports::{
    balances_target_slot, find_true_slot, rewards_due, BalancesDue, CompletedReport, ReportConfig,
    ReportKind, ReportOutcome, Reporter, RewardsDue,
};
pub use service::{no_archive, DaemonService, DaemonStatus};

use stakecraft_beacon::BeaconError;
use stakecraft_core::StakecraftError;
use stakecraft_rewards::RewardsError;
use stakecraft_settings::SettingsError;
use stakecraft_settlement::SettlementError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error(transparent)]
    Stakecraft(#[from] StakecraftError),

    #[error("Rewards error: {0}")]
    Rewards(#[from] RewardsError),

    #[error("Protocol error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Beacon error: {0}")]
    Beacon(#[from] BeaconError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Event for rewards interval {0} not found")]
    MissingEvent(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
