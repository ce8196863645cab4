//! StakeCraft Settings
//!
//! Daemon and CLI configuration, stored as JSON.
//!
//! ## Sections
//!
//! - `paths`: data, records and rewards directories, IPC socket
//! - `records`: checkpoint cadence, retention and fetch concurrency
//! - `oracle`: network name, node identity, committee membership
//! - `beacon`: beacon client mode and endpoint
//! - `execution`: optional archive execution client
//! - `daemon`: update cadence
//!
//! Every field has a default, so a partial (or missing) file is valid.
//!
//! ## Usage
//!
//! ```no_run
//! use stakecraft_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.records.retention_limit = 50;
//! settings.save()?;
//! # Ok::<(), stakecraft_settings::SettingsError>(())
//! ```

mod config;
mod paths;

pub use config::{
    BeaconMode, BeaconSettings, DaemonSettings, ExecutionSettings, OracleSettings, PathSettings,
    RecordSettings, Settings,
};
pub use paths::{default_data_dir, expand_path};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_data_dir().join("settings.json")
}
