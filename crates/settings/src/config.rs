//! Configuration types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{default_data_dir, default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub records: RecordSettings,

    #[serde(default)]
    pub oracle: OracleSettings,

    #[serde(default)]
    pub beacon: BeaconSettings,

    #[serde(default)]
    pub execution: ExecutionSettings,

    #[serde(default)]
    pub daemon: DaemonSettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            info!("Loaded settings from {:?}", path);
            settings
        } else {
            Self::default()
        };
        settings.config_path = Some(path.to_path_buf());
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.records.checkpoint_interval_epochs == 0 {
            return Err(SettingsError::Invalid(
                "records.checkpoint_interval_epochs must be at least 1".to_string(),
            ));
        }
        if self.records.retention_limit == 0 {
            return Err(SettingsError::Invalid(
                "records.retention_limit must be at least 1".to_string(),
            ));
        }
        if self.records.thread_limit == 0 {
            return Err(SettingsError::Invalid(
                "records.thread_limit must be at least 1".to_string(),
            ));
        }
        if let Some(url) = &self.execution.archive_url {
            if url.trim().is_empty() {
                return Err(SettingsError::Invalid(
                    "execution.archive_url must not be empty".to_string(),
                ));
            }
        }
        if self.daemon.update_interval_secs == 0 {
            return Err(SettingsError::Invalid(
                "daemon.update_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Rolling record checkpoints. Relative to `data_dir` unless absolute.
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,

    /// Rewards trees and performance files
    #[serde(default = "default_rewards_dir")]
    pub rewards_dir: PathBuf,

    /// Daemon JSON-RPC socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

fn default_records_dir() -> PathBuf {
    PathBuf::from("records")
}

fn default_rewards_dir() -> PathBuf {
    PathBuf::from("rewards")
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("stakecraft.sock")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            records_dir: default_records_dir(),
            rewards_dir: default_rewards_dir(),
            socket_path: default_socket_path(),
        }
    }
}

impl PathSettings {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn records(&self) -> PathBuf {
        self.resolve(&self.records_dir)
    }

    pub fn rewards(&self) -> PathBuf {
        self.resolve(&self.rewards_dir)
    }

    pub fn socket(&self) -> PathBuf {
        self.resolve(&self.socket_path)
    }
}

/// Rolling record maintenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSettings {
    /// Epochs between checkpoints while extending a record
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_epochs: u64,

    /// Checkpoints kept on disk
    #[serde(default = "default_retention_limit")]
    pub retention_limit: usize,

    /// Concurrent attestation fetches per epoch
    #[serde(default = "default_thread_limit")]
    pub thread_limit: usize,

    /// First slot of the initial record, instead of the interval start
    #[serde(default)]
    pub start_slot: Option<u64>,
}

fn default_checkpoint_interval() -> u64 {
    45
}

fn default_retention_limit() -> usize {
    200
}

fn default_thread_limit() -> usize {
    12
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval_epochs: default_checkpoint_interval(),
            retention_limit: default_retention_limit(),
            thread_limit: default_thread_limit(),
            start_slot: None,
        }
    }
}

/// Oracle identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSettings {
    /// Network name used in artifact filenames
    #[serde(default = "default_network")]
    pub network: String,

    /// Node address (`0x`-prefixed hex)
    #[serde(default = "default_node_address")]
    pub node_address: String,

    /// Whether this node votes as an oracle committee member
    #[serde(default)]
    pub committee_member: bool,
}

fn default_network() -> String {
    "mainnet".to_string()
}

fn default_node_address() -> String {
    "0x0000000000000000000000000000000000000000".to_string()
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            network: default_network(),
            node_address: default_node_address(),
            committee_member: false,
        }
    }
}

/// Beacon client selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BeaconMode {
    /// In-memory chain, for development
    #[default]
    Mock,
    /// Beacon REST API
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconSettings {
    #[serde(default)]
    pub mode: BeaconMode,

    #[serde(default = "default_beacon_url")]
    pub url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

fn default_beacon_url() -> String {
    "http://localhost:5052".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for BeaconSettings {
    fn default() -> Self {
        Self {
            mode: BeaconMode::default(),
            url: default_beacon_url(),
            request_timeout_secs: default_timeout(),
        }
    }
}

/// Execution client options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Archive node used when the primary client has pruned the state a
    /// snapshot needs
    #[serde(default)]
    pub archive_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Seconds between update cycles
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
}

fn default_update_interval() -> u64 {
    300
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
        }
    }
}
