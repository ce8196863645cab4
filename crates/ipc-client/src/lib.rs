//! StakeCraft IPC Client
//!
//! JSON-RPC 2.0 client for the daemon's Unix socket. Each request opens its
//! own connection and reads one newline-terminated response.

mod client;
mod protocol;

pub use client::IpcClient;
pub use protocol::{ReportResult, RpcError, RpcRequest, RpcResponse, StatusResult, TriggerResult};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Daemon is not running")]
    DaemonNotRunning,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Daemon error {code}: {message}")]
    DaemonError { code: i32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;
