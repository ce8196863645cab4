//! JSON-RPC 2.0 protocol types

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
    pub id: serde_json::Value,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// A finished rewards or balances report
#[derive(Debug, Clone, Deserialize)]
pub struct ReportResult {
    /// `rewards` or `balances`
    pub kind: String,
    pub slot: u64,
    pub execution_block: u64,
    #[serde(default)]
    pub interval: Option<u64>,
    #[serde(default)]
    pub merkle_root: Option<String>,
    /// `submitted`, `generated`, `already-submitted`, `consensus-reached`
    /// or `root-mismatch`
    pub outcome: String,
}

/// Result of the `status` method
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    pub running: bool,
    pub record_start_slot: u64,
    pub record_last_slot: u64,
    pub record_interval: u64,
    #[serde(default)]
    pub finalized_epoch: Option<u64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_report: Option<ReportResult>,
}

/// Result of the `trigger_update` method
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerResult {
    pub started: bool,
}
