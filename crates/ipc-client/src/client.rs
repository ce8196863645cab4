//! IPC Client implementation

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::protocol::{RpcRequest, RpcResponse, StatusResult, TriggerResult};
use crate::{IpcError, Result};

/// IPC client for the StakeCraft daemon
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    /// Create a new IPC client
    ///
    /// Note: This doesn't establish a connection. Each request creates a new connection.
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            request_id: AtomicU64::new(1),
        }
    }

    /// Connect to the daemon and verify it's running
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let client = Self::new(socket_path.to_path_buf());

        // Verify daemon is running by sending a status request
        client.status().await?;

        Ok(client)
    }

    /// Get the next request ID
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a raw JSON-RPC request
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound
                    || e.kind() == std::io::ErrorKind::ConnectionRefused
                {
                    IpcError::DaemonNotRunning
                } else {
                    IpcError::ConnectionFailed(e.to_string())
                }
            })?;

        let (reader, mut writer) = stream.into_split();
        self.send_and_receive(reader, &mut writer, method, params).await
    }

    /// Write one request line and read one response line
    async fn send_and_receive<R, W>(
        &self,
        reader: R,
        writer: &mut W,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value>
    where
        R: tokio::io::AsyncRead + Unpin,
        W: tokio::io::AsyncWrite + Unpin,
    {
        // Build and send request
        let request = RpcRequest::new(method, params, self.next_id());
        let request_json = serde_json::to_string(&request)?;
        debug!("Sending request: {}", request_json);

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        // Read response
        let mut reader = BufReader::new(reader);
        let mut response_str = String::new();
        reader.read_line(&mut response_str).await?;
        debug!("Received response: {}", response_str.trim());

        let response: RpcResponse = serde_json::from_str(&response_str)
            .map_err(|e| IpcError::InvalidResponse(e.to_string()))?;

        // Check for error
        if let Some(error) = response.error {
            return Err(IpcError::DaemonError {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Record range, finality and the last report
    pub async fn status(&self) -> Result<StatusResult> {
        let result = self.send_request("status", None).await?;
        serde_json::from_value(result).map_err(|e| IpcError::InvalidResponse(e.to_string()))
    }

    /// Start an update cycle. `started` is false if one is already running.
    pub async fn trigger_update(&self) -> Result<TriggerResult> {
        let result = self.send_request("trigger_update", None).await?;
        serde_json::from_value(result).map_err(|e| IpcError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Answer one request on `path` with `response`
    fn serve_once(path: &Path, response: &'static str) -> tokio::task::JoinHandle<String> {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut request = String::new();
            reader.read_line(&mut request).await.unwrap();
            writer.write_all(response.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
            request
        })
    }

    #[test]
    fn test_client_creation() {
        let client = IpcClient::new(PathBuf::from("/tmp/test.sock"));
        assert_eq!(client.socket_path, PathBuf::from("/tmp/test.sock"));
    }

    #[test]
    fn test_request_id_increments() {
        let client = IpcClient::new(PathBuf::from("/tmp/test.sock"));
        assert_eq!(client.next_id(), 1);
        assert_eq!(client.next_id(), 2);
        assert_eq!(client.next_id(), 3);
    }

    #[tokio::test]
    async fn test_daemon_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let client = IpcClient::new(dir.path().join("missing.sock"));
        let err = client.status().await.unwrap_err();
        assert!(matches!(err, IpcError::DaemonNotRunning));
    }

    #[tokio::test]
    async fn test_status_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let server = serve_once(
            &path,
            r#"{"jsonrpc":"2.0","result":{"running":false,"record_start_slot":100,"record_last_slot":250,"record_interval":7,"finalized_epoch":9,"last_error":null,"last_report":null},"error":null,"id":1}"#,
        );

        let client = IpcClient::new(path);
        let status = client.status().await.unwrap();
        assert_eq!(status.record_interval, 7);
        assert_eq!(status.record_last_slot, 250);
        assert_eq!(status.finalized_epoch, Some(9));

        let request: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(request["method"], "status");
        assert_eq!(request["jsonrpc"], "2.0");
    }

    #[tokio::test]
    async fn test_daemon_error_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let _server = serve_once(
            &path,
            r#"{"jsonrpc":"2.0","result":null,"error":{"code":-32000,"message":"Method not found: trigger_update","data":null},"id":1}"#,
        );

        let client = IpcClient::new(path);
        let err = client.trigger_update().await.unwrap_err();
        assert!(matches!(err, IpcError::DaemonError { code: -32000, .. }));
    }
}
