//! IPC server for JSON-RPC communication

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{DaemonError, Result};

/// IPC server configuration
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// Unix socket path
    pub socket_path: PathBuf,
}

impl Default for IpcConfig {
    fn default() -> Self {
        let path = if cfg!(target_os = "linux") {
            let xdg_runtime = std::env::var("XDG_RUNTIME_DIR")
                .unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(format!("{}/stakecraft.sock", xdg_runtime))
        } else {
            PathBuf::from("/tmp/stakecraft.sock")
        };

        Self { socket_path: path }
    }
}

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: serde_json::Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
    pub id: serde_json::Value,
}

/// JSON-RPC error
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: serde_json::Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// Handler for IPC requests
pub trait IpcHandler: Send + Sync {
    /// Handle a JSON-RPC request
    fn handle(&self, method: &str, params: Option<serde_json::Value>)
        -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<serde_json::Value, String>> + Send + '_>>;
}

/// IPC server
pub struct IpcServer {
    config: IpcConfig,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(config: IpcConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
        }
    }

    /// Start the IPC server
    pub async fn start<H: IpcHandler + 'static>(&mut self, handler: H) -> Result<()> {
        // Remove a stale socket left by a previous run
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)
            .map_err(|e| DaemonError::IpcError(format!("Failed to bind: {}", e)))?;

        info!("IPC server listening on {:?}", self.config.socket_path);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let handler = Arc::new(handler);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    warn!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.config.socket_path);

        Ok(())
    }

    /// Serve newline-delimited requests until the client disconnects
    async fn handle_connection<H: IpcHandler + 'static>(
        stream: UnixStream,
        handler: Arc<H>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = match reader.read_line(&mut line).await {
                Ok(n) => n,
                Err(e) => {
                    debug!("Read error: {}", e);
                    break;
                }
            };

            if bytes_read == 0 {
                break;
            }

            debug!("Received: {}", line.trim());
            let response = Self::respond(handler.as_ref(), &line).await;

            let response_str = match serde_json::to_string(&response) {
                Ok(s) => s,
                Err(e) => {
                    error!("Serialize error: {}", e);
                    break;
                }
            };

            debug!("Sending: {}", response_str);
            writer.write_all(response_str.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    async fn respond<H: IpcHandler>(handler: &H, line: &str) -> JsonRpcResponse {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) if request.jsonrpc != "2.0" => JsonRpcResponse::error(
                request.id,
                -32600,
                "Invalid Request: jsonrpc must be '2.0'".to_string(),
            ),
            Ok(request) => match handler.handle(&request.method, request.params).await {
                Ok(result) => JsonRpcResponse::success(request.id, result),
                Err(msg) => JsonRpcResponse::error(request.id, -32000, msg),
            },
            Err(e) => JsonRpcResponse::error(
                serde_json::Value::Null,
                -32700,
                format!("Parse error: {}", e),
            ),
        }
    }

    /// Stop the IPC server
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &PathBuf {
        &self.config.socket_path
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    use super::*;

    struct EchoHandler;

    impl IpcHandler for EchoHandler {
        fn handle(
            &self,
            method: &str,
            params: Option<serde_json::Value>,
        ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, String>> + Send + '_>>
        {
            let method = method.to_string();
            Box::pin(async move {
                match method.as_str() {
                    "echo" => Ok(params.unwrap_or(serde_json::Value::Null)),
                    _ => Err(format!("Method not found: {}", method)),
                }
            })
        }
    }

    #[test]
    fn test_default_config() {
        let config = IpcConfig::default();
        assert!(config.socket_path.to_str().unwrap().contains("stakecraft"));
    }

    #[test]
    fn test_json_rpc_response_success() {
        let response = JsonRpcResponse::success(
            serde_json::json!(1),
            serde_json::json!({"record_interval": 3}),
        );

        assert_eq!(response.jsonrpc, "2.0");
        assert!(response.result.is_some());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_json_rpc_response_error() {
        let response = JsonRpcResponse::error(
            serde_json::json!(1),
            -32600,
            "Invalid Request".to_string(),
        );

        assert_eq!(response.jsonrpc, "2.0");
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[test]
    fn test_parse_request() {
        let json = r#"{"jsonrpc":"2.0","method":"status","id":1}"#;
        let request: JsonRpcRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.method, "status");
        assert!(request.params.is_none());
    }

    // ==================== NEGATIVE TESTS ====================

    #[test]
    fn test_parse_missing_fields() {
        for json in [
            r#"{not valid json}"#,
            r#"{"method":"status","id":1}"#,
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0","method":"status"}"#,
        ] {
            let result: std::result::Result<JsonRpcRequest, _> = serde_json::from_str(json);
            assert!(result.is_err(), "{} should not parse", json);
        }
    }

    #[test]
    fn test_string_and_null_ids() {
        let json = r#"{"jsonrpc":"2.0","method":"status","id":"abc-123"}"#;
        let request: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.id, "abc-123");

        let json = r#"{"jsonrpc":"2.0","method":"status","id":null}"#;
        let request: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert!(request.id.is_null());
    }

    #[tokio::test]
    async fn test_respond_error_codes() {
        let parse = IpcServer::respond(&EchoHandler, "{oops").await;
        assert_eq!(parse.error.unwrap().code, -32700);
        assert!(parse.id.is_null());

        let version =
            IpcServer::respond(&EchoHandler, r#"{"jsonrpc":"1.0","method":"echo","id":7}"#).await;
        assert_eq!(version.error.unwrap().code, -32600);
        assert_eq!(version.id, 7);

        let unknown =
            IpcServer::respond(&EchoHandler, r#"{"jsonrpc":"2.0","method":"nope","id":8}"#).await;
        let error = unknown.error.unwrap();
        assert_eq!(error.code, -32000);
        assert!(error.message.contains("nope"));
    }

    #[tokio::test]
    async fn test_socket_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");
        let mut server = IpcServer::new(IpcConfig {
            socket_path: socket_path.clone(),
        });
        let server_task = tokio::spawn(async move { server.start(EchoHandler).await });

        let mut stream = None;
        for _ in 0..50 {
            match UnixStream::connect(&socket_path).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let (reader, mut writer) = stream.expect("server did not start").into_split();
        let mut reader = BufReader::new(reader);

        for id in 1..=2 {
            let request = format!(
                r#"{{"jsonrpc":"2.0","method":"echo","params":{{"n":{}}},"id":{}}}"#,
                id, id
            );
            writer.write_all(request.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();

            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let response: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert_eq!(response["id"], id);
            assert_eq!(response["result"]["n"], id);
        }

        server_task.abort();
    }

    #[test]
    fn test_ipc_server_creation() {
        let config = IpcConfig {
            socket_path: PathBuf::from("/tmp/stakecraft-test.sock"),
        };
        let server = IpcServer::new(config.clone());
        assert_eq!(server.socket_path(), &config.socket_path);
    }
}
