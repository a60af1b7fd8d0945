//! Local JSON-RPC server over newline-framed TCP
//!
//! Listens on the loopback interface and speaks JSON-RPC 2.0, one request
//! per line. The server trusts its single local client; there is no
//! handshake and no authentication. Methods:
//!
//! - `initialize`: server name and version
//! - `tools/list`: the available tools
//! - `tools/call`: `{name, arguments}`; short aliases (`ps`, `kill`,
//!   `killall`, `netstat`, `status`) resolve to canonical tool names here,
//!   at the transport boundary
//!
//! The engine sits behind the [`ToolPlane`] trait so this crate never
//! depends on the core directly.

use crate::{IpcError, Result};
use schema::{resolve_alias, ToolInfo, ToolResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Maximum allowed frame size for requests (64KB)
const MAX_FRAME_SIZE: usize = 64 * 1024;

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    #[serde(default)]
    id: Option<Value>,
}

/// JSON-RPC error object
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }
    fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// Abstract tool plane the IPC server delegates to
#[async_trait::async_trait]
pub trait ToolPlane: Send + Sync {
    /// Execute a tool call; `name` is already canonical
    async fn call(&self, name: &str, arguments: Value) -> ToolResponse;

    /// The tools this server exposes
    fn tools(&self) -> Vec<ToolInfo>;
}

/// Configuration for the local IPC server
#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    /// Loopback host to bind
    pub host: String,
    /// Port to bind; 0 picks an ephemeral port
    pub port: u16,
    /// Daemon semantic version reported by `initialize`
    pub version: String,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 48_621,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// IPC server entry
#[allow(missing_debug_implementations)]
pub struct IpcServer {
    config: IpcServerConfig,
    plane: Arc<dyn ToolPlane>,
}

impl IpcServer {
    /// Create a server delegating to the given tool plane
    pub fn new(config: IpcServerConfig, plane: Arc<dyn ToolPlane>) -> Self {
        Self { config, plane }
    }

    /// Bind the listener; returns the bound address for ephemeral ports
    ///
    /// # Errors
    ///
    /// [`IpcError::ConnectionFailed`] when binding fails.
    pub async fn bind(&self) -> Result<(TcpListener, std::net::SocketAddr)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| IpcError::ConnectionFailed(format!("Failed to bind {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;
        info!("IPC server listening on {}", local);
        Ok((listener, local))
    }

    /// Accept and serve connections forever
    ///
    /// # Errors
    ///
    /// Propagates bind failures; per-connection errors are logged.
    pub async fn serve(&self) -> Result<()> {
        let (listener, _) = self.bind().await?;
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener
    ///
    /// # Errors
    ///
    /// Never returns except on accept-loop failure.
    pub async fn serve_on(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("New IPC connection from {}", addr);
                    let plane = self.plane.clone();
                    let version = self.config.version.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, plane, version).await {
                            warn!("IPC connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept IPC connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    plane: Arc<dyn ToolPlane>,
    version: String,
) -> Result<()> {
    let (reader_half, mut writer_half) = stream.into_split();
    let mut reader = BufReader::new(reader_half);
    let mut frame = Vec::with_capacity(1024);

    loop {
        frame.clear();
        let n = reader
            .read_until(b'\n', &mut frame)
            .await
            .map_err(|e| IpcError::ReceiveFailed(e.to_string()))?;
        if n == 0 {
            break;
        }
        if frame.len() > MAX_FRAME_SIZE {
            return Err(IpcError::FrameTooLarge(frame.len()));
        }
        if matches!(frame.last(), Some(b'\n')) {
            frame.pop();
            if matches!(frame.last(), Some(b'\r')) {
                frame.pop();
            }
        }
        if frame.is_empty() {
            continue;
        }

        let response = match serde_json::from_slice::<JsonRpcRequest>(&frame) {
            Ok(request) => route(request, plane.as_ref(), &version).await,
            Err(e) => {
                debug!("Undecodable request: {}", e);
                JsonRpcResponse::err(None, -32700, format!("Parse error: {e}"))
            }
        };

        let mut data = serde_json::to_vec(&response)
            .map_err(|e| IpcError::SerializationFailed(e.to_string()))?;
        data.push(b'\n');
        writer_half
            .write_all(&data)
            .await
            .map_err(|e| IpcError::SendFailed(e.to_string()))?;
    }

    Ok(())
}

async fn route(
    request: JsonRpcRequest,
    plane: &dyn ToolPlane,
    version: &str,
) -> JsonRpcResponse {
    if request.jsonrpc != "2.0" {
        return JsonRpcResponse::err(request.id, -32600, "Invalid request: jsonrpc must be 2.0");
    }
    let id = request.id;
    let params = request.params.unwrap_or(Value::Null);

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::ok(
            id,
            serde_json::json!({
                "serverInfo": { "name": "devguard", "version": version },
            }),
        ),
        "tools/list" => {
            let tools = plane.tools();
            JsonRpcResponse::ok(id, serde_json::json!({ "tools": tools }))
        }
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return JsonRpcResponse::err(id, -32602, "missing tool name");
            };
            let canonical = resolve_alias(name);
            if canonical != name {
                debug!("Alias '{}' mapped to '{}'", name, canonical);
            }
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            let response = plane.call(canonical, arguments).await;
            match serde_json::to_value(&response) {
                Ok(value) => JsonRpcResponse::ok(id, value),
                Err(e) => JsonRpcResponse::err(id, -32603, format!("Internal error: {e}")),
            }
        }
        other => JsonRpcResponse::err(id, -32601, format!("Method not found: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{ErrorBody, ErrorKind};

    struct EchoPlane;

    #[async_trait::async_trait]
    impl ToolPlane for EchoPlane {
        async fn call(&self, name: &str, arguments: Value) -> ToolResponse {
            if name == "dev_status" {
                ToolResponse::ok(0.01, &serde_json::json!({ "echo": arguments }))
            } else {
                ToolResponse::fail(
                    0.01,
                    ErrorBody::new(
                        ErrorKind::InvalidArgument,
                        "use tools/list to see valid tools",
                        format!("unknown tool: {name}"),
                    ),
                )
            }
        }

        fn tools(&self) -> Vec<ToolInfo> {
            vec![ToolInfo {
                name: "dev_status".to_string(),
                summary: "test tool".to_string(),
            }]
        }
    }

    async fn start_server() -> std::net::SocketAddr {
        let config = IpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            version: "0.0.0-test".to_string(),
        };
        let server = IpcServer::new(config, Arc::new(EchoPlane));
        let (listener, addr) = server.bind().await.unwrap();
        tokio::spawn(async move {
            let _ = server.serve_on(listener).await;
        });
        addr
    }

    async fn roundtrip(addr: std::net::SocketAddr, request: Value) -> Value {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut data = serde_json::to_vec(&request).unwrap();
        data.push(b'\n');
        stream.write_all(&data).await.unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_initialize() {
        let addr = start_server().await;
        let response = roundtrip(
            addr,
            serde_json::json!({"jsonrpc": "2.0", "method": "initialize", "id": 1}),
        )
        .await;
        assert_eq!(response["result"]["serverInfo"]["name"], "devguard");
        assert_eq!(response["id"], 1);
    }

    #[tokio::test]
    async fn test_tools_call_with_alias() {
        let addr = start_server().await;
        let response = roundtrip(
            addr,
            serde_json::json!({
                "jsonrpc": "2.0",
                "method": "tools/call",
                "params": {"name": "status", "arguments": {"x": 1}},
                "id": 2,
            }),
        )
        .await;
        // "status" resolves to dev_status, which echoes its arguments.
        assert_eq!(response["result"]["success"], true);
        assert_eq!(response["result"]["echo"]["x"], 1);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let addr = start_server().await;
        let response = roundtrip(
            addr,
            serde_json::json!({"jsonrpc": "2.0", "method": "nope", "id": 3}),
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_wrong_version_rejected() {
        let addr = start_server().await;
        let response = roundtrip(
            addr,
            serde_json::json!({"jsonrpc": "1.0", "method": "initialize", "id": 4}),
        )
        .await;
        assert_eq!(response["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let addr = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"this is not json\n").await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["error"]["code"], -32700);
    }
}
