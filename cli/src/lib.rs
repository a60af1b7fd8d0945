//! Client library for the devguard daemon
//!
//! A thin newline-framed JSON-RPC client over local TCP. One connection per
//! call; the daemon is on the same machine and the operations are
//! request/response.

#![allow(unused_crate_dependencies)]

use ipc::IpcError;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Connection settings for the local daemon
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon host
    pub host: String,
    /// Daemon port
    pub port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 48_621,
        }
    }
}

/// The daemon client
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
    next_id: u64,
}

impl Client {
    /// Client for the given daemon address
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self { config, next_id: 1 }
    }

    /// Issue a raw JSON-RPC call
    ///
    /// # Errors
    ///
    /// Connection, framing, and decoding failures.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, IpcError> {
        let id = self.next_id;
        self.next_id += 1;
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| IpcError::ConnectionFailed(format!("{addr}: {e}")))?;

        let mut data = serde_json::to_vec(&request)
            .map_err(|e| IpcError::SerializationFailed(e.to_string()))?;
        data.push(b'\n');
        stream
            .write_all(&data)
            .await
            .map_err(|e| IpcError::SendFailed(e.to_string()))?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| IpcError::ReceiveFailed(e.to_string()))?;
        serde_json::from_str(&line).map_err(|e| IpcError::DeserializationFailed(e.to_string()))
    }

    /// Call a tool and return the response envelope
    ///
    /// # Errors
    ///
    /// Transport failures, or a JSON-RPC error from the daemon.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, IpcError> {
        let response = self
            .call("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        if let Some(error) = response.get("error") {
            return Err(IpcError::ProtocolError(error.to_string()));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| IpcError::ProtocolError("response without result".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 48_621);
    }

    #[tokio::test]
    async fn test_connection_refused_is_reported() {
        // Port 1 on loopback is never bound in test environments.
        let mut client = Client::new(ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
        });
        let err = client.call("initialize", Value::Null).await.unwrap_err();
        assert!(matches!(err, IpcError::ConnectionFailed(_)));
    }
}
