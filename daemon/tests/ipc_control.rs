//! End-to-end IPC control tests: a bootstrapped daemon driven over TCP

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

async fn start_daemon() -> (daemon::BootstrapHandle, std::net::SocketAddr) {
    let config = daemon::DaemonConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        log_level: "warn".to_string(),
    };
    let handle = daemon::bootstrap(config).await.expect("bootstrap");
    let addr = handle.local_addr;
    (handle, addr)
}

async fn call(addr: std::net::SocketAddr, request: Value) -> Value {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let mut data = serde_json::to_vec(&request).unwrap();
    data.push(b'\n');
    stream.write_all(&data).await.unwrap();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    serde_json::from_str(&line).expect("valid JSON response")
}

#[tokio::test]
async fn test_initialize_and_tools_list() {
    let (handle, addr) = start_daemon().await;

    let init = call(
        addr,
        json!({"jsonrpc": "2.0", "method": "initialize", "id": 1}),
    )
    .await;
    assert_eq!(init["result"]["serverInfo"]["name"], "devguard");

    let list = call(
        addr,
        json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}),
    )
    .await;
    let tools = list["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"find_process"));
    assert!(names.contains(&"kill_process_tree"));
    assert!(names.contains(&"check_ports"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_find_process_over_the_wire() {
    let (handle, addr) = start_daemon().await;

    // Every live host has at least one process matching a two-letter query
    // against this test binary's own name; use the instant tier.
    let response = call(
        addr,
        json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "ps", "arguments": {"name": "ipc", "mode": "instant"}},
            "id": 3,
        }),
    )
    .await;
    assert_eq!(response["result"]["success"], true);
    assert!(response["result"]["count"].is_number());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_short_query_is_invalid_argument() {
    let (handle, addr) = start_daemon().await;

    let response = call(
        addr,
        json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "find_process", "arguments": {"name": "a"}},
            "id": 4,
        }),
    )
    .await;
    assert_eq!(response["result"]["success"], false);
    assert_eq!(response["result"]["error"], "InvalidArgument");
    assert!(!response["result"]["suggestion"]
        .as_str()
        .unwrap()
        .is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_kill_missing_process_over_the_wire() {
    let (handle, addr) = start_daemon().await;

    let response = call(
        addr,
        json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "kill", "arguments": {"pid": 4_294_900_000_u32}},
            "id": 5,
        }),
    )
    .await;
    assert_eq!(response["result"]["success"], false);
    assert_eq!(response["result"]["error"], "ProcessNotFound");

    handle.shutdown().await;
}
