//! MCP protocol integration tests

use serde_json::{json, Value};
use tempfile::TempDir;

use pommel::config::Config;
use pommel::mcp::{JsonRpcRequest, McpServer};
use pommel::store::{ModelInfo, Store};

/// Helper to create a test MCP server with an initialized, empty index.
fn setup_test_server() -> (TempDir, McpServer) {
    let dir = TempDir::new().unwrap();
    let project_root = dir.path().to_path_buf();

    let pommel_dir = project_root.join(".pommel");
    std::fs::create_dir_all(&pommel_dir).unwrap();

    let config = Config::load(&project_root);
    let index_path = config.store.path_or_default(&project_root);
    let model = ModelInfo::default();
    Store::open(&index_path, Some(&model)).unwrap().close().unwrap();

    let server = McpServer::new(&project_root, &config).unwrap();
    (dir, server)
}

fn make_request(method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest { jsonrpc: "2.0".into(), id: Some(json!(1)), method: method.into(), params }
}

#[test]
fn test_initialize() {
    let (_dir, server) = setup_test_server();

    let request = make_request(
        "initialize",
        Some(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        })),
    );

    let response = server.handle_request(request);

    assert!(response.error.is_none(), "Expected success, got error: {:?}", response.error);
    let result = response.result.unwrap();
    assert_eq!(result["serverInfo"]["name"], "pommel");
    assert!(result["protocolVersion"].is_string());
    assert!(result["capabilities"]["tools"].is_object());
}

#[test]
fn test_tools_list() {
    let (_dir, server) = setup_test_server();

    let request = make_request("tools/list", None);
    let response = server.handle_request(request);

    assert!(response.error.is_none());
    let result = response.result.unwrap();
    let tools = result["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 2);

    let search_tool = tools.iter().find(|t| t["name"] == "search").expect("missing search tool");
    assert!(search_tool["description"].is_string());
    assert!(search_tool["inputSchema"]["properties"]["query"].is_object());

    let status_tool = tools.iter().find(|t| t["name"] == "status").expect("missing status tool");
    assert!(status_tool["description"].is_string());
}

#[test]
fn test_tools_call_status() {
    let (_dir, server) = setup_test_server();

    let request =
        make_request("tools/call", Some(json!({ "name": "status", "arguments": {} })));
    let response = server.handle_request(request);

    assert!(response.error.is_none(), "status call failed: {:?}", response.error);
    let result = response.result.unwrap();

    let content = result["content"].as_array().unwrap();
    assert!(!content.is_empty());
    assert_eq!(content[0]["type"], "text");

    let text = content[0]["text"].as_str().unwrap();
    assert!(text.contains("chunk_count"), "status text should mention chunk_count: {text}");
}

#[test]
fn test_unknown_method() {
    let (_dir, server) = setup_test_server();

    let request = make_request("unknown/method", None);
    let response = server.handle_request(request);

    assert!(response.error.is_some());
    let error = response.error.unwrap();
    assert!(error.message.contains("Unknown method"));
}

#[test]
fn test_tools_call_unknown_tool() {
    let (_dir, server) = setup_test_server();

    let request =
        make_request("tools/call", Some(json!({ "name": "unknown_tool", "arguments": {} })));
    let response = server.handle_request(request);

    assert!(response.error.is_some());
    let error = response.error.unwrap();
    assert!(error.message.contains("unknown tool"));
}

#[test]
fn test_tools_call_missing_params() {
    let (_dir, server) = setup_test_server();

    let request = make_request("tools/call", None);
    let response = server.handle_request(request);

    assert!(response.error.is_some());
    let error = response.error.unwrap();
    assert!(error.message.contains("missing params"));
}

#[test]
fn test_initialized_notification() {
    let (_dir, server) = setup_test_server();

    let request = make_request("initialized", None);
    let response = server.handle_request(request);

    assert!(response.error.is_none());
    assert_eq!(response.result, Some(Value::Null));
}

#[test]
fn test_response_has_id() {
    let (_dir, server) = setup_test_server();

    let request = JsonRpcRequest {
        jsonrpc: "2.0".into(),
        id: Some(json!(42)),
        method: "tools/list".into(),
        params: None,
    };

    let response = server.handle_request(request);
    assert_eq!(response.id, Some(json!(42)));
}
