//! MCP 客户端测试：本地 axum 假服务器（JSON-RPC over streamable HTTP）

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};

use mcp_chat::config::McpConfig;
use mcp_chat::mcp::{McpClient, McpError, ToolServer};

#[derive(Default)]
struct FakeState {
    initialized: AtomicUsize,
    notifications: AtomicUsize,
    /// 当前有效的会话 ID
    session: Mutex<Option<String>>,
    /// 非 initialize 请求携带的会话头
    seen_sessions: Mutex<Vec<Option<String>>>,
    sse: AtomicBool,
    expire_next: AtomicBool,
    unavailable: AtomicUsize,
}

impl FakeState {
    fn current_session(&self) -> Option<String> {
        self.session.lock().unwrap().clone()
    }
}

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn rpc_error(id: &Value, code: i64, message: String) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn text_result(text: String, is_error: bool) -> Value {
    json!({"content": [{"type": "text", "text": text}], "isError": is_error})
}

fn tool(name: &str) -> Value {
    json!({"name": name, "description": format!("{name} tool"), "inputSchema": {"type": "object"}})
}

async fn handle_rpc(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    let id = body.get("id").cloned();
    let sid = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    if method == "initialize" {
        let n = state.initialized.fetch_add(1, Ordering::SeqCst) + 1;
        let session = format!("sess-{n}");
        *state.session.lock().unwrap() = Some(session.clone());
        let result = json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "fake-telemetry", "version": "0.0.1"}
        });
        let id = id.unwrap_or(Value::Null);
        return ([("mcp-session-id", session)], Json(rpc_result(&id, result))).into_response();
    }

    state.seen_sessions.lock().unwrap().push(sid.clone());
    if sid.is_none() || sid != state.current_session() {
        return StatusCode::NOT_FOUND.into_response();
    }
    if state.expire_next.swap(false, Ordering::SeqCst) {
        *state.session.lock().unwrap() = None;
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(id) = id else {
        state.notifications.fetch_add(1, Ordering::SeqCst);
        return StatusCode::ACCEPTED.into_response();
    };

    if method == "tools/call"
        && state
            .unavailable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    {
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }

    // 无 Content-Length 的分块 SSE，永不结束：只有边读边限流的客户端才能及时返回
    if body["params"]["name"] == "flood" {
        let frames = stream::iter(0u64..).map(|i| {
            let params = json!({"progress": i, "pad": "z".repeat(256)});
            let frame = json!({
                "jsonrpc": "2.0",
                "method": "notifications/progress",
                "params": params
            });
            Ok::<_, Infallible>(format!("event: message\ndata: {frame}\n\n"))
        });
        let headers = [(header::CONTENT_TYPE, "text/event-stream")];
        return (headers, Body::from_stream(frames)).into_response();
    }

    let message = match method.as_str() {
        "tools/list" => match body["params"]["cursor"].as_str() {
            None => {
                let tools = json!([tool("query_metric"), tool("loki_query")]);
                rpc_result(&id, json!({"tools": tools, "nextCursor": "page-2"}))
            }
            Some(_) => rpc_result(&id, json!({"tools": [tool("list_alerts")]})),
        },
        "tools/call" => {
            let args = &body["params"]["arguments"];
            match body["params"]["name"].as_str().unwrap_or_default() {
                "echo" => rpc_result(&id, text_result(args.to_string(), false)),
                "fails" => rpc_result(&id, text_result("metric store unreachable".into(), true)),
                "big" => rpc_result(&id, text_result("x".repeat(8 * 1024), false)),
                other => rpc_error(&id, -32602, format!("Unknown tool: {other}")),
            }
        }
        other => rpc_error(&id, -32601, format!("Method not found: {other}")),
    };

    if state.sse.load(Ordering::SeqCst) {
        let progress = json!({
            "jsonrpc": "2.0",
            "method": "notifications/progress",
            "params": {"progress": 1}
        });
        let body = format!(
            "event: message\ndata: {progress}\n\nevent: message\ndata: {message}\n\n"
        );
        return ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response();
    }
    Json(message).into_response()
}

async fn spawn_server() -> (SocketAddr, Arc<FakeState>) {
    let state = Arc::new(FakeState::default());
    let app = Router::new()
        .route("/mcp", post(handle_rpc))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn client_for(addr: SocketAddr, max_payload_bytes: usize) -> McpClient {
    let mut cfg = McpConfig::default();
    cfg.server_url = format!("http://{addr}/mcp");
    cfg.request_timeout_secs = 5;
    cfg.max_payload_bytes = max_payload_bytes;
    cfg.backoff.base_ms = 10;
    cfg.backoff.cap_ms = 50;
    cfg.backoff.max_attempts = 3;
    McpClient::from_config(&cfg).unwrap()
}

#[tokio::test]
async fn test_handshake_and_session_header() {
    let (addr, state) = spawn_server().await;
    let client = client_for(addr, 1 << 20);
    assert!(!client.is_connected());

    client.call_tool("echo", json!({"host": "A"})).await.unwrap();
    client.call_tool("echo", json!({"host": "B"})).await.unwrap();

    assert_eq!(state.initialized.load(Ordering::SeqCst), 1);
    assert_eq!(state.notifications.load(Ordering::SeqCst), 1);
    let seen = state.seen_sessions.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|s| s.as_deref() == Some("sess-1")));
    assert!(client.is_connected());
    assert_eq!(client.server_name().await.as_deref(), Some("fake-telemetry"));
}

#[tokio::test]
async fn test_list_tools_follows_pagination() {
    let (addr, _state) = spawn_server().await;
    let client = client_for(addr, 1 << 20);

    let tools = client.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["query_metric", "loki_query", "list_alerts"]);
    assert_eq!(tools[0].description.as_deref(), Some("query_metric tool"));
}

#[tokio::test]
async fn test_call_tool_parses_json_text_payload() {
    let (addr, _state) = spawn_server().await;
    let client = client_for(addr, 1 << 20);

    let payload = client.call_tool("echo", json!({"host": "A", "window": "5m"})).await.unwrap();
    assert_eq!(payload, json!({"host": "A", "window": "5m"}));
}

#[tokio::test]
async fn test_sse_response_is_matched_by_id() {
    let (addr, state) = spawn_server().await;
    state.sse.store(true, Ordering::SeqCst);
    let client = client_for(addr, 1 << 20);

    let payload = client.call_tool("echo", json!({"cpu": 42})).await.unwrap();
    assert_eq!(payload, json!({"cpu": 42}));
    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 3);
}

#[tokio::test]
async fn test_expired_session_reconnects() {
    let (addr, state) = spawn_server().await;
    let client = client_for(addr, 1 << 20);

    client.call_tool("echo", json!({})).await.unwrap();
    state.expire_next.store(true, Ordering::SeqCst);
    let payload = client.call_tool("echo", json!({"again": true})).await.unwrap();

    assert_eq!(payload, json!({"again": true}));
    assert_eq!(state.initialized.load(Ordering::SeqCst), 2);
    let seen = state.seen_sessions.lock().unwrap().clone();
    assert_eq!(seen.last().cloned().flatten().as_deref(), Some("sess-2"));
}

#[tokio::test]
async fn test_retries_on_service_unavailable() {
    let (addr, state) = spawn_server().await;
    let client = client_for(addr, 1 << 20);

    state.unavailable.store(2, Ordering::SeqCst);
    let payload = client.call_tool("echo", json!({"ok": 1})).await.unwrap();
    assert_eq!(payload, json!({"ok": 1}));

    state.unavailable.store(5, Ordering::SeqCst);
    let err = client.call_tool("echo", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Http { status: 503, .. }));
}

#[tokio::test]
async fn test_tool_error_result() {
    let (addr, _state) = spawn_server().await;
    let client = client_for(addr, 1 << 20);

    let err = client.call_tool("fails", json!({})).await.unwrap_err();
    match err {
        McpError::ToolFailed { tool, message } => {
            assert_eq!(tool, "fails");
            assert!(message.contains("unreachable"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = client.call_tool("missing", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Rpc { code: -32602, .. }));
}

#[tokio::test]
async fn test_payload_limit() {
    let (addr, _state) = spawn_server().await;
    let client = client_for(addr, 1024);

    let err = client.call_tool("big", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::PayloadTooLarge { limit: 1024, .. }));

    let err = client
        .call_tool("echo", json!({"blob": "y".repeat(4096)}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::PayloadTooLarge { .. }));
}

#[tokio::test]
async fn test_payload_limit_applies_to_chunked_stream() {
    let (addr, _state) = spawn_server().await;
    let client = client_for(addr, 16 * 1024);

    let started = std::time::Instant::now();
    let err = client.call_tool("flood", json!({})).await.unwrap_err();
    match err {
        McpError::PayloadTooLarge { size, limit } => {
            assert_eq!(limit, 16 * 1024);
            assert!(size > limit);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn test_client_as_tool_server() {
    let (addr, _state) = spawn_server().await;
    let server: Arc<dyn ToolServer> = Arc::new(client_for(addr, 1 << 20));

    assert_eq!(server.list_tools().await.unwrap().len(), 3);
    assert!(server.is_connected());
    assert_eq!(server.server_name().await.as_deref(), Some("fake-telemetry"));
}
