//! End-to-end tests driving the real client against an in-process server
//! over actual HTTP: stream handshake, correlation, timeouts, and teardown.

use async_trait::async_trait;
use mcpterm::commands::render_result;
use mcpterm::mcp::connection::{Connection, ConnectionState};
use mcpterm::mcp::error::{CallError, ConnectError};
use mcpterm::mcp::protocol::{
    ClientInfo, ServerInfo, ToolCallResult, ToolDef, INVALID_PARAMS,
};
use mcpterm::server;
use mcpterm::server::registry::{ToolError, ToolHandler, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn identity() -> ServerInfo {
    ServerInfo {
        name: "mcpterm-server".to_string(),
        version: "test".to_string(),
    }
}

fn client_identity() -> ClientInfo {
    ClientInfo {
        name: "mcpterm-e2e".to_string(),
        version: "test".to_string(),
    }
}

async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

async fn start_builtin_server() -> String {
    serve(server::app(identity(), None).expect("router")).await
}

async fn connect(base_url: &str) -> Arc<Connection> {
    let connection = Arc::new(
        Connection::new(base_url, client_identity(), Duration::from_secs(5)).expect("controller"),
    );
    connection.connect().await.expect("connect");
    assert_eq!(connection.state(), ConnectionState::Connected);
    connection
}

/// A tool that stalls until told to finish, for timeout and teardown tests.
struct SlowTool {
    delay: Duration,
}

#[async_trait]
impl ToolHandler for SlowTool {
    async fn call(&self, _arguments: Value) -> Result<ToolCallResult, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(ToolCallResult::text(&json!({ "done": true })))
    }
}

fn registry_with_slow_tool(delay: Duration) -> ToolRegistry {
    let mut registry = mcpterm::server::tools::builtin_registry().expect("registry");
    registry
        .register(
            ToolDef {
                name: "slow".to_string(),
                description: Some("Stalls before answering".to_string()),
                input_schema: json!({ "type": "object" }),
            },
            Arc::new(SlowTool { delay }),
        )
        .expect("register slow tool");
    registry
}

#[tokio::test]
async fn add_round_trip() {
    let base = start_builtin_server().await;
    let connection = connect(&base).await;

    let result = connection
        .invoke("add", json!({ "a": 2, "b": 3 }), Duration::from_secs(5))
        .await
        .expect("add result");
    assert_eq!(render_result("add", &result), "5");

    connection.close().await;
}

#[tokio::test]
async fn echo_round_trip() {
    let base = start_builtin_server().await;
    let connection = connect(&base).await;

    let result = connection
        .invoke("echo", json!({ "message": "hello" }), Duration::from_secs(5))
        .await
        .expect("echo result");
    assert_eq!(render_result("echo", &result), "hello");
}

#[tokio::test]
async fn handshake_reports_server_identity_and_tools() {
    let base = start_builtin_server().await;
    let connection = connect(&base).await;

    let info = connection.server_info().expect("server info");
    assert_eq!(info.name, "mcpterm-server");

    let listing = connection.list_tools().await.expect("tools/list");
    let names: Vec<&str> = listing.tools.iter().map(|def| def.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "add"]);
}

#[tokio::test]
async fn invoke_before_connect_fails_without_reaching_the_server() {
    let base = start_builtin_server().await;
    let connection = Arc::new(
        Connection::new(&base, client_identity(), Duration::from_secs(5)).expect("controller"),
    );
    let err = connection
        .invoke("echo", json!({ "message": "hi" }), Duration::from_secs(5))
        .await
        .expect_err("expected NotConnected");
    assert_eq!(err, CallError::NotConnected);
}

#[tokio::test]
async fn validation_failures_come_back_as_rpc_errors() {
    let base = start_builtin_server().await;
    let connection = connect(&base).await;

    let err = connection
        .invoke("add", json!({ "a": "two", "b": 3 }), Duration::from_secs(5))
        .await
        .expect_err("expected Rpc error");
    match err {
        CallError::Rpc { code, message } => {
            assert_eq!(code, INVALID_PARAMS);
            assert!(message.contains("add"));
        }
        other => panic!("expected Rpc, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tools_come_back_as_rpc_errors() {
    let base = start_builtin_server().await;
    let connection = connect(&base).await;

    let err = connection
        .invoke("frobnicate", json!({}), Duration::from_secs(5))
        .await
        .expect_err("expected Rpc error");
    assert!(matches!(err, CallError::Rpc { code, .. } if code == INVALID_PARAMS));
}

#[tokio::test]
async fn post_without_a_bound_stream_is_refused() {
    let base = start_builtin_server().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/mcp/messages"))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json().await.expect("error body");
    assert_eq!(body["error"]["code"], json!(-32003));
}

#[tokio::test]
async fn timeouts_fire_no_earlier_than_the_deadline() {
    let registry = registry_with_slow_tool(Duration::from_secs(30));
    let base = serve(
        server::app_with_registry(registry, identity(), None).expect("router"),
    )
    .await;
    let connection = connect(&base).await;

    let deadline = Duration::from_millis(200);
    let started = Instant::now();
    let err = connection
        .invoke("slow", json!({}), deadline)
        .await
        .expect_err("expected Timeout");
    assert!(started.elapsed() >= deadline);
    assert_eq!(err, CallError::Timeout(deadline));

    // The pending slot is gone; the connection keeps working.
    let result = connection
        .invoke("echo", json!({ "message": "after" }), Duration::from_secs(5))
        .await
        .expect("echo after timeout");
    assert_eq!(render_result("echo", &result), "after");
}

#[tokio::test]
async fn connect_fails_when_the_endpoint_event_never_arrives() {
    use axum::response::sse::{Event, Sse};
    use std::convert::Infallible;

    // A server that accepts the stream but never announces its message
    // endpoint must not strand the controller in Connecting.
    let router = axum::Router::new().route(
        "/mcp/stream",
        axum::routing::get(|| async {
            Sse::new(futures_util::stream::pending::<Result<Event, Infallible>>())
        }),
    );
    let base = serve(router).await;

    let connection = Connection::new(&base, client_identity(), Duration::from_secs(5))
        .expect("controller")
        .with_handshake_timeout(Duration::from_millis(200));
    let started = Instant::now();
    let err = connection
        .connect()
        .await
        .expect_err("expected handshake failure");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(err, ConnectError::MissingEndpoint));
    assert!(matches!(connection.state(), ConnectionState::Failed(_)));
}

#[tokio::test]
async fn connect_while_connected_is_rejected() {
    let base = start_builtin_server().await;
    let connection = connect(&base).await;

    let err = connection
        .connect()
        .await
        .expect_err("expected AlreadyConnected");
    assert!(matches!(err, ConnectError::AlreadyConnected));
    assert_eq!(connection.state(), ConnectionState::Connected);

    // The live session was left untouched.
    let result = connection
        .invoke("echo", json!({ "message": "still up" }), Duration::from_secs(5))
        .await
        .expect("echo after rejected connect");
    assert_eq!(render_result("echo", &result), "still up");
}

#[tokio::test]
async fn reconnect_after_close_establishes_a_fresh_session() {
    let base = start_builtin_server().await;
    let connection = connect(&base).await;
    connection.close().await;

    connection.connect().await.expect("reconnect");
    let result = connection
        .invoke("add", json!({ "a": 1, "b": 2 }), Duration::from_secs(5))
        .await
        .expect("add after reconnect");
    assert_eq!(render_result("add", &result), "3");
}

#[tokio::test]
async fn close_rejects_in_flight_invocations() {
    let registry = registry_with_slow_tool(Duration::from_secs(30));
    let base = serve(
        server::app_with_registry(registry, identity(), None).expect("router"),
    )
    .await;
    let connection = connect(&base).await;

    let in_flight = {
        let connection = connection.clone();
        tokio::spawn(async move {
            connection
                .invoke("slow", json!({}), Duration::from_secs(30))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    connection.close().await;

    let err = in_flight
        .await
        .expect("task")
        .expect_err("expected ConnectionClosed");
    assert_eq!(err, CallError::ConnectionClosed);
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    // Idempotent.
    connection.close().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn a_second_stream_supersedes_the_first() {
    let base = start_builtin_server().await;
    let first = connect(&base).await;
    let second = connect(&base).await;

    // The server ends the first stream; its controller drops back to
    // Disconnected once the reader sees the close.
    let waited = Instant::now();
    while first.state() == ConnectionState::Connected
        && waited.elapsed() < Duration::from_secs(5)
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(first.state(), ConnectionState::Disconnected);

    let result = second
        .invoke("add", json!({ "a": 1, "b": 1 }), Duration::from_secs(5))
        .await
        .expect("second client still works");
    assert_eq!(render_result("add", &result), "2");
}
