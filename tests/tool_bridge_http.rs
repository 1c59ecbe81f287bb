use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use switchboard::calls::{CallEventStateMachine, InMemoryCallRecords, InMemoryCallStore};
use switchboard::dispatch::{Ack, CallControl, ProviderError};
use switchboard::server::{router, AppState, WebhookSettings};
use switchboard::tools::{
    ExecutionContext, ExecutorOutput, Result, ToolBridge, ToolExecutor, ToolInvocation,
};
use tower::ServiceExt; // for oneshot

struct NoCalls;

#[async_trait]
impl CallControl for NoCalls {
    async fn answer(&self, _id: &str) -> std::result::Result<Ack, ProviderError> {
        Ok(Ack { status: 200 })
    }

    async fn transfer(&self, _id: &str, _to: &str) -> std::result::Result<Ack, ProviderError> {
        Ok(Ack { status: 200 })
    }
}

/// Looks customers up in a fixed table.
#[derive(Default)]
struct CustomerDirectory {
    runs: AtomicUsize,
}

#[async_trait]
impl ToolExecutor for CustomerDirectory {
    async fn execute(
        &self,
        invocation: &ToolInvocation,
        context: &ExecutionContext,
    ) -> Result<ExecutorOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        assert!(!context.correlation_id.is_empty());
        let query = invocation.arguments.get("q").and_then(Value::as_str);
        Ok(match (invocation.tool_name.as_str(), query) {
            ("search_customer", Some("acme")) => ExecutorOutput {
                payload: json!({"id": 17, "name": "Acme Corp"}),
                is_error: false,
            },
            _ => ExecutorOutput {
                payload: json!("no match"),
                is_error: true,
            },
        })
    }
}

fn app() -> (Router, Arc<CustomerDirectory>) {
    let directory = Arc::new(CustomerDirectory::default());
    let machine = CallEventStateMachine::new(
        Arc::new(InMemoryCallStore::new()),
        Arc::new(NoCalls),
        Arc::new(InMemoryCallRecords::new()),
        "sip.retellai.com",
    );
    let state = AppState::new(
        machine,
        ToolBridge::new(directory.clone()),
        WebhookSettings::default(),
    );
    (router(state), directory)
}

async fn post(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_definitions_to_tool_blocks() {
    let (app, _) = app();
    let (status, body) = post(
        &app,
        "/tools/b/definitions",
        json!([{
            "type": "function",
            "name": "search_customer",
            "description": "Search",
            "parameters": {"type": "object", "properties": {"q": {"type": "string"}}}
        }, {"foo": "bar"}]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {
                "name": "search_customer",
                "description": "Search",
                "input_schema": {"type": "object", "properties": {"q": {"type": "string"}}}
            },
            {"name": "unknown", "description": "", "input_schema": {"type": "object", "properties": {}}}
        ])
    );
}

#[tokio::test]
async fn test_definitions_wrapper_to_function_calls() {
    let (app, _) = app();
    let (status, body) = post(
        &app,
        "/tools/openai/definitions",
        json!({"tools": [{"name": "end_call", "description": "Hang up", "input_schema": {"type": "object", "properties": {}}}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["type"], "function");
    assert_eq!(body[0]["parameters"], json!({"type": "object", "properties": {}}));
}

#[tokio::test]
async fn test_tool_block_call_round_trip() {
    let (app, directory) = app();
    let message = json!({
        "role": "assistant",
        "content": [
            {"type": "text", "text": "Looking that up."},
            {"type": "tool_use", "id": "toolu_01", "name": "search_customer", "input": {"q": "acme"}}
        ]
    });

    let (status, body) = post(
        &app,
        "/tools/b/call",
        json!({"call_id": "v3:call-1", "message": message}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["results"],
        json!([{
            "type": "tool_result",
            "tool_use_id": "toolu_01",
            "content": "{\"id\":17,\"name\":\"Acme Corp\"}",
            "is_error": false
        }])
    );

    // Redelivery replays without running the tool again.
    let (_, again) = post(
        &app,
        "/tools/b/call",
        json!({"call_id": "v3:call-1", "message": message}),
    )
    .await;
    assert_eq!(again, body);
    assert_eq!(directory.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_custom_llm_call() {
    let (app, _) = app();
    let (status, body) = post(
        &app,
        "/tools/c/call",
        json!({"message": {
            "response_type": "tool_call_invocation",
            "tool_call_id": "tc_1",
            "name": "search_customer",
            "arguments": "{\"q\":\"globex\"}"
        }}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["results"],
        json!([{"response_type": "tool_call_result", "tool_call_id": "tc_1", "content": "no match"}])
    );
}

#[tokio::test]
async fn test_unknown_format_is_not_found() {
    let (app, _) = app();
    let (status, body) = post(&app, "/tools/xml/call", json!({"message": {}})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "unknown_format");
}

#[tokio::test]
async fn test_calls_without_call_id_always_execute() {
    let (app, directory) = app();
    let message = json!({"type": "tool_use", "id": "toolu_01", "name": "search_customer", "input": {"q": "acme"}});

    for _ in 0..2 {
        let (status, body) = post(&app, "/tools/b/call", json!({"message": message})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["is_error"], false);
    }
    assert_eq!(directory.runs.load(Ordering::SeqCst), 2);
}
