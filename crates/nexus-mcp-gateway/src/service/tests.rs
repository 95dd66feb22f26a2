// crates/nexus-mcp-gateway/src/service/tests.rs
// ============================================================================
// Module: MCP Service Handler Tests
// Description: Unit tests for the ListTools and Session operations.
// Purpose: Validate catalog exposure and session pump lifetime.
// Dependencies: nexus-mcp-gateway, nexus-mcp-core, tokio
// ============================================================================

//! ## Overview
//! Runs the MCP service operations on the in-memory runtime.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use nexus_mcp_core::EndpointRef;
use nexus_mcp_core::HandlerGroup;
use nexus_mcp_core::InMemoryOperationRuntime;
use nexus_mcp_core::OperationRegistry;
use nexus_mcp_core::OperationRuntime;
use nexus_mcp_core::OperationSpec;
use nexus_mcp_core::OperationStatus;
use nexus_mcp_core::OperationToken;
use nexus_mcp_core::StartRequest;
use nexus_mcp_core::protocol::MCP_SERVICE_NAME;
use nexus_mcp_core::protocol::OPERATION_LIST_TOOLS;
use nexus_mcp_core::protocol::OPERATION_SESSION;
use serde_json::Value;
use serde_json::json;

use super::McpServiceHandler;
use super::mcp_handler_group;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

fn registry() -> Arc<OperationRegistry> {
    let mut registry = OperationRegistry::new();
    registry
        .register(
            HandlerGroup::new("calculator-handler", "calculator")
                .operation(OperationSpec::new::<Value, i64>("add")),
        )
        .unwrap();
    registry.register(mcp_handler_group()).unwrap();
    Arc::new(registry)
}

fn runtime(handler: &McpServiceHandler) -> InMemoryOperationRuntime {
    let mut runtime = InMemoryOperationRuntime::new();
    handler.install(&mut runtime);
    runtime
}

fn start(operation: &str, input: Value) -> StartRequest {
    StartRequest {
        endpoint: EndpointRef::new("endpoint", "queue"),
        service: MCP_SERVICE_NAME.to_string(),
        operation: operation.to_string(),
        input,
        request_id: None,
    }
}

async fn settle(runtime: &InMemoryOperationRuntime, token: &OperationToken) -> OperationStatus {
    for _ in 0..100 {
        let status = runtime.poll(token).await.unwrap();
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    runtime.poll(token).await.unwrap()
}

async fn wait_for_sessions(handler: &McpServiceHandler, expected: usize) {
    for _ in 0..100 {
        if handler.active_sessions().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(handler.active_sessions().len(), expected);
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn mcp_operations_are_hidden() {
    let registry = registry();
    let names: Vec<String> =
        registry.snapshot_catalog().into_iter().map(|entry| entry.name.to_string()).collect();
    assert_eq!(names, vec!["calculator/add".to_string()]);
    assert!(registry.resolve("MCP/ListTools").is_err());
}

#[tokio::test]
async fn list_tools_operation_returns_catalog() {
    let handler = McpServiceHandler::new(registry());
    let runtime = runtime(&handler);
    let token = runtime.start(start(OPERATION_LIST_TOOLS, Value::Null)).await.unwrap();
    let OperationStatus::Completed(output) = settle(&runtime, &token).await else {
        panic!("list tools did not complete");
    };
    assert_eq!(output.as_array().unwrap().len(), 1);
    assert_eq!(output[0]["name"], "calculator/add");
}

#[tokio::test]
async fn session_stays_pending_until_canceled() {
    let handler = McpServiceHandler::new(registry());
    let runtime = runtime(&handler);
    let token = runtime.start(start(OPERATION_SESSION, json!({ "session_id": "s-1" }))).await.unwrap();
    wait_for_sessions(&handler, 1).await;
    assert_eq!(runtime.poll(&token).await.unwrap(), OperationStatus::Pending);
    runtime.cancel(&token).await.unwrap();
    wait_for_sessions(&handler, 0).await;
    assert_eq!(runtime.poll(&token).await.unwrap(), OperationStatus::Canceled);
}

#[tokio::test]
async fn ending_a_session_completes_its_pump() {
    let handler = McpServiceHandler::new(registry());
    let runtime = runtime(&handler);
    let token = runtime.start(start(OPERATION_SESSION, json!({ "session_id": "s-2" }))).await.unwrap();
    wait_for_sessions(&handler, 1).await;
    assert!(handler.end_session("s-2"));
    assert!(!handler.end_session("missing"));
    assert_eq!(settle(&runtime, &token).await, OperationStatus::Completed(json!({ "session_id": "s-2" })));
    wait_for_sessions(&handler, 0).await;
}

#[tokio::test]
async fn session_requires_session_id() {
    let handler = McpServiceHandler::new(registry());
    let runtime = runtime(&handler);
    let token = runtime.start(start(OPERATION_SESSION, json!({}))).await.unwrap();
    let OperationStatus::Failed(detail) = settle(&runtime, &token).await else {
        panic!("session without id should fail");
    };
    assert_eq!(detail.failure_type.as_deref(), Some("InvalidInput"));
}
