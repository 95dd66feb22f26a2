// crates/nexus-mcp-core/src/protocol/tests.rs
// ============================================================================
// Module: MCP Protocol Model Tests
// Description: Unit tests for envelope classification and MCP payloads.
// Purpose: Validate wire shapes for errors, tool results, and progress.
// Dependencies: nexus-mcp-core, serde_json
// ============================================================================

//! ## Overview
//! Validates message classification, error code tables, and tool result
//! encoding.

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

use serde_json::Value;
use serde_json::json;

use super::BridgeErrorKind;
use super::CallToolResult;
use super::JsonRpcError;
use super::JsonRpcMessage;
use super::MCP_PROTOCOL_VERSION;
use super::MessageKind;
use super::ServerInfo;
use super::id_key;
use super::initialize_result;
use super::progress_notification;

// ============================================================================
// SECTION: Envelope Tests
// ============================================================================

fn parse(raw: Value) -> JsonRpcMessage {
    serde_json::from_value(raw).unwrap()
}

#[test]
fn classifies_messages() {
    let request = parse(json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }));
    assert_eq!(request.kind(), MessageKind::Request);
    let notification = parse(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }));
    assert_eq!(notification.kind(), MessageKind::Notification);
    let response = parse(json!({ "jsonrpc": "2.0", "id": "a", "result": {} }));
    assert_eq!(response.kind(), MessageKind::Response);
    let null_id_error = parse(json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": { "code": -32600, "message": "bad" }
    }));
    assert_eq!(null_id_error.kind(), MessageKind::Response);
}

#[test]
fn rejects_malformed_envelopes() {
    let wrong_version = parse(json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }));
    assert_eq!(wrong_version.kind(), MessageKind::Invalid);
    let object_id = parse(json!({ "jsonrpc": "2.0", "id": {}, "method": "ping" }));
    assert_eq!(object_id.kind(), MessageKind::Invalid);
    let null_id_request = parse(json!({ "jsonrpc": "2.0", "id": null, "method": "ping" }));
    assert_eq!(null_id_request.kind(), MessageKind::Invalid);
    let empty = parse(json!({ "jsonrpc": "2.0" }));
    assert_eq!(empty.kind(), MessageKind::Invalid);
}

#[test]
fn error_response_serializes_null_id() {
    let message =
        JsonRpcMessage::error_response(None, JsonRpcError::bridge(BridgeErrorKind::InvalidRequest, "bad"));
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["id"], Value::Null);
    assert_eq!(value["error"]["code"], -32600);
    assert_eq!(value["error"]["data"]["kind"], "invalid_request");
    assert!(value.get("result").is_none());
}

#[test]
fn progress_token_reads_meta() {
    let request = JsonRpcMessage::request(
        json!(7),
        "tools/call",
        Some(json!({ "name": "svc/op", "_meta": { "progressToken": "tok" } })),
    );
    assert_eq!(request.progress_token(), Some(json!("tok")));
    let without = JsonRpcMessage::request(json!(7), "tools/call", Some(json!({ "name": "svc/op" })));
    assert_eq!(without.progress_token(), None);
}

#[test]
fn id_keys_distinguish_types() {
    assert_ne!(id_key(&json!(1)), id_key(&json!("1")));
}

// ============================================================================
// SECTION: Error Tests
// ============================================================================

#[test]
fn error_codes_round_trip_labels() {
    let kinds = [
        (BridgeErrorKind::InvalidRequest, -32600),
        (BridgeErrorKind::MethodNotFound, -32601),
        (BridgeErrorKind::InvalidParams, -32602),
        (BridgeErrorKind::ToolNotFound, -32004),
        (BridgeErrorKind::OperationStartRejected, -32012),
        (BridgeErrorKind::EndpointUnavailable, -32013),
        (BridgeErrorKind::OperationFailed, -32020),
        (BridgeErrorKind::OperationCanceled, -32800),
        (BridgeErrorKind::Serialization, -32060),
    ];
    for (kind, code) in kinds {
        assert_eq!(kind.code(), code);
        assert_eq!(BridgeErrorKind::from_code(code), Some(kind));
    }
    assert_eq!(BridgeErrorKind::from_code(-1), None);
}

#[test]
fn detail_is_added_next_to_kind() {
    let error = JsonRpcError::bridge(BridgeErrorKind::OperationFailed, "operation failed")
        .with_detail(json!({ "message": "division by zero" }));
    assert_eq!(error.bridge_kind(), Some(BridgeErrorKind::OperationFailed));
    assert_eq!(error.detail(), Some(&json!({ "message": "division by zero" })));
    assert_eq!(error.data.as_ref().unwrap()["kind"], "operation_failed");
}

// ============================================================================
// SECTION: Payload Tests
// ============================================================================

#[test]
fn object_output_becomes_structured_content() {
    let result = CallToolResult::from_output(json!({ "sum": 3 }));
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value, json!({ "content": [], "structuredContent": { "sum": 3 }, "isError": false }));
    assert_eq!(result.into_output(), json!({ "sum": 3 }));
}

#[test]
fn scalar_outputs_become_text() {
    let number = serde_json::to_value(CallToolResult::from_output(json!(3))).unwrap();
    assert_eq!(number, json!({ "content": [{ "type": "text", "text": "3" }], "isError": false }));
    let text = CallToolResult::from_output(json!("hello"));
    assert_eq!(serde_json::to_value(&text).unwrap()["content"][0]["text"], "hello");
    assert_eq!(text.into_output(), json!("hello"));
    assert_eq!(CallToolResult::from_output(json!([1, 2])).into_output(), json!([1, 2]));
}

#[test]
fn initialize_result_reports_protocol_and_server() {
    let server = ServerInfo {
        name: "nexus-mcp-gateway".to_string(),
        version: "0.1.0".to_string(),
    };
    let value = initialize_result(&server);
    assert_eq!(value["protocolVersion"], MCP_PROTOCOL_VERSION);
    assert!(value["capabilities"]["tools"].is_object());
    assert_eq!(value["serverInfo"]["name"], "nexus-mcp-gateway");
}

#[test]
fn progress_notification_has_no_id() {
    let message = progress_notification(json!("tok"), 2);
    assert_eq!(message.kind(), MessageKind::Notification);
    assert_eq!(message.params.unwrap(), json!({ "progressToken": "tok", "progress": 2 }));
}
