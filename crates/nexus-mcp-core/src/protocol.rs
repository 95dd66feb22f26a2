// crates/nexus-mcp-core/src/protocol.rs
// ============================================================================
// Module: MCP Protocol Model
// Description: JSON-RPC 2.0 envelope and the MCP payloads the bridge speaks.
// Purpose: Share one message model between the gateway and the transport.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`JsonRpcMessage`] is a single envelope for requests, notifications, and
//! responses; [`JsonRpcMessage::kind`] classifies it. Bridge errors carry a
//! stable numeric code plus `data.kind` (see [`BridgeErrorKind`]); failed
//! operations additionally carry the runtime detail in `data.detail`.
//!
//! Tool results follow MCP `CallToolResult`: object outputs become
//! `structuredContent`, other outputs a single text content item.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::registry::ToolCatalogEntry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";
/// MCP protocol version returned from `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// `initialize` request method.
pub const METHOD_INITIALIZE: &str = "initialize";
/// `notifications/initialized` notification method.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// `ping` request method.
pub const METHOD_PING: &str = "ping";
/// `tools/list` request method.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// `tools/call` request method.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// `notifications/cancelled` notification method.
pub const METHOD_CANCELLED: &str = "notifications/cancelled";
/// `notifications/progress` notification method.
pub const METHOD_PROGRESS: &str = "notifications/progress";

/// Service hosting the bridge's own operations.
pub const MCP_SERVICE_NAME: &str = "MCP";
/// Operation returning the visible tool catalog.
pub const OPERATION_LIST_TOOLS: &str = "ListTools";
/// Long-lived operation backing one workflow-side session.
pub const OPERATION_SESSION: &str = "Session";

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// JSON-RPC 2.0 message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    /// Protocol version; `"2.0"` for valid messages.
    pub jsonrpc: String,
    /// Request identifier (absent for notifications; `null` is preserved).
    #[serde(default, deserialize_with = "deserialize_present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name for requests and notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Successful result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// Classification of a [`JsonRpcMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Method call expecting a response.
    Request,
    /// Method call without an id.
    Notification,
    /// Result or error for an earlier request.
    Response,
    /// Not a valid JSON-RPC 2.0 message.
    Invalid,
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Structured error data (`kind`, optional `detail`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcMessage {
    /// Builds a request.
    #[must_use]
    pub fn request(id: Value, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Builds a notification.
    #[must_use]
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Builds a success response.
    #[must_use]
    pub fn response(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response. `id` is `null` when unknown.
    #[must_use]
    pub fn error_response(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.unwrap_or(Value::Null)),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// Classifies the message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        if self.jsonrpc != JSONRPC_VERSION {
            return MessageKind::Invalid;
        }
        match (&self.method, &self.id) {
            (Some(_), Some(id)) if is_valid_id(id) => MessageKind::Request,
            (Some(_), None) => MessageKind::Notification,
            (None, Some(_)) if self.result.is_some() != self.error.is_some() => {
                MessageKind::Response
            }
            _ => MessageKind::Invalid,
        }
    }

    /// Returns the method name, if any.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Returns the `_meta.progressToken` from the params, if present.
    #[must_use]
    pub fn progress_token(&self) -> Option<Value> {
        self.params
            .as_ref()
            .and_then(|params| params.get("_meta"))
            .and_then(|meta| meta.get("progressToken"))
            .filter(|token| token.is_string() || token.is_number())
            .cloned()
    }
}

/// Returns a stable map key for a request id (`1` and `"1"` differ).
#[must_use]
pub fn id_key(id: &Value) -> String {
    id.to_string()
}

/// Deserializes a present field as `Some`, keeping explicit `null`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Returns true for string or number ids.
fn is_valid_id(id: &Value) -> bool {
    id.is_string() || id.is_number()
}

// ============================================================================
// SECTION: Bridge Errors
// ============================================================================

/// Error classes surfaced to tool clients.
///
/// # Invariants
/// - Codes and labels are stable wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeErrorKind {
    /// Malformed JSON-RPC envelope.
    InvalidRequest,
    /// Unknown method.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// No visible operation for the tool name.
    ToolNotFound,
    /// Runtime or validation refused to start the operation.
    OperationStartRejected,
    /// Runtime endpoint unreachable.
    EndpointUnavailable,
    /// Operation failed.
    OperationFailed,
    /// Operation canceled.
    OperationCanceled,
    /// Payload could not be serialized or parsed.
    Serialization,
}

impl BridgeErrorKind {
    /// Returns the JSON-RPC error code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::ToolNotFound => -32004,
            Self::OperationStartRejected => -32012,
            Self::EndpointUnavailable => -32013,
            Self::OperationFailed => -32020,
            Self::OperationCanceled => -32800,
            Self::Serialization => -32060,
        }
    }

    /// Returns the `data.kind` label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::MethodNotFound => "method_not_found",
            Self::InvalidParams => "invalid_params",
            Self::ToolNotFound => "tool_not_found",
            Self::OperationStartRejected => "operation_start_rejected",
            Self::EndpointUnavailable => "endpoint_unavailable",
            Self::OperationFailed => "operation_failed",
            Self::OperationCanceled => "operation_canceled",
            Self::Serialization => "serialization",
        }
    }

    /// Maps a wire code back to its kind.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            -32600 => Some(Self::InvalidRequest),
            -32601 => Some(Self::MethodNotFound),
            -32602 => Some(Self::InvalidParams),
            -32004 => Some(Self::ToolNotFound),
            -32012 => Some(Self::OperationStartRejected),
            -32013 => Some(Self::EndpointUnavailable),
            -32020 => Some(Self::OperationFailed),
            -32800 => Some(Self::OperationCanceled),
            -32060 => Some(Self::Serialization),
            _ => None,
        }
    }
}

impl JsonRpcError {
    /// Builds an error of `kind` with `data.kind` populated.
    #[must_use]
    pub fn bridge(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            message: message.into(),
            data: Some(json!({ "kind": kind.label() })),
        }
    }

    /// Adds `data.detail`.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        let mut data = match self.data.take() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        data.insert("detail".to_string(), detail);
        self.data = Some(Value::Object(data));
        self
    }

    /// Returns the bridge error kind for this code, if known.
    #[must_use]
    pub const fn bridge_kind(&self) -> Option<BridgeErrorKind> {
        BridgeErrorKind::from_code(self.code)
    }

    /// Returns `data.detail`, if present.
    #[must_use]
    pub fn detail(&self) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get("detail"))
    }
}

// ============================================================================
// SECTION: MCP Payloads
// ============================================================================

/// `tools/call` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Tool name (`service/operation`, optionally client-prefixed).
    pub name: String,
    /// Tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// `notifications/cancelled` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledParams {
    /// Identifier of the request to cancel.
    #[serde(rename = "requestId")]
    pub request_id: Value,
    /// Optional cancellation reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `tools/list` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Visible tools.
    pub tools: Vec<ToolCatalogEntry>,
}

/// Server identity returned from `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

/// Tool result content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// Text payload.
        text: String,
    },
}

/// MCP `CallToolResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Unstructured content items.
    #[serde(default)]
    pub content: Vec<ToolContent>,
    /// Structured output for object results.
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Whether the tool reported an error.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Wraps an operation output.
    ///
    /// Objects become `structuredContent`; strings become verbatim text;
    /// other values become JSON-encoded text.
    #[must_use]
    pub fn from_output(output: Value) -> Self {
        match output {
            Value::Object(_) => Self {
                content: Vec::new(),
                structured_content: Some(output),
                is_error: false,
            },
            Value::String(text) => Self::text(text),
            other => Self::text(other.to_string()),
        }
    }

    /// Builds a single-text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: text.into(),
            }],
            structured_content: None,
            is_error: false,
        }
    }

    /// Recovers the operation output.
    ///
    /// Structured content wins; otherwise the first text item is parsed as
    /// JSON, falling back to the raw string.
    #[must_use]
    pub fn into_output(self) -> Value {
        if let Some(structured) = self.structured_content {
            return structured;
        }
        match self.content.into_iter().next() {
            Some(ToolContent::Text {
                text,
            }) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            None => Value::Null,
        }
    }
}

/// Builds the `initialize` result payload.
#[must_use]
pub fn initialize_result(server: &ServerInfo) -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": server,
    })
}

/// Builds a `notifications/progress` message.
#[must_use]
pub fn progress_notification(progress_token: Value, progress: u64) -> JsonRpcMessage {
    JsonRpcMessage::notification(
        METHOD_PROGRESS,
        Some(json!({ "progressToken": progress_token, "progress": progress })),
    )
}

#[cfg(test)]
mod tests;
