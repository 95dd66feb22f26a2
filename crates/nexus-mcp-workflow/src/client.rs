// crates/nexus-mcp-workflow/src/client.rs
// ============================================================================
// Module: Tool Client
// Description: Minimal MCP client over any duplex message channel.
// Purpose: Give workflow code initialize, tools/list and tools/call.
// Dependencies: nexus-mcp-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`ToolClient`] issues one request at a time and waits for the response
//! with the matching id. Progress notifications and unrelated responses seen
//! while waiting are skipped. Tool failures surface as
//! [`ClientError::Rpc`] carrying the JSON-RPC error verbatim.

// ============================================================================
// SECTION: Imports
// ============================================================================

use nexus_mcp_core::BridgeErrorKind;
use nexus_mcp_core::CallToolResult;
use nexus_mcp_core::ChannelError;
use nexus_mcp_core::JsonRpcError;
use nexus_mcp_core::JsonRpcMessage;
use nexus_mcp_core::MessageKind;
use nexus_mcp_core::MessageSink;
use nexus_mcp_core::MessageSource;
use nexus_mcp_core::ToolCatalogEntry;
use nexus_mcp_core::protocol::ListToolsResult;
use nexus_mcp_core::protocol::MCP_PROTOCOL_VERSION;
use nexus_mcp_core::protocol::METHOD_INITIALIZE;
use nexus_mcp_core::protocol::METHOD_INITIALIZED;
use nexus_mcp_core::protocol::METHOD_PING;
use nexus_mcp_core::protocol::METHOD_TOOLS_CALL;
use nexus_mcp_core::protocol::METHOD_TOOLS_LIST;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Client name sent in `initialize`.
pub const CLIENT_NAME: &str = "nexus-mcp-workflow";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Tool client errors.
///
/// # Invariants
/// - Variants are stable for caller error mapping.
/// - [`ClientError::Rpc`] carries the server's error payload unchanged.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a JSON-RPC error.
    #[error("mcp error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),
    /// Channel failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The channel ended before the response arrived.
    #[error("channel closed before the response arrived")]
    Closed,
    /// The response payload did not decode.
    #[error("mcp response decode failed: {0}")]
    Decode(String),
}

impl ClientError {
    /// Returns the bridge error kind for RPC errors with a known code.
    #[must_use]
    pub const fn bridge_kind(&self) -> Option<BridgeErrorKind> {
        match self {
            Self::Rpc(error) => BridgeErrorKind::from_code(error.code),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// MCP client bound to one duplex channel.
pub struct ToolClient<S, K> {
    /// Inbound half.
    source: S,
    /// Outbound half.
    sink: K,
    /// Next request id.
    next_id: u64,
}

impl<S, K> ToolClient<S, K>
where
    S: MessageSource,
    K: MessageSink,
{
    /// Creates a client over `source` and `sink`.
    #[must_use]
    pub const fn new(source: S, sink: K) -> Self {
        Self {
            source,
            sink,
            next_id: 1,
        }
    }

    /// Performs the `initialize` handshake and returns the server's result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the request fails.
    pub async fn initialize(&mut self) -> Result<Value, ClientError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") },
        });
        let result = self.request(METHOD_INITIALIZE, Some(params)).await?;
        self.sink.send(JsonRpcMessage::notification(METHOD_INITIALIZED, None)).await?;
        Ok(result)
    }

    /// Calls `tools/list` and returns the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the request fails or the payload does not
    /// decode.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolCatalogEntry>, ClientError> {
        let result = self.request(METHOD_TOOLS_LIST, None).await?;
        let parsed: ListToolsResult = serde_json::from_value(result)
            .map_err(|err| ClientError::Decode(format!("invalid tools/list payload: {err}")))?;
        Ok(parsed.tools)
    }

    /// Calls `tools/call` for `name` with `arguments`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rpc`] when the tool fails, plus channel and
    /// decode errors.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult, ClientError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request(METHOD_TOOLS_CALL, Some(params)).await?;
        serde_json::from_value(result).map_err(|err| {
            ClientError::Decode(format!("invalid tools/call payload for {name}: {err}"))
        })
    }

    /// Sends `ping`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the request fails.
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.request(METHOD_PING, None).await.map(|_| ())
    }

    /// Closes the outbound half.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Channel`] when closing fails.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.sink.close().await?;
        Ok(())
    }

    /// Returns the channel halves.
    #[must_use]
    pub fn into_parts(self) -> (S, K) {
        (self.source, self.sink)
    }

    /// Sends one request and waits for its response.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let id = json!(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.sink.send(JsonRpcMessage::request(id.clone(), method, params)).await?;
        loop {
            let Some(message) = self.source.receive().await? else {
                return Err(ClientError::Closed);
            };
            if message.kind() != MessageKind::Response || message.id.as_ref() != Some(&id) {
                continue;
            }
            if let Some(error) = message.error {
                return Err(ClientError::Rpc(error));
            }
            return Ok(message.result.unwrap_or(Value::Null));
        }
    }
}
