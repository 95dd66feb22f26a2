// crates/nexus-mcp-gateway/src/service.rs
// ============================================================================
// Module: MCP Service Handler
// Description: Runtime-side handlers for the bridge's own MCP service.
// Purpose: Serve `MCP/ListTools` and the `MCP/Session` pump as operations.
// Dependencies: async-trait, nexus-mcp-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! Workflow-side transports reach the catalog and hold their session open
//! through operations on the `MCP` service:
//!
//! - `MCP/ListTools` completes with the visible catalog snapshot.
//! - `MCP/Session` (input `{session_id}`) stays pending for the life of one
//!   workflow-side session. It completes only when the endpoint ends the
//!   session and is otherwise released by cancellation.
//!
//! Both operations are registered hidden so they never appear as tools.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use nexus_mcp_core::ErrorDetail;
use nexus_mcp_core::HandlerGroup;
use nexus_mcp_core::InMemoryOperationRuntime;
use nexus_mcp_core::ModelShape;
use nexus_mcp_core::ObjectShape;
use nexus_mcp_core::OperationContext;
use nexus_mcp_core::OperationHandler;
use nexus_mcp_core::OperationRegistry;
use nexus_mcp_core::OperationSpec;
use nexus_mcp_core::protocol::MCP_SERVICE_NAME;
use nexus_mcp_core::protocol::OPERATION_LIST_TOOLS;
use nexus_mcp_core::protocol::OPERATION_SESSION;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Notify;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Handler group identifier for the MCP service.
pub const MCP_HANDLER_GROUP_ID: &str = "mcp-service-handler";

// ============================================================================
// SECTION: Registration
// ============================================================================

/// Returns the hidden `MCP` handler group for registry registration.
#[must_use]
pub fn mcp_handler_group() -> HandlerGroup {
    let catalog_entry: ModelShape = ObjectShape::named("ToolCatalogEntry")
        .field("name", ModelShape::String)
        .field("description", ModelShape::Optional(Box::new(ModelShape::String)))
        .field("inputSchema", ModelShape::Any)
        .into();
    let session_input: ModelShape = ObjectShape::named("SessionInput")
        .described_field("session_id", ModelShape::String, "Workflow-side session identifier.")
        .into();
    HandlerGroup::new(MCP_HANDLER_GROUP_ID, MCP_SERVICE_NAME)
        .operation(
            OperationSpec::with_shapes(
                OPERATION_LIST_TOOLS,
                ModelShape::Null,
                ModelShape::Sequence(Box::new(catalog_entry)),
            )
            .described("List the operations exposed as MCP tools.")
            .hidden(),
        )
        .operation(
            OperationSpec::with_shapes(OPERATION_SESSION, session_input, ModelShape::Any)
                .described("Hold one workflow-side MCP session open.")
                .hidden(),
        )
}

// ============================================================================
// SECTION: Service Handler
// ============================================================================

/// Live session table shared with the session handler.
type SessionTable = Arc<Mutex<BTreeMap<String, Arc<Notify>>>>;

/// Serves the `MCP` service operations for one registry.
///
/// # Invariants
/// - A session id is live from the start of its `MCP/Session` operation until
///   that operation completes or is canceled.
#[derive(Clone)]
pub struct McpServiceHandler {
    /// Registry the catalog is read from.
    registry: Arc<OperationRegistry>,
    /// Live workflow-side sessions.
    sessions: SessionTable,
}

impl McpServiceHandler {
    /// Creates a handler over `registry`.
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            sessions: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Registers `MCP/ListTools` and `MCP/Session` on `runtime`.
    pub fn install(&self, runtime: &mut InMemoryOperationRuntime) {
        runtime.register_handler(
            MCP_SERVICE_NAME,
            OPERATION_LIST_TOOLS,
            ListToolsHandler {
                registry: Arc::clone(&self.registry),
            },
        );
        runtime.register_handler(
            MCP_SERVICE_NAME,
            OPERATION_SESSION,
            SessionHandler {
                sessions: Arc::clone(&self.sessions),
            },
        );
    }

    /// Returns the ids of live sessions.
    #[must_use]
    pub fn active_sessions(&self) -> BTreeSet<String> {
        self.sessions.lock().map(|sessions| sessions.keys().cloned().collect()).unwrap_or_default()
    }

    /// Completes the pump of `session_id`. Returns false when it is not live.
    pub fn end_session(&self, session_id: &str) -> bool {
        let Ok(sessions) = self.sessions.lock() else {
            return false;
        };
        match sessions.get(session_id) {
            Some(signal) => {
                signal.notify_one();
                true
            }
            None => false,
        }
    }
}

/// `MCP/ListTools`.
struct ListToolsHandler {
    /// Registry the catalog is read from.
    registry: Arc<OperationRegistry>,
}

#[async_trait]
impl OperationHandler for ListToolsHandler {
    async fn handle(&self, _context: OperationContext, _input: Value) -> Result<Value, ErrorDetail> {
        serde_json::to_value(self.registry.snapshot_catalog()).map_err(|err| {
            ErrorDetail::new(format!("catalog serialization failed: {err}"))
                .with_failure_type("SerializationError")
        })
    }
}

/// `MCP/Session`.
struct SessionHandler {
    /// Live workflow-side sessions.
    sessions: SessionTable,
}

/// Removes a session from the table when its operation ends in any way.
struct SessionGuard {
    /// Live workflow-side sessions.
    sessions: SessionTable,
    /// Session identifier.
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.session_id);
        }
    }
}

#[async_trait]
impl OperationHandler for SessionHandler {
    async fn handle(&self, _context: OperationContext, input: Value) -> Result<Value, ErrorDetail> {
        let Some(session_id) = input.get("session_id").and_then(Value::as_str) else {
            return Err(ErrorDetail::new("session input requires a string session_id")
                .with_failure_type("InvalidInput"));
        };
        let signal = Arc::new(Notify::new());
        {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|_| ErrorDetail::new("session table unavailable"))?;
            if sessions.contains_key(session_id) {
                return Err(ErrorDetail::new(format!("session {session_id} is already open"))
                    .with_failure_type("DuplicateSession"));
            }
            sessions.insert(session_id.to_string(), Arc::clone(&signal));
        }
        let _guard = SessionGuard {
            sessions: Arc::clone(&self.sessions),
            session_id: session_id.to_string(),
        };
        signal.notified().await;
        Ok(json!({ "session_id": session_id }))
    }
}

#[cfg(test)]
mod tests;
