// crates/nexus-mcp-core/src/lib.rs
// ============================================================================
// Module: Nexus MCP Core
// Description: Shared contracts for bridging MCP tools onto async operations.
// Purpose: Provide schema derivation, operation registry, invoker, and channels.
// Dependencies: serde, serde_json, jsonschema, tokio, async-trait
// ============================================================================

//! ## Overview
//! Nexus MCP Core holds the pieces shared by the inbound gateway and the
//! workflow-side transport:
//! - [`schema`] derives JSON schemas from typed model shapes.
//! - [`registry`] collects operation descriptors into a tool catalog.
//! - [`invoker`] is the façade over the asynchronous-operation runtime.
//! - [`invocation`] tracks one tool call through its token lifecycle.
//! - [`protocol`] and [`channel`] model JSON-RPC traffic over duplex channels.
//!
//! Invariants:
//! - Registry state is immutable once shared.
//! - The runtime token is the only source of truth for operation state.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod channel;
pub mod correlation;
pub mod invocation;
pub mod invoker;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod schema;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditEvent;
pub use audit::AuditEventKind;
pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use channel::ChannelError;
pub use channel::DuplexEndpoint;
pub use channel::MemorySink;
pub use channel::MemorySource;
pub use channel::MessageSink;
pub use channel::MessageSource;
pub use channel::memory_duplex;
pub use correlation::CorrelationIdGenerator;
pub use correlation::RequestSequence;
pub use invocation::InvocationOutcome;
pub use invocation::InvocationState;
pub use invocation::Observation;
pub use invocation::OperationInvocation;
pub use invoker::InvokerError;
pub use invoker::InvokerOptions;
pub use invoker::OperationInvoker;
pub use protocol::BridgeErrorKind;
pub use protocol::CallToolResult;
pub use protocol::JsonRpcError;
pub use protocol::JsonRpcMessage;
pub use protocol::MessageKind;
pub use protocol::ServerInfo;
pub use registry::DispatchError;
pub use registry::HandlerGroup;
pub use registry::OperationDescriptor;
pub use registry::OperationRef;
pub use registry::OperationRegistry;
pub use registry::OperationSpec;
pub use registry::RegistrationError;
pub use registry::ToolCatalogEntry;
pub use registry::ToolName;
pub use runtime::DEFAULT_TERMINAL_RETENTION;
pub use runtime::EndpointRef;
pub use runtime::ErrorDetail;
pub use runtime::FnHandler;
pub use runtime::InMemoryOperationRuntime;
pub use runtime::OperationContext;
pub use runtime::OperationHandler;
pub use runtime::OperationRuntime;
pub use runtime::OperationStatus;
pub use runtime::OperationToken;
pub use runtime::RuntimeError;
pub use runtime::StartRequest;
pub use runtime::handler_fn;
pub use schema::FieldShape;
pub use schema::Model;
pub use schema::ModelShape;
pub use schema::ObjectShape;
pub use schema::SchemaError;
pub use schema::UnionShape;
pub use schema::UnionVariant;
pub use schema::derive_schema;
pub use schema::schema_for;
