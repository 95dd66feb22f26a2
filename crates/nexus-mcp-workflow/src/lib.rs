// crates/nexus-mcp-workflow/src/lib.rs
// ============================================================================
// Module: Nexus MCP Workflow Library
// Description: Workflow-side MCP transport and tool client.
// Purpose: Let workflow code speak MCP to tools reached through operations.
// Dependencies: nexus-mcp-core, nexus-mcp-config, tokio
// ============================================================================

//! ## Overview
//! Workflow code talks MCP over a duplex channel whose far side is not a
//! process but the operation runtime. [`WorkflowTransport::connect`] starts
//! one long-lived `MCP/Session` pump operation and returns a
//! [`TransportSession`]; every outbound request is served by starting and
//! awaiting an operation, and its result arrives on the inbound half.
//! [`ToolClient`] layers `initialize`, `tools/list` and `tools/call` on top of
//! any duplex channel.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod client;
pub mod transport;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::ClientError;
pub use client::ToolClient;
pub use transport::SessionPump;
pub use transport::TransportError;
pub use transport::TransportReader;
pub use transport::TransportSession;
pub use transport::TransportSettings;
pub use transport::TransportWriter;
pub use transport::WorkflowTransport;
