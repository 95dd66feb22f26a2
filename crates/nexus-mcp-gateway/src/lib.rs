// crates/nexus-mcp-gateway/src/lib.rs
// ============================================================================
// Module: Nexus MCP Gateway Library
// Description: Inbound MCP gateway serving tool clients over duplex channels.
// Purpose: Expose registered operations as MCP tools backed by the runtime.
// Dependencies: nexus-mcp-core, nexus-mcp-config, tokio
// ============================================================================

//! ## Overview
//! The gateway accepts JSON-RPC sessions from MCP tool clients, answers
//! `initialize`, `ping` and `tools/list` locally from the operation registry,
//! and serves every `tools/call` as a durable operation started, polled and
//! (on client cancel or disconnect) canceled through the runtime. The stdio
//! bootstrap combines configuration, registry, runtime, audit sink and
//! Content-Length framing.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod framing;
pub mod server;
pub mod service;
pub mod session;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use framing::FramedReader;
pub use framing::FramedWriter;
pub use framing::MAX_HEADER_BYTES;
pub use server::GatewayServer;
pub use server::build_audit_sink;
pub use service::McpServiceHandler;
pub use service::mcp_handler_group;
pub use session::GatewayError;
pub use session::GatewaySession;
pub use session::GatewaySettings;
pub use session::InboundGateway;
pub use session::SessionState;
pub use telemetry::GATEWAY_LATENCY_BUCKETS_MS;
pub use telemetry::GatewayMethod;
pub use telemetry::GatewayMetricEvent;
pub use telemetry::GatewayMetrics;
pub use telemetry::GatewayOutcome;
pub use telemetry::NoopMetrics;
