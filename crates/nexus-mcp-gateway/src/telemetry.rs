// crates/nexus-mcp-gateway/src/telemetry.rs
// ============================================================================
// Module: Gateway Telemetry
// Description: Observability hooks for gateway request routing.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: nexus-mcp-core
// ============================================================================

//! ## Overview
//! A thin metrics interface for gateway request counters and latency
//! histograms. Deployments plug in their own backend through
//! [`GatewayMetrics`]; [`NoopMetrics`] discards everything.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use nexus_mcp_core::ToolName;
use nexus_mcp_core::protocol::METHOD_CANCELLED;
use nexus_mcp_core::protocol::METHOD_INITIALIZE;
use nexus_mcp_core::protocol::METHOD_PING;
use nexus_mcp_core::protocol::METHOD_TOOLS_CALL;
use nexus_mcp_core::protocol::METHOD_TOOLS_LIST;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default latency buckets in milliseconds for gateway request histograms.
pub const GATEWAY_LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000];

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// Gateway request method classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum GatewayMethod {
    /// JSON-RPC initialize.
    Initialize,
    /// JSON-RPC ping.
    Ping,
    /// JSON-RPC tools/list.
    ToolsList,
    /// JSON-RPC tools/call.
    ToolsCall,
    /// Client cancellation notification.
    Cancel,
    /// Invalid or malformed JSON-RPC message.
    Invalid,
    /// Unsupported JSON-RPC method.
    Other,
}

impl GatewayMethod {
    /// Classifies a JSON-RPC method name.
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        match method {
            METHOD_INITIALIZE => Self::Initialize,
            METHOD_PING => Self::Ping,
            METHOD_TOOLS_LIST => Self::ToolsList,
            METHOD_TOOLS_CALL => Self::ToolsCall,
            METHOD_CANCELLED => Self::Cancel,
            _ => Self::Other,
        }
    }

    /// Returns a stable label for the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Ping => "ping",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::Cancel => "cancel",
            Self::Invalid => "invalid",
            Self::Other => "other",
        }
    }
}

/// Gateway request outcome classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum GatewayOutcome {
    /// Successful request.
    Ok,
    /// Failed request.
    Error,
    /// Request canceled by the client or by session close.
    Canceled,
}

impl GatewayOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }
}

/// Gateway request metric event payload.
///
/// # Invariants
/// - Optional fields are `None` when the metadata is unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayMetricEvent {
    /// Session serving the request.
    pub session_id: String,
    /// JSON-RPC method classification.
    pub method: GatewayMethod,
    /// Tool name when available (tools/call).
    pub tool: Option<ToolName>,
    /// Request outcome.
    pub outcome: GatewayOutcome,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Normalized error kind label.
    pub error_kind: Option<&'static str>,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for gateway requests and latencies.
pub trait GatewayMetrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: GatewayMetricEvent);
    /// Records a latency observation for the request.
    fn record_latency(&self, event: GatewayMetricEvent, latency: Duration);
}

/// No-op metrics sink.
///
/// # Invariants
/// - Metrics are discarded.
pub struct NoopMetrics;

impl GatewayMetrics for NoopMetrics {
    fn record_request(&self, _event: GatewayMetricEvent) {}

    fn record_latency(&self, _event: GatewayMetricEvent, _latency: Duration) {}
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the smallest bucket bound covering `latency`, or `None` when the
/// latency exceeds every bucket.
#[must_use]
pub fn latency_bucket(latency: Duration) -> Option<u64> {
    let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
    GATEWAY_LATENCY_BUCKETS_MS.iter().copied().find(|bound| millis <= *bound)
}
