// crates/nexus-mcp-core/src/audit.rs
// ============================================================================
// Module: Bridge Audit Logging
// Description: Structured audit events for sessions, tool calls, and cancels.
// Purpose: Emit JSON-line audit records without a logging framework dependency.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every session transition, tool call outcome, and cancellation attempt is
//! recorded as an [`AuditEvent`]. Sinks serialize events as one JSON object
//! per line so deployments can route them to any log pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::runtime::OperationToken;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Audit event kinds.
///
/// # Invariants
/// - Serialized labels are stable for log consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Gateway session started serving a channel.
    SessionOpened,
    /// Gateway session finished cleanup.
    SessionClosed,
    /// Tool call reached an outcome.
    ToolCall,
    /// Cancellation was issued to the runtime.
    CancelIssued,
    /// Cancellation was refused or failed; the attempt is dropped.
    CancelIgnored,
    /// Workflow transport started its pump operation.
    TransportOpened,
    /// Workflow transport released its pump operation.
    TransportClosed,
    /// Workflow transport served one outbound request.
    TransportRequest,
}

impl AuditEventKind {
    /// Returns the stable label for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionOpened => "session_opened",
            Self::SessionClosed => "session_closed",
            Self::ToolCall => "tool_call",
            Self::CancelIssued => "cancel_issued",
            Self::CancelIgnored => "cancel_ignored",
            Self::TransportOpened => "transport_opened",
            Self::TransportClosed => "transport_closed",
            Self::TransportRequest => "transport_request",
        }
    }
}

/// Audit event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// Event kind.
    pub event: AuditEventKind,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Session identifier when scoped to a session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// JSON-RPC request identifier when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Tool name when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Operation token when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<OperationToken>,
    /// Outcome label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'static str>,
    /// Free-form detail (error message).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Creates an event of `kind` stamped with the current time.
    #[must_use]
    pub fn new(kind: AuditEventKind) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event: kind,
            timestamp_ms,
            session_id: None,
            request_id: None,
            tool: None,
            token: None,
            outcome: None,
            detail: None,
        }
    }

    /// Sets the session identifier.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the request identifier.
    #[must_use]
    pub fn request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets the tool name.
    #[must_use]
    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Sets the operation token.
    #[must_use]
    pub fn token(mut self, token: &OperationToken) -> Self {
        self.token = Some(token.clone());
        self
    }

    /// Sets the outcome label.
    #[must_use]
    pub const fn outcome(mut self, outcome: &'static str) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Sets the detail message.
    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for bridge events.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &AuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}
