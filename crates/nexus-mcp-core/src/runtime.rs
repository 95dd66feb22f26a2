// crates/nexus-mcp-core/src/runtime.rs
// ============================================================================
// Module: Operation Runtime Interface
// Description: Client contract for the durable asynchronous-operation runtime.
// Purpose: Start, poll, and cancel token-addressed operations.
// Dependencies: async-trait, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The bridge never executes durable work itself. It talks to a runtime
//! through [`OperationRuntime`]: `start` returns an [`OperationToken`],
//! `poll` reports the token's [`OperationStatus`], and `cancel` requests
//! termination. The runtime's view of a token is authoritative.
//!
//! [`OperationHandler`] is the server-side counterpart: user code that a
//! runtime executes for a started operation. [`InMemoryOperationRuntime`]
//! wires handlers to the client contract inside one process.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Modules
// ============================================================================

mod memory;

pub use memory::DEFAULT_TERMINAL_RETENTION;
pub use memory::InMemoryOperationRuntime;

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Opaque token identifying a started operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationToken(String);

impl OperationToken {
    /// Wraps a runtime-issued token.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a runtime endpoint hosting operation handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRef {
    /// Endpoint name.
    pub name: String,
    /// Task queue backing the endpoint.
    pub task_queue: String,
}

impl EndpointRef {
    /// Creates a new endpoint reference.
    #[must_use]
    pub fn new(name: impl Into<String>, task_queue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_queue: task_queue.into(),
        }
    }
}

// ============================================================================
// SECTION: Requests and Status
// ============================================================================

/// Request to start one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    /// Endpoint that hosts the operation.
    pub endpoint: EndpointRef,
    /// Service name.
    pub service: String,
    /// Operation name.
    pub operation: String,
    /// Operation input.
    pub input: Value,
    /// Caller-supplied request identifier for correlation.
    pub request_id: Option<String>,
}

/// Failure detail reported by the runtime for a failed operation.
///
/// Carried verbatim to tool clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Failure message.
    pub message: String,
    /// Failure type label when the runtime provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
    /// Structured failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorDetail {
    /// Creates a detail with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure_type: None,
            details: None,
        }
    }

    /// Sets the failure type label.
    #[must_use]
    pub fn with_failure_type(mut self, failure_type: impl Into<String>) -> Self {
        self.failure_type = Some(failure_type.into());
        self
    }

    /// Sets structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure_type {
            Some(failure_type) => write!(f, "{failure_type}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Runtime-reported operation status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running.
    Pending,
    /// Completed with an output.
    Completed(Value),
    /// Failed with a runtime error detail.
    Failed(ErrorDetail),
    /// Canceled.
    Canceled,
}

impl OperationStatus {
    /// Returns true for Completed, Failed, and Canceled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns a stable label for audit output.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Canceled => "canceled",
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Runtime client errors.
///
/// # Invariants
/// - Variants are stable for invoker error mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The runtime refused to start the operation.
    #[error("operation rejected: {0}")]
    Rejected(String),
    /// The runtime endpoint could not be reached.
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),
    /// The operation already reached a terminal state.
    #[error("operation already terminal: {0}")]
    AlreadyTerminal(OperationToken),
    /// The token is not known to the runtime.
    #[error("unknown operation token: {0}")]
    UnknownToken(OperationToken),
}

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Client interface to an asynchronous-operation runtime.
#[async_trait]
pub trait OperationRuntime: Send + Sync {
    /// Starts an operation and returns its token.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Rejected`] when the input or target is refused
    /// and [`RuntimeError::Unavailable`] on transport failure.
    async fn start(&self, request: StartRequest) -> Result<OperationToken, RuntimeError>;

    /// Returns the current status of an operation. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the token is unknown or the runtime is
    /// unreachable.
    async fn poll(&self, token: &OperationToken) -> Result<OperationStatus, RuntimeError>;

    /// Requests cancellation of an operation.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the operation is already terminal, the
    /// token is unknown, or the runtime is unreachable.
    async fn cancel(&self, token: &OperationToken) -> Result<(), RuntimeError>;
}

/// Execution context passed to operation handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationContext {
    /// Token of the running operation.
    pub token: OperationToken,
    /// Service name.
    pub service: String,
    /// Operation name.
    pub operation: String,
    /// Caller request identifier.
    pub request_id: Option<String>,
}

/// User code executed for a started operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Runs the operation to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorDetail`] when the operation fails.
    async fn handle(&self, context: OperationContext, input: Value) -> Result<Value, ErrorDetail>;
}

/// Operation handler backed by an async closure.
pub struct FnHandler<F>(F);

/// Wraps an async closure as an [`OperationHandler`].
pub const fn handler_fn<F, Fut>(handler: F) -> FnHandler<F>
where
    F: Fn(OperationContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ErrorDetail>> + Send + 'static,
{
    FnHandler(handler)
}

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(OperationContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ErrorDetail>> + Send + 'static,
{
    async fn handle(&self, context: OperationContext, input: Value) -> Result<Value, ErrorDetail> {
        (self.0)(context, input).await
    }
}
