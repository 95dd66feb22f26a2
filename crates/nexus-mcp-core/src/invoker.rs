// crates/nexus-mcp-core/src/invoker.rs
// ============================================================================
// Module: Operation Invoker
// Description: Façade over the asynchronous-operation runtime client.
// Purpose: Start, poll, await, cancel, and fetch results of operations.
// Dependencies: jsonschema, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! [`OperationInvoker`] binds a runtime client to one endpoint and adds the
//! behavior the bridge needs on top of the raw contract:
//! - input validation against a descriptor's schema before start;
//! - bounded waiting ([`OperationInvoker::await_terminal`]) that sleeps
//!   between polls and reports `Pending` on timeout;
//! - best-effort cancellation that never fails the caller and audits
//!   refusals.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use jsonschema::Draft;
use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::audit::AuditEvent;
use crate::audit::AuditEventKind;
use crate::audit::AuditSink;
use crate::protocol::BridgeErrorKind;
use crate::protocol::JsonRpcError;
use crate::registry::OperationDescriptor;
use crate::runtime::EndpointRef;
use crate::runtime::ErrorDetail;
use crate::runtime::OperationRuntime;
use crate::runtime::OperationStatus;
use crate::runtime::OperationToken;
use crate::runtime::RuntimeError;
use crate::runtime::StartRequest;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default delay between polls while awaiting a terminal state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Maximum number of schema violations reported in one rejection.
const MAX_REPORTED_VIOLATIONS: usize = 8;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Invoker tuning options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokerOptions {
    /// Delay between polls in [`OperationInvoker::await_terminal`].
    pub poll_interval: Duration,
}

impl Default for InvokerOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Invoker errors.
///
/// # Invariants
/// - Variants are stable for JSON-RPC error mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokerError {
    /// The runtime or input validation refused the start.
    #[error("operation start rejected: {0}")]
    OperationStartRejected(String),
    /// The runtime endpoint could not be reached.
    #[error("endpoint unavailable: {0}")]
    EndpointUnavailable(String),
    /// The token is not known to the runtime.
    #[error("unknown operation token: {0}")]
    UnknownToken(OperationToken),
    /// The operation is already terminal.
    #[error("operation already terminal: {0}")]
    AlreadyTerminal(OperationToken),
    /// The operation failed.
    #[error("operation failed: {0}")]
    OperationFailed(ErrorDetail),
    /// The operation was canceled.
    #[error("operation canceled")]
    OperationCanceled,
    /// The operation has not reached a terminal state.
    #[error("operation pending")]
    OperationPending,
}

impl InvokerError {
    /// Maps the error onto the client-visible JSON-RPC error table.
    ///
    /// Failed operations carry their runtime detail verbatim under
    /// `data.detail`.
    #[must_use]
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::OperationStartRejected(reason) => {
                JsonRpcError::bridge(BridgeErrorKind::OperationStartRejected, reason.clone())
            }
            Self::EndpointUnavailable(_)
            | Self::UnknownToken(_)
            | Self::AlreadyTerminal(_)
            | Self::OperationPending => {
                JsonRpcError::bridge(BridgeErrorKind::EndpointUnavailable, self.to_string())
            }
            Self::OperationFailed(detail) => {
                let error =
                    JsonRpcError::bridge(BridgeErrorKind::OperationFailed, self.to_string());
                match serde_json::to_value(detail) {
                    Ok(value) => error.with_detail(value),
                    Err(_) => error,
                }
            }
            Self::OperationCanceled => {
                JsonRpcError::bridge(BridgeErrorKind::OperationCanceled, self.to_string())
            }
        }
    }
}

impl From<RuntimeError> for InvokerError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Rejected(reason) => Self::OperationStartRejected(reason),
            RuntimeError::Unavailable(reason) => Self::EndpointUnavailable(reason),
            RuntimeError::UnknownToken(token) => Self::UnknownToken(token),
            RuntimeError::AlreadyTerminal(token) => Self::AlreadyTerminal(token),
        }
    }
}

// ============================================================================
// SECTION: Invoker
// ============================================================================

/// Runtime façade bound to one endpoint.
#[derive(Clone)]
pub struct OperationInvoker {
    /// Runtime client.
    runtime: Arc<dyn OperationRuntime>,
    /// Endpoint hosting the operations.
    endpoint: EndpointRef,
    /// Tuning options.
    options: InvokerOptions,
    /// Audit sink for cancellation outcomes.
    audit: Arc<dyn AuditSink>,
}

impl OperationInvoker {
    /// Creates an invoker for `endpoint`.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn OperationRuntime>,
        endpoint: EndpointRef,
        options: InvokerOptions,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            runtime,
            endpoint,
            options,
            audit,
        }
    }

    /// Returns the bound endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &EndpointRef {
        &self.endpoint
    }

    /// Returns the configured options.
    #[must_use]
    pub const fn options(&self) -> InvokerOptions {
        self.options
    }

    /// Starts `service/operation` with `input`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokerError::OperationStartRejected`] when the runtime
    /// rejects the start and [`InvokerError::EndpointUnavailable`] on
    /// transport failure.
    pub async fn start(
        &self,
        service: &str,
        operation: &str,
        input: Value,
        request_id: Option<String>,
    ) -> Result<OperationToken, InvokerError> {
        let request = StartRequest {
            endpoint: self.endpoint.clone(),
            service: service.to_string(),
            operation: operation.to_string(),
            input,
            request_id,
        };
        Ok(self.runtime.start(request).await?)
    }

    /// Validates `input` against the descriptor's schema, then starts it.
    ///
    /// # Errors
    ///
    /// Returns [`InvokerError::OperationStartRejected`] listing schema
    /// violations, plus any error from [`OperationInvoker::start`].
    pub async fn start_descriptor(
        &self,
        descriptor: &OperationDescriptor,
        input: Value,
        request_id: Option<String>,
    ) -> Result<OperationToken, InvokerError> {
        validate_input(&descriptor.input_schema, &input)?;
        self.start(&descriptor.service, &descriptor.name, input, request_id).await
    }

    /// Returns the current status of `token`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokerError::UnknownToken`] or
    /// [`InvokerError::EndpointUnavailable`] from the runtime.
    pub async fn poll(&self, token: &OperationToken) -> Result<OperationStatus, InvokerError> {
        Ok(self.runtime.poll(token).await?)
    }

    /// Polls until `token` is terminal or `timeout` elapses.
    ///
    /// Returns [`OperationStatus::Pending`] on timeout. At least one poll is
    /// always issued.
    ///
    /// # Errors
    ///
    /// Returns any error from [`OperationInvoker::poll`].
    pub async fn await_terminal(
        &self,
        token: &OperationToken,
        timeout: Duration,
    ) -> Result<OperationStatus, InvokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.poll(token).await?;
            if status.is_terminal() {
                return Ok(status);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(OperationStatus::Pending);
            }
            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;
        }
    }

    /// Requests cancellation of `token`. Never fails.
    ///
    /// Returns true when the runtime accepted the cancel. Refusals (already
    /// terminal, unknown token, endpoint unavailable) are audited as
    /// `cancel_ignored`.
    pub async fn cancel(&self, token: &OperationToken) -> bool {
        match self.runtime.cancel(token).await {
            Ok(()) => {
                self.audit.record(&AuditEvent::new(AuditEventKind::CancelIssued).token(token).outcome("ok"));
                true
            }
            Err(err) => {
                self.audit.record(
                    &AuditEvent::new(AuditEventKind::CancelIgnored)
                        .token(token)
                        .outcome("error")
                        .detail(err.to_string()),
                );
                false
            }
        }
    }

    /// Returns the output of a completed operation.
    ///
    /// # Errors
    ///
    /// Returns [`InvokerError::OperationFailed`],
    /// [`InvokerError::OperationCanceled`], or
    /// [`InvokerError::OperationPending`] for non-completed operations, plus
    /// any error from [`OperationInvoker::poll`].
    pub async fn fetch_result(&self, token: &OperationToken) -> Result<Value, InvokerError> {
        match self.poll(token).await? {
            OperationStatus::Completed(output) => Ok(output),
            OperationStatus::Failed(detail) => Err(InvokerError::OperationFailed(detail)),
            OperationStatus::Canceled => Err(InvokerError::OperationCanceled),
            OperationStatus::Pending => Err(InvokerError::OperationPending),
        }
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates `input` against `schema`.
///
/// # Errors
///
/// Returns [`InvokerError::OperationStartRejected`] when the schema does not
/// compile or the input violates it.
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), InvokerError> {
    let validator = compile_schema(schema)?;
    let violations: Vec<String> = validator
        .iter_errors(input)
        .take(MAX_REPORTED_VIOLATIONS)
        .map(|err| err.to_string())
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(InvokerError::OperationStartRejected(format!(
            "input does not match schema: {}",
            violations.join("; ")
        )))
    }
}

/// Compiles a JSON schema for validation.
fn compile_schema(schema: &Value) -> Result<Validator, InvokerError> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| InvokerError::OperationStartRejected(format!("invalid schema: {err}")))
}
