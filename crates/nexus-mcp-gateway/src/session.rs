// crates/nexus-mcp-gateway/src/session.rs
// ============================================================================
// Module: Gateway Sessions
// Description: Per-client MCP session serving tools over durable operations.
// Purpose: Route JSON-RPC requests to the registry and operation invoker.
// Dependencies: nexus-mcp-core, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! [`InboundGateway`] holds the shared, read-only wiring (registry, invoker,
//! settings, audit and metrics sinks) and opens one [`GatewaySession`] per
//! client channel. A session moves `Idle → Active → Closing → Closed`.
//!
//! While active, the reader loop owns the inbound half and a writer task owns
//! the outbound half; every other component hands messages to the writer
//! through a bounded queue. Each `tools/call` runs as its own task, so
//! responses may leave out of order. A per-call slot holds the call's
//! [`OperationInvocation`]; only the observation that moves it into a
//! terminal state (or a local cancel) produces the call's response, so exactly
//! one response (or none, after close) is produced per call.
//!
//! When the inbound half ends, every non-terminal invocation is canceled
//! exactly once and call tasks are aborted. Calls still waiting on their
//! start acknowledgment are allowed to finish starting and cancel their own
//! operation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use nexus_mcp_config::GatewayConfig;
use nexus_mcp_core::AuditEvent;
use nexus_mcp_core::AuditEventKind;
use nexus_mcp_core::AuditSink;
use nexus_mcp_core::BridgeErrorKind;
use nexus_mcp_core::CallToolResult;
use nexus_mcp_core::ChannelError;
use nexus_mcp_core::CorrelationIdGenerator;
use nexus_mcp_core::ErrorDetail;
use nexus_mcp_core::InvokerError;
use nexus_mcp_core::JsonRpcError;
use nexus_mcp_core::JsonRpcMessage;
use nexus_mcp_core::MessageKind;
use nexus_mcp_core::MessageSink;
use nexus_mcp_core::MessageSource;
use nexus_mcp_core::NoopAuditSink;
use nexus_mcp_core::Observation;
use nexus_mcp_core::OperationDescriptor;
use nexus_mcp_core::OperationInvocation;
use nexus_mcp_core::OperationInvoker;
use nexus_mcp_core::OperationRegistry;
use nexus_mcp_core::OperationStatus;
use nexus_mcp_core::OperationToken;
use nexus_mcp_core::RequestSequence;
use nexus_mcp_core::ServerInfo;
use nexus_mcp_core::ToolName;
use nexus_mcp_core::protocol::CancelledParams;
use nexus_mcp_core::protocol::ListToolsResult;
use nexus_mcp_core::protocol::METHOD_CANCELLED;
use nexus_mcp_core::protocol::METHOD_INITIALIZE;
use nexus_mcp_core::protocol::METHOD_PING;
use nexus_mcp_core::protocol::METHOD_TOOLS_CALL;
use nexus_mcp_core::protocol::METHOD_TOOLS_LIST;
use nexus_mcp_core::protocol::ToolCallParams;
use nexus_mcp_core::protocol::id_key;
use nexus_mcp_core::protocol::initialize_result;
use nexus_mcp_core::protocol::progress_notification;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::telemetry::GatewayMethod;
use crate::telemetry::GatewayMetricEvent;
use crate::telemetry::GatewayMetrics;
use crate::telemetry::GatewayOutcome;
use crate::telemetry::NoopMetrics;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix for gateway session identifiers.
const SESSION_ID_PREFIX: &str = "gw";
/// Default await round bound.
const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default outbound queue depth.
const DEFAULT_OUTBOUND_BUFFER: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway failures that end a session or abort startup.
///
/// Per-call failures never surface here; they become JSON-RPC error
/// responses and the session stays active.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The audit sink could not be opened.
    #[error("audit sink unavailable: {0}")]
    Audit(String),
    /// A session was asked to serve from a state other than idle.
    #[error("session {session_id} cannot serve from state {state}")]
    SessionState {
        /// Session identifier.
        session_id: String,
        /// Current state label.
        state: &'static str,
    },
    /// The client channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Per-session gateway behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Bound on one `await_terminal` round.
    pub await_timeout: Duration,
    /// Emit `notifications/progress` on every await timeout.
    pub progress_keepalive: bool,
    /// Outbound message queue depth.
    pub outbound_buffer: usize,
}

impl GatewaySettings {
    /// Builds settings from the `[gateway]` config section.
    #[must_use]
    pub const fn from_config(config: &GatewayConfig) -> Self {
        Self {
            await_timeout: config.await_timeout(),
            progress_keepalive: config.progress_keepalive,
            outbound_buffer: config.outbound_buffer,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            await_timeout: DEFAULT_AWAIT_TIMEOUT,
            progress_keepalive: true,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Shared gateway wiring; cheap to clone.
///
/// # Invariants
/// - The registry is read-only once the gateway is built.
#[derive(Clone)]
pub struct InboundGateway {
    /// Registered operations.
    registry: Arc<OperationRegistry>,
    /// Runtime facade.
    invoker: OperationInvoker,
    /// Session behavior.
    settings: GatewaySettings,
    /// Identity reported from `initialize`.
    server_info: ServerInfo,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Metrics sink.
    metrics: Arc<dyn GatewayMetrics>,
    /// Session identifier generator.
    session_ids: Arc<CorrelationIdGenerator>,
}

impl InboundGateway {
    /// Creates a gateway with no-op audit and metrics sinks.
    #[must_use]
    pub fn new(
        registry: Arc<OperationRegistry>,
        invoker: OperationInvoker,
        settings: GatewaySettings,
        server_info: ServerInfo,
    ) -> Self {
        Self {
            registry,
            invoker,
            settings,
            server_info,
            audit: Arc::new(NoopAuditSink),
            metrics: Arc::new(NoopMetrics),
            session_ids: Arc::new(CorrelationIdGenerator::new(SESSION_ID_PREFIX)),
        }
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn GatewayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Returns the session settings.
    #[must_use]
    pub const fn settings(&self) -> GatewaySettings {
        self.settings
    }

    /// Opens a new idle session.
    #[must_use]
    pub fn open_session(&self) -> GatewaySession {
        let session_id = self.session_ids.issue();
        GatewaySession {
            gateway: self.clone(),
            requests: Arc::new(RequestSequence::new(session_id.clone())),
            session_id,
            state: SessionState::Idle,
        }
    }

    /// Serves one client channel in a fresh session until it closes.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Channel`] when the channel fails fatally.
    pub async fn serve<S, K>(&self, source: S, sink: K) -> Result<(), GatewayError>
    where
        S: MessageSource,
        K: MessageSink + 'static,
    {
        self.open_session().serve(source, sink).await
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opened, not yet serving.
    Idle,
    /// Serving a client channel.
    Active,
    /// Client channel ended; cleanup in progress.
    Closing,
    /// Cleanup finished.
    Closed,
}

impl SessionState {
    /// Returns a stable label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// One client session.
pub struct GatewaySession {
    /// Shared gateway wiring.
    gateway: InboundGateway,
    /// Session identifier.
    session_id: String,
    /// Runtime request ids for calls in this session.
    requests: Arc<RequestSequence>,
    /// Lifecycle state.
    state: SessionState,
}

/// Outcome of one call, shared between the reader loop and the call task.
#[derive(Default)]
struct CallSlot {
    /// Invocation, once the runtime acknowledged the start.
    invocation: Option<OperationInvocation>,
    /// Client cancel or session close seen; no start-failure reply follows.
    cancel_requested: bool,
    /// The start was rejected and its error reply claimed.
    start_failed: bool,
}

/// Reader-side handle for an in-flight call.
struct CallHandle {
    /// Shared outcome.
    slot: Arc<Mutex<CallSlot>>,
    /// Task serving the call.
    task: JoinHandle<()>,
}

/// What session close does with one call.
enum CloseAction {
    /// Issue the single cancel for this token, then abort the task.
    Cancel(OperationToken),
    /// Nothing left to cancel; abort the task.
    Abort,
    /// Start in flight; the task cancels its own operation.
    AwaitStart,
}

impl GatewaySession {
    /// Returns the session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Serves the client channel until its inbound half ends.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SessionState`] when the session is not idle
    /// and [`GatewayError::Channel`] when the inbound half fails fatally.
    /// Cleanup runs in both channel outcomes.
    pub async fn serve<S, K>(&mut self, mut source: S, sink: K) -> Result<(), GatewayError>
    where
        S: MessageSource,
        K: MessageSink + 'static,
    {
        if self.state != SessionState::Idle {
            return Err(GatewayError::SessionState {
                session_id: self.session_id.clone(),
                state: self.state.as_str(),
            });
        }
        self.state = SessionState::Active;
        self.audit(AuditEvent::new(AuditEventKind::SessionOpened));
        let (outbound, outbound_rx) = mpsc::channel(self.gateway.settings.outbound_buffer.max(1));
        let writer = tokio::spawn(write_outbound(sink, outbound_rx));
        let mut calls: HashMap<String, CallHandle> = HashMap::new();
        let result = loop {
            let message = match source.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => break Ok(()),
                Err(err) if err.is_recoverable() => {
                    let error = JsonRpcError::bridge(BridgeErrorKind::InvalidRequest, err.to_string());
                    self.record(GatewayMethod::Invalid, None, Some(&error));
                    let _ = outbound.send(JsonRpcMessage::error_response(None, error)).await;
                    continue;
                }
                Err(err) => break Err(GatewayError::Channel(err)),
            };
            calls.retain(|_, call| !call.task.is_finished());
            self.dispatch(message, &outbound, &mut calls).await;
        };
        self.state = SessionState::Closing;
        self.shutdown(calls).await;
        drop(outbound);
        let _ = writer.await;
        self.state = SessionState::Closed;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.audit(AuditEvent::new(AuditEventKind::SessionClosed).outcome(outcome));
        result
    }

    /// Routes one inbound message.
    async fn dispatch(
        &self,
        message: JsonRpcMessage,
        outbound: &mpsc::Sender<JsonRpcMessage>,
        calls: &mut HashMap<String, CallHandle>,
    ) {
        match message.kind() {
            MessageKind::Invalid => {
                let id = message.id.filter(|id| id.is_string() || id.is_number());
                let error =
                    JsonRpcError::bridge(BridgeErrorKind::InvalidRequest, "invalid JSON-RPC envelope");
                self.record(GatewayMethod::Invalid, None, Some(&error));
                let _ = outbound.send(JsonRpcMessage::error_response(id, error)).await;
            }
            MessageKind::Response => {}
            MessageKind::Notification => {
                if message.method() == Some(METHOD_CANCELLED) {
                    self.cancel_call(message.params, outbound, calls).await;
                }
            }
            MessageKind::Request => {
                let Some(id) = message.id.clone() else {
                    return;
                };
                let method = message.method().unwrap_or_default().to_string();
                let reply = match method.as_str() {
                    METHOD_INITIALIZE => Ok(initialize_result(&self.gateway.server_info)),
                    METHOD_PING => Ok(json!({})),
                    METHOD_TOOLS_LIST => self.list_tools(),
                    METHOD_TOOLS_CALL => {
                        self.start_call(id, &message, outbound, calls).await;
                        return;
                    }
                    other => Err(JsonRpcError::bridge(
                        BridgeErrorKind::MethodNotFound,
                        format!("method not found: {other}"),
                    )),
                };
                let gateway_method = GatewayMethod::from_method(&method);
                let response = match reply {
                    Ok(result) => {
                        self.record(gateway_method, None, None);
                        JsonRpcMessage::response(id, result)
                    }
                    Err(error) => {
                        self.record(gateway_method, None, Some(&error));
                        JsonRpcMessage::error_response(Some(id), error)
                    }
                };
                let _ = outbound.send(response).await;
            }
        }
    }

    /// Builds the `tools/list` result from the catalog snapshot.
    fn list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: self.gateway.registry.snapshot_catalog(),
        };
        serde_json::to_value(result)
            .map_err(|err| JsonRpcError::bridge(BridgeErrorKind::Serialization, err.to_string()))
    }

    /// Resolves a `tools/call` and spawns the task serving it.
    async fn start_call(
        &self,
        id: Value,
        message: &JsonRpcMessage,
        outbound: &mpsc::Sender<JsonRpcMessage>,
        calls: &mut HashMap<String, CallHandle>,
    ) {
        let key = id_key(&id);
        let resolved = if calls.contains_key(&key) {
            Err((None, JsonRpcError::bridge(BridgeErrorKind::InvalidRequest, "duplicate request id")))
        } else {
            self.resolve_call(message)
        };
        let (descriptor, input) = match resolved {
            Ok(resolved) => resolved,
            Err((tool, error)) => {
                self.record(GatewayMethod::ToolsCall, tool, Some(&error));
                let _ = outbound.send(JsonRpcMessage::error_response(Some(id), error)).await;
                return;
            }
        };
        let slot = Arc::new(Mutex::new(CallSlot::default()));
        let task = CallTask {
            progress_token: message.progress_token().unwrap_or_else(|| id.clone()),
            id,
            request_id: self.requests.issue(),
            descriptor,
            input,
            slot: Arc::clone(&slot),
            outbound: outbound.clone(),
            gateway: self.gateway.clone(),
            session_id: self.session_id.clone(),
        };
        calls.insert(
            key,
            CallHandle {
                slot,
                task: tokio::spawn(task.run()),
            },
        );
    }

    /// Parses params and resolves the tool name.
    #[allow(clippy::type_complexity, reason = "Error pairs the tool label with its response.")]
    fn resolve_call(
        &self,
        message: &JsonRpcMessage,
    ) -> Result<(OperationDescriptor, Value), (Option<ToolName>, JsonRpcError)> {
        let params = message
            .params
            .clone()
            .ok_or_else(|| "missing tools/call params".to_string())
            .and_then(|params| {
                serde_json::from_value::<ToolCallParams>(params).map_err(|err| err.to_string())
            })
            .map_err(|reason| {
                (None, JsonRpcError::bridge(BridgeErrorKind::InvalidParams, reason))
            })?;
        let descriptor = self
            .gateway
            .registry
            .resolve(&params.name)
            .map_err(|err| (None, JsonRpcError::bridge(BridgeErrorKind::ToolNotFound, err.to_string())))?;
        let input = params.arguments.unwrap_or_else(|| json!({}));
        Ok((descriptor.clone(), input))
    }

    /// Handles `notifications/cancelled`.
    async fn cancel_call(
        &self,
        params: Option<Value>,
        outbound: &mpsc::Sender<JsonRpcMessage>,
        calls: &HashMap<String, CallHandle>,
    ) {
        let Some(params) =
            params.and_then(|params| serde_json::from_value::<CancelledParams>(params).ok())
        else {
            return;
        };
        let Some(call) = calls.get(&id_key(&params.request_id)) else {
            return;
        };
        let (token, tool) = {
            let Ok(mut slot) = call.slot.lock() else {
                return;
            };
            if slot.cancel_requested || slot.start_failed {
                return;
            }
            slot.cancel_requested = true;
            match slot.invocation.as_mut() {
                Some(invocation) => {
                    if !invocation.request_cancel() {
                        return;
                    }
                    invocation.observe(&OperationStatus::Canceled);
                    (Some(invocation.token().clone()), Some(invocation.tool_name().clone()))
                }
                None => (None, None),
            }
        };
        if let Some(token) = token.clone() {
            call.task.abort();
            let invoker = self.gateway.invoker.clone();
            tokio::spawn(async move {
                invoker.cancel(&token).await;
            });
        }
        let error = JsonRpcError::bridge(BridgeErrorKind::OperationCanceled, "operation canceled by client");
        self.record_outcome(GatewayMethod::ToolsCall, tool.clone(), GatewayOutcome::Canceled, Some(&error));
        let mut event = AuditEvent::new(AuditEventKind::ToolCall).outcome("canceled");
        if let Some(tool) = tool {
            event = event.tool(tool.as_str());
        }
        if let Some(token) = &token {
            event = event.token(token);
        }
        self.audit(event);
        let _ = outbound.send(JsonRpcMessage::error_response(Some(params.request_id), error)).await;
    }

    /// Cancels every non-terminal invocation exactly once and stops call
    /// tasks.
    async fn shutdown(&self, calls: HashMap<String, CallHandle>) {
        let mut tokens = Vec::new();
        let mut starting = Vec::new();
        for call in calls.into_values() {
            let action = match call.slot.lock() {
                Ok(mut slot) => {
                    slot.cancel_requested = true;
                    match slot.invocation.as_mut() {
                        Some(invocation) => {
                            if invocation.request_cancel() {
                                invocation.observe(&OperationStatus::Canceled);
                                CloseAction::Cancel(invocation.token().clone())
                            } else {
                                CloseAction::Abort
                            }
                        }
                        None => CloseAction::AwaitStart,
                    }
                }
                Err(_) => CloseAction::Abort,
            };
            match action {
                CloseAction::Cancel(token) => {
                    call.task.abort();
                    tokens.push(token);
                }
                CloseAction::Abort => call.task.abort(),
                CloseAction::AwaitStart => starting.push(call.task),
            }
        }
        for token in tokens {
            self.gateway.invoker.cancel(&token).await;
        }
        for task in starting {
            let _ = task.await;
        }
    }

    /// Records an audit event tagged with this session.
    fn audit(&self, event: AuditEvent) {
        self.gateway.audit.record(&event.session(self.session_id.clone()));
    }

    /// Records a request metric derived from an optional error.
    fn record(&self, method: GatewayMethod, tool: Option<ToolName>, error: Option<&JsonRpcError>) {
        let outcome = if error.is_some() { GatewayOutcome::Error } else { GatewayOutcome::Ok };
        self.record_outcome(method, tool, outcome, error);
    }

    /// Records a request metric.
    fn record_outcome(
        &self,
        method: GatewayMethod,
        tool: Option<ToolName>,
        outcome: GatewayOutcome,
        error: Option<&JsonRpcError>,
    ) {
        self.gateway.metrics.record_request(metric_event(
            &self.session_id,
            method,
            tool,
            outcome,
            error,
        ));
    }
}

// ============================================================================
// SECTION: Call Tasks
// ============================================================================

/// State owned by the task serving one `tools/call`.
struct CallTask {
    /// Client request id.
    id: Value,
    /// Runtime request id (`{session_id}-{n}`).
    request_id: String,
    /// Keep-alive progress token.
    progress_token: Value,
    /// Resolved operation.
    descriptor: OperationDescriptor,
    /// Tool arguments.
    input: Value,
    /// Shared outcome.
    slot: Arc<Mutex<CallSlot>>,
    /// Outbound queue.
    outbound: mpsc::Sender<JsonRpcMessage>,
    /// Shared gateway wiring.
    gateway: InboundGateway,
    /// Owning session.
    session_id: String,
}

impl CallTask {
    /// Starts the operation and awaits it through as many rounds as needed.
    async fn run(self) {
        let started_at = Instant::now();
        let token = match self
            .gateway
            .invoker
            .start_descriptor(&self.descriptor, self.input.clone(), Some(self.request_id.clone()))
            .await
        {
            Ok(token) => token,
            Err(err) => {
                if self.claim_start_failure() {
                    self.finish(None, Err(err.to_rpc_error()), started_at).await;
                }
                return;
            }
        };
        if self.record_start(&token) {
            self.gateway.invoker.cancel(&token).await;
            return;
        }
        let mut progress = 0u64;
        loop {
            let (status, failure) =
                match self.gateway.invoker.await_terminal(&token, self.gateway.settings.await_timeout).await {
                    Ok(status) => (status, None),
                    Err(err) => {
                        (OperationStatus::Failed(ErrorDetail::new(err.to_string())), Some(err.to_rpc_error()))
                    }
                };
            match self.observe(&status, &mut progress) {
                Observation::Progressed => {}
                Observation::Terminal => {
                    let reply = failure.map_or_else(|| terminal_reply(&status), Err);
                    self.finish(Some(&token), reply, started_at).await;
                    return;
                }
                Observation::Discarded => return,
            }
        }
    }

    /// Claims the start-failure reply unless the call was canceled first.
    fn claim_start_failure(&self) -> bool {
        let Ok(mut slot) = self.slot.lock() else {
            return false;
        };
        if slot.cancel_requested {
            return false;
        }
        slot.start_failed = true;
        true
    }

    /// Records the started invocation.
    ///
    /// Returns true when a cancel arrived before the start acknowledgment, in
    /// which case the invocation is already marked canceled and the caller
    /// must cancel the operation.
    fn record_start(&self, token: &OperationToken) -> bool {
        let Ok(mut slot) = self.slot.lock() else {
            return true;
        };
        let mut invocation =
            OperationInvocation::new(token.clone(), self.descriptor.tool_name(), self.input.clone());
        let cancel_now = slot.cancel_requested && invocation.request_cancel();
        if cancel_now {
            invocation.observe(&OperationStatus::Canceled);
        }
        slot.invocation = Some(invocation);
        cancel_now
    }

    /// Applies one await round to the invocation and queues a keep-alive for
    /// pending rounds.
    fn observe(&self, status: &OperationStatus, progress: &mut u64) -> Observation {
        let Ok(mut slot) = self.slot.lock() else {
            return Observation::Discarded;
        };
        let Some(invocation) = slot.invocation.as_mut() else {
            return Observation::Discarded;
        };
        let observation = invocation.observe(status);
        if observation == Observation::Progressed && self.gateway.settings.progress_keepalive {
            *progress += 1;
            let _ = self.outbound.try_send(progress_notification(self.progress_token.clone(), *progress));
        }
        observation
    }

    /// Emits the call's single reply with its metrics and audit record.
    async fn finish(
        &self,
        token: Option<&OperationToken>,
        reply: Result<Value, JsonRpcError>,
        started_at: Instant,
    ) {
        let tool = self.descriptor.tool_name();
        let (outcome, error) = match &reply {
            Ok(_) => (GatewayOutcome::Ok, None),
            Err(error) if error.bridge_kind() == Some(BridgeErrorKind::OperationCanceled) => {
                (GatewayOutcome::Canceled, Some(error))
            }
            Err(error) => (GatewayOutcome::Error, Some(error)),
        };
        let event = metric_event(&self.session_id, GatewayMethod::ToolsCall, Some(tool.clone()), outcome, error);
        self.gateway.metrics.record_request(event.clone());
        self.gateway.metrics.record_latency(event, started_at.elapsed());
        let mut audit = AuditEvent::new(AuditEventKind::ToolCall)
            .session(self.session_id.clone())
            .request(self.request_id.clone())
            .tool(tool.as_str())
            .outcome(outcome.as_str());
        if let Some(token) = token {
            audit = audit.token(token);
        }
        if let Some(error) = error {
            audit = audit.detail(error.message.clone());
        }
        self.gateway.audit.record(&audit);
        let message = match reply {
            Ok(result) => JsonRpcMessage::response(self.id.clone(), result),
            Err(error) => JsonRpcMessage::error_response(Some(self.id.clone()), error),
        };
        let _ = self.outbound.send(message).await;
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps a terminal status onto the client-visible reply.
fn terminal_reply(status: &OperationStatus) -> Result<Value, JsonRpcError> {
    match status {
        OperationStatus::Completed(output) => {
            serde_json::to_value(CallToolResult::from_output(output.clone())).map_err(|err| {
                JsonRpcError::bridge(BridgeErrorKind::Serialization, err.to_string())
            })
        }
        OperationStatus::Failed(detail) => {
            Err(InvokerError::OperationFailed(detail.clone()).to_rpc_error())
        }
        OperationStatus::Canceled | OperationStatus::Pending => {
            Err(InvokerError::OperationCanceled.to_rpc_error())
        }
    }
}

/// Builds a metric event.
fn metric_event(
    session_id: &str,
    method: GatewayMethod,
    tool: Option<ToolName>,
    outcome: GatewayOutcome,
    error: Option<&JsonRpcError>,
) -> GatewayMetricEvent {
    GatewayMetricEvent {
        session_id: session_id.to_string(),
        method,
        tool,
        outcome,
        error_code: error.map(|error| error.code),
        error_kind: error.and_then(JsonRpcError::bridge_kind).map(BridgeErrorKind::label),
    }
}

/// Drains the outbound queue into the sink, then closes it.
async fn write_outbound<K>(mut sink: K, mut outbound: mpsc::Receiver<JsonRpcMessage>)
where
    K: MessageSink,
{
    while let Some(message) = outbound.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
