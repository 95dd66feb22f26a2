// crates/nexus-mcp-workflow/src/transport.rs
// ============================================================================
// Module: Workflow Transport
// Description: Duplex MCP channel whose far side is the operation runtime.
// Purpose: Serve workflow-side JSON-RPC requests through operation round trips.
// Dependencies: nexus-mcp-core, nexus-mcp-config, thiserror, tokio
// ============================================================================

//! ## Overview
//! [`WorkflowTransport::connect`] starts one `MCP/Session` pump operation
//! (input `{session_id}`) that stays pending for the life of the session and
//! returns a [`TransportSession`]:
//!
//! - [`TransportWriter`] serves each outbound request as its own task:
//!   `initialize` and `ping` are answered locally, `tools/list` runs
//!   `MCP/ListTools`, `tools/call` resolves the tool against the registry
//!   and runs the visible `service/operation` it names. Each
//!   request produces exactly one inbound message, passed through as many
//!   `await_terminal` rounds as needed. Notifications are dropped.
//! - [`TransportReader`] yields those messages. A completed pump ends the
//!   stream; a failed or canceled pump closes it with
//!   [`ChannelError::TransportClosed`].
//! - [`SessionPump`] cancels the pump exactly once, on explicit release or,
//!   failing that, on drop.
//!
//! Request operations still running when the writer closes or drops are
//! canceled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use nexus_mcp_config::NexusMcpConfig;
use nexus_mcp_config::TransportConfig;
use nexus_mcp_core::AuditEvent;
use nexus_mcp_core::AuditEventKind;
use nexus_mcp_core::AuditSink;
use nexus_mcp_core::BridgeErrorKind;
use nexus_mcp_core::CallToolResult;
use nexus_mcp_core::ChannelError;
use nexus_mcp_core::CorrelationIdGenerator;
use nexus_mcp_core::EndpointRef;
use nexus_mcp_core::InvokerError;
use nexus_mcp_core::InvokerOptions;
use nexus_mcp_core::JsonRpcError;
use nexus_mcp_core::JsonRpcMessage;
use nexus_mcp_core::MessageKind;
use nexus_mcp_core::MessageSink;
use nexus_mcp_core::MessageSource;
use nexus_mcp_core::NoopAuditSink;
use nexus_mcp_core::OperationInvoker;
use nexus_mcp_core::OperationRegistry;
use nexus_mcp_core::OperationRuntime;
use nexus_mcp_core::OperationStatus;
use nexus_mcp_core::OperationToken;
use nexus_mcp_core::RequestSequence;
use nexus_mcp_core::ServerInfo;
use nexus_mcp_core::ToolName;
use nexus_mcp_core::protocol::MCP_SERVICE_NAME;
use nexus_mcp_core::protocol::METHOD_INITIALIZE;
use nexus_mcp_core::protocol::METHOD_PING;
use nexus_mcp_core::protocol::METHOD_TOOLS_CALL;
use nexus_mcp_core::protocol::METHOD_TOOLS_LIST;
use nexus_mcp_core::protocol::OPERATION_LIST_TOOLS;
use nexus_mcp_core::protocol::OPERATION_SESSION;
use nexus_mcp_core::protocol::ToolCallParams;
use nexus_mcp_core::protocol::initialize_result;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Transport tuning derived from `[transport]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Bound on one `await_terminal` round.
    pub await_timeout: Duration,
    /// Inbound message queue depth.
    pub inbound_buffer: usize,
}

impl TransportSettings {
    /// Builds settings from the transport config section.
    #[must_use]
    pub const fn from_config(config: &TransportConfig) -> Self {
        Self {
            await_timeout: config.await_timeout(),
            inbound_buffer: config.inbound_buffer,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            await_timeout: Duration::from_secs(30),
            inbound_buffer: 16,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Workflow transport errors.
///
/// # Invariants
/// - Variants are stable for caller error mapping.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The session pump could not be started.
    #[error("session pump failed to start: {0}")]
    Connect(InvokerError),
    /// Channel failure while serving the session.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Entry on the inbound queue.
#[derive(Debug)]
enum Inbound {
    /// Reply to an outbound request.
    Message(JsonRpcMessage),
    /// The pump operation reached a terminal state.
    PumpEnded(PumpEnd),
}

/// How the pump operation ended.
#[derive(Debug)]
enum PumpEnd {
    /// Completed; the stream ends cleanly.
    Completed,
    /// Failed, canceled, or unreachable.
    Closed(String),
}

/// Factory for workflow-side MCP sessions bound to one endpoint.
#[derive(Clone)]
pub struct WorkflowTransport {
    /// Operations callable through `tools/call`.
    registry: Arc<OperationRegistry>,
    /// Runtime façade.
    invoker: OperationInvoker,
    /// Transport tuning.
    settings: TransportSettings,
    /// Identity answered from `initialize`.
    server_info: ServerInfo,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Session identifier source.
    session_ids: Arc<CorrelationIdGenerator>,
}

impl WorkflowTransport {
    /// Creates a transport with a no-op audit sink.
    #[must_use]
    pub fn new(
        registry: Arc<OperationRegistry>,
        invoker: OperationInvoker,
        settings: TransportSettings,
        server_info: ServerInfo,
    ) -> Self {
        Self {
            registry,
            invoker,
            settings,
            server_info,
            audit: Arc::new(NoopAuditSink),
            session_ids: Arc::new(CorrelationIdGenerator::new("wf")),
        }
    }

    /// Builds a transport from validated configuration.
    #[must_use]
    pub fn from_config(
        config: &NexusMcpConfig,
        registry: Arc<OperationRegistry>,
        runtime: Arc<dyn OperationRuntime>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let invoker = OperationInvoker::new(
            runtime,
            EndpointRef::new(config.endpoint.name.clone(), config.endpoint.task_queue.clone()),
            InvokerOptions {
                poll_interval: config.transport.poll_interval(),
            },
            Arc::clone(&audit),
        );
        let server_info = ServerInfo {
            name: config.server.name.clone(),
            version: config.server.version.clone(),
        };
        Self::new(registry, invoker, TransportSettings::from_config(&config.transport), server_info)
            .with_audit(audit)
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Returns the transport settings.
    #[must_use]
    pub const fn settings(&self) -> TransportSettings {
        self.settings
    }

    /// Starts a session pump and returns the connected session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the pump operation cannot be
    /// started.
    pub async fn connect(&self) -> Result<TransportSession, TransportError> {
        let session_id = self.session_ids.issue();
        let token = self
            .invoker
            .start(
                MCP_SERVICE_NAME,
                OPERATION_SESSION,
                json!({ "session_id": session_id }),
                Some(session_id.clone()),
            )
            .await
            .map_err(TransportError::Connect)?;
        self.audit.record(
            &AuditEvent::new(AuditEventKind::TransportOpened)
                .session(session_id.clone())
                .token(&token)
                .outcome("ok"),
        );

        let (inbound, inbound_rx) = mpsc::channel(self.settings.inbound_buffer.max(1));
        let ended = Arc::new(AtomicBool::new(false));
        let watcher = tokio::spawn(watch_pump(
            self.invoker.clone(),
            token.clone(),
            self.settings.await_timeout,
            inbound.clone(),
            Arc::clone(&ended),
        ));
        let requests = RequestContext {
            registry: Arc::clone(&self.registry),
            invoker: self.invoker.clone(),
            await_timeout: self.settings.await_timeout,
            sequence: RequestSequence::new(session_id.clone()),
            server_info: self.server_info.clone(),
            audit: Arc::clone(&self.audit),
        };
        Ok(TransportSession {
            reader: TransportReader {
                inbound: inbound_rx,
                closed: None,
                finished: false,
            },
            writer: TransportWriter {
                requests: Arc::new(requests),
                inbound: Some(inbound),
                tasks: JoinSet::new(),
            },
            pump: SessionPump {
                invoker: self.invoker.clone(),
                token,
                session_id,
                audit: Arc::clone(&self.audit),
                released: AtomicBool::new(false),
                ended,
                watcher,
            },
        })
    }

    /// Runs `body` with a connected reader and writer, then releases the
    /// pump whether the body succeeded or failed.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or [`TransportError`] converted into `E`
    /// when the session cannot be connected.
    pub async fn scoped<F, Fut, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(TransportReader, TransportWriter) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransportError>,
    {
        let (reader, writer, pump) = self.connect().await?.into_parts();
        let result = body(reader, writer).await;
        pump.release().await;
        result
    }
}

/// Waits for the pump to reach a terminal state and reports it inbound.
async fn watch_pump(
    invoker: OperationInvoker,
    token: OperationToken,
    await_timeout: Duration,
    inbound: mpsc::Sender<Inbound>,
    ended: Arc<AtomicBool>,
) {
    let end = loop {
        match invoker.await_terminal(&token, await_timeout).await {
            Ok(OperationStatus::Pending) => {}
            Ok(OperationStatus::Completed(_)) => break PumpEnd::Completed,
            Ok(OperationStatus::Failed(detail)) => {
                break PumpEnd::Closed(format!("session pump failed: {detail}"));
            }
            Ok(OperationStatus::Canceled) => break PumpEnd::Closed("session pump canceled".to_string()),
            Err(err) => break PumpEnd::Closed(format!("session pump unreachable: {err}")),
        }
    };
    ended.store(true, Ordering::SeqCst);
    let _ = inbound.send(Inbound::PumpEnded(end)).await;
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Connected workflow-side session.
///
/// Usable directly as a duplex channel; closing its outbound half also
/// releases the pump.
pub struct TransportSession {
    /// Inbound half.
    reader: TransportReader,
    /// Outbound half.
    writer: TransportWriter,
    /// Pump handle.
    pump: SessionPump,
}

impl TransportSession {
    /// Returns the session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.pump.session_id()
    }

    /// Returns the pump handle.
    #[must_use]
    pub const fn pump(&self) -> &SessionPump {
        &self.pump
    }

    /// Splits the session into its halves and pump.
    #[must_use]
    pub fn into_parts(self) -> (TransportReader, TransportWriter, SessionPump) {
        (self.reader, self.writer, self.pump)
    }
}

#[async_trait]
impl MessageSource for TransportSession {
    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, ChannelError> {
        self.reader.receive().await
    }
}

#[async_trait]
impl MessageSink for TransportSession {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), ChannelError> {
        self.writer.send(message).await
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.writer.close().await?;
        self.pump.release().await;
        Ok(())
    }
}

// ============================================================================
// SECTION: Pump
// ============================================================================

/// Handle on the session's `MCP/Session` operation.
///
/// # Invariants
/// - The pump is released at most once; release cancels it unless it has
///   already ended.
pub struct SessionPump {
    /// Runtime façade.
    invoker: OperationInvoker,
    /// Pump operation token.
    token: OperationToken,
    /// Session identifier.
    session_id: String,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Set once the pump has been released.
    released: AtomicBool,
    /// Set by the watcher once the pump is terminal.
    ended: Arc<AtomicBool>,
    /// Pump watcher task.
    watcher: JoinHandle<()>,
}

impl SessionPump {
    /// Returns the session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the pump operation token.
    #[must_use]
    pub const fn token(&self) -> &OperationToken {
        &self.token
    }

    /// Returns true once the pump has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stops watching the pump and cancels it unless it already ended.
    ///
    /// Returns true only for the call that performed the release.
    pub async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.watcher.abort();
        let outcome = if self.ended.load(Ordering::SeqCst) {
            "ended"
        } else if self.invoker.cancel(&self.token).await {
            "canceled"
        } else {
            "cancel_ignored"
        };
        self.audit.record(
            &AuditEvent::new(AuditEventKind::TransportClosed)
                .session(self.session_id.clone())
                .token(&self.token)
                .outcome(outcome),
        );
        true
    }
}

impl Drop for SessionPump {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watcher.abort();
        if !self.ended.load(Ordering::SeqCst)
            && let Ok(handle) = Handle::try_current()
        {
            let invoker = self.invoker.clone();
            let token = self.token.clone();
            handle.spawn(async move {
                invoker.cancel(&token).await;
            });
        }
        self.audit.record(
            &AuditEvent::new(AuditEventKind::TransportClosed)
                .session(self.session_id.clone())
                .token(&self.token)
                .outcome("dropped"),
        );
    }
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Inbound half of a workflow-side session.
pub struct TransportReader {
    /// Replies and pump termination.
    inbound: mpsc::Receiver<Inbound>,
    /// Set once the pump closed abnormally.
    closed: Option<String>,
    /// Set once the stream ended cleanly.
    finished: bool,
}

#[async_trait]
impl MessageSource for TransportReader {
    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, ChannelError> {
        if let Some(reason) = &self.closed {
            return Err(ChannelError::TransportClosed(reason.clone()));
        }
        if self.finished {
            return Ok(None);
        }
        match self.inbound.recv().await {
            Some(Inbound::Message(message)) => Ok(Some(message)),
            Some(Inbound::PumpEnded(PumpEnd::Completed)) | None => {
                self.finished = true;
                Ok(None)
            }
            Some(Inbound::PumpEnded(PumpEnd::Closed(reason))) => {
                self.closed = Some(reason.clone());
                Err(ChannelError::TransportClosed(reason))
            }
        }
    }
}

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Outbound half of a workflow-side session.
pub struct TransportWriter {
    /// Shared request-serving state.
    requests: Arc<RequestContext>,
    /// Inbound queue; `None` once closed.
    inbound: Option<mpsc::Sender<Inbound>>,
    /// In-flight request tasks.
    tasks: JoinSet<()>,
}

impl TransportWriter {
    /// Returns the number of requests still being served.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

#[async_trait]
impl MessageSink for TransportWriter {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), ChannelError> {
        let Some(inbound) = self.inbound.as_ref() else {
            return Err(ChannelError::TransportClosed("transport writer closed".to_string()));
        };
        while self.tasks.try_join_next().is_some() {}
        match message.kind() {
            MessageKind::Request => {
                let requests = Arc::clone(&self.requests);
                let inbound = inbound.clone();
                self.tasks.spawn(async move {
                    let reply = requests.serve(message).await;
                    let _ = inbound.send(Inbound::Message(reply)).await;
                });
                Ok(())
            }
            MessageKind::Notification | MessageKind::Response => Ok(()),
            MessageKind::Invalid => {
                Err(ChannelError::Malformed("invalid JSON-RPC envelope".to_string()))
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.inbound = None;
        self.tasks.abort_all();
        Ok(())
    }
}

/// State shared by request tasks of one session.
struct RequestContext {
    /// Operations callable through `tools/call`.
    registry: Arc<OperationRegistry>,
    /// Runtime façade.
    invoker: OperationInvoker,
    /// Bound on one `await_terminal` round.
    await_timeout: Duration,
    /// Per-session request ids.
    sequence: RequestSequence,
    /// Identity answered from `initialize`.
    server_info: ServerInfo,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
}

impl RequestContext {
    /// Serves one request and returns its reply.
    async fn serve(&self, message: JsonRpcMessage) -> JsonRpcMessage {
        let id = message.id.clone().unwrap_or(Value::Null);
        let request_id = self.sequence.issue();
        let method = message.method().unwrap_or_default().to_string();
        let (tool, reply) = match method.as_str() {
            METHOD_INITIALIZE => (None, Ok(initialize_result(&self.server_info))),
            METHOD_PING => (None, Ok(json!({}))),
            METHOD_TOOLS_LIST => (None, self.list_tools(&request_id).await),
            METHOD_TOOLS_CALL => self.call_tool(message.params, &request_id).await,
            other => (
                None,
                Err(JsonRpcError::bridge(
                    BridgeErrorKind::MethodNotFound,
                    format!("method not found: {other}"),
                )),
            ),
        };
        let mut event = AuditEvent::new(AuditEventKind::TransportRequest)
            .session(self.sequence.session_id())
            .request(request_id)
            .outcome(if reply.is_ok() { "ok" } else { "error" });
        if let Some(tool) = &tool {
            event = event.tool(tool.as_str());
        }
        if let Err(error) = &reply {
            event = event.detail(error.message.clone());
        }
        self.audit.record(&event);
        match reply {
            Ok(result) => JsonRpcMessage::response(id, result),
            Err(error) => JsonRpcMessage::error_response(Some(id), error),
        }
    }

    /// Runs `MCP/ListTools` and wraps the catalog as a `tools/list` result.
    async fn list_tools(&self, request_id: &str) -> Result<Value, JsonRpcError> {
        let tools = self
            .run_operation(MCP_SERVICE_NAME, OPERATION_LIST_TOOLS, Value::Null, request_id)
            .await
            .map_err(|err| err.to_rpc_error())?;
        Ok(json!({ "tools": tools }))
    }

    /// Runs the visible operation named by a `tools/call`.
    ///
    /// Hidden, reserved, and unknown names answer `ToolNotFound` without
    /// touching the runtime.
    async fn call_tool(
        &self,
        params: Option<Value>,
        request_id: &str,
    ) -> (Option<ToolName>, Result<Value, JsonRpcError>) {
        let params = match params.map(serde_json::from_value::<ToolCallParams>) {
            Some(Ok(params)) => params,
            Some(Err(err)) => {
                return (None, Err(JsonRpcError::bridge(BridgeErrorKind::InvalidParams, err.to_string())));
            }
            None => {
                return (
                    None,
                    Err(JsonRpcError::bridge(BridgeErrorKind::InvalidParams, "missing tools/call params")),
                );
            }
        };
        let tool = match self.registry.resolve(&params.name) {
            Ok(descriptor) => descriptor.tool_name(),
            Err(err) => {
                return (None, Err(JsonRpcError::bridge(BridgeErrorKind::ToolNotFound, err.to_string())));
            }
        };
        let input = params.arguments.unwrap_or_else(|| json!({}));
        let reply = self
            .run_operation(tool.service(), tool.operation(), input, request_id)
            .await
            .map_err(|err| err.to_rpc_error())
            .and_then(|output| {
                serde_json::to_value(CallToolResult::from_output(output)).map_err(|err| {
                    JsonRpcError::bridge(BridgeErrorKind::Serialization, err.to_string())
                })
            });
        (Some(tool), reply)
    }

    /// Starts an operation and awaits it through as many rounds as needed.
    async fn run_operation(
        &self,
        service: &str,
        operation: &str,
        input: Value,
        request_id: &str,
    ) -> Result<Value, InvokerError> {
        let token =
            self.invoker.start(service, operation, input, Some(request_id.to_string())).await?;
        let mut guard = CancelOnDrop {
            invoker: self.invoker.clone(),
            token: Some(token.clone()),
        };
        let status = loop {
            match self.invoker.await_terminal(&token, self.await_timeout).await? {
                OperationStatus::Pending => {}
                status => break status,
            }
        };
        guard.disarm();
        match status {
            OperationStatus::Completed(output) => Ok(output),
            OperationStatus::Failed(detail) => Err(InvokerError::OperationFailed(detail)),
            OperationStatus::Canceled => Err(InvokerError::OperationCanceled),
            OperationStatus::Pending => Err(InvokerError::OperationPending),
        }
    }
}

/// Cancels a started operation unless disarmed after a terminal status.
struct CancelOnDrop {
    /// Runtime façade.
    invoker: OperationInvoker,
    /// Token to cancel; `None` once disarmed.
    token: Option<OperationToken>,
}

impl CancelOnDrop {
    /// Leaves the operation alone on drop.
    fn disarm(&mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.token.take()
            && let Ok(handle) = Handle::try_current()
        {
            let invoker = self.invoker.clone();
            handle.spawn(async move {
                invoker.cancel(&token).await;
            });
        }
    }
}
