// crates/nexus-mcp-gateway/tests/common/mod.rs
// =============================================================================
// Module: Gateway Test Fixtures
// Description: Scripted runtime, recording sinks, and in-memory test clients.
// Purpose: Drive gateway sessions deterministically in integration tests.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nexus_mcp_core::AuditEvent;
use nexus_mcp_core::AuditEventKind;
use nexus_mcp_core::AuditSink;
use nexus_mcp_core::EndpointRef;
use nexus_mcp_core::HandlerGroup;
use nexus_mcp_core::InvokerOptions;
use nexus_mcp_core::JsonRpcMessage;
use nexus_mcp_core::MemorySink;
use nexus_mcp_core::MemorySource;
use nexus_mcp_core::MessageSink;
use nexus_mcp_core::MessageSource;
use nexus_mcp_core::ModelShape;
use nexus_mcp_core::ObjectShape;
use nexus_mcp_core::OperationInvoker;
use nexus_mcp_core::OperationRegistry;
use nexus_mcp_core::OperationRuntime;
use nexus_mcp_core::OperationSpec;
use nexus_mcp_core::OperationStatus;
use nexus_mcp_core::OperationToken;
use nexus_mcp_core::RuntimeError;
use nexus_mcp_core::ServerInfo;
use nexus_mcp_core::StartRequest;
use nexus_mcp_core::memory_duplex;
use nexus_mcp_gateway::GatewayError;
use nexus_mcp_gateway::GatewayMetricEvent;
use nexus_mcp_gateway::GatewayMetrics;
use nexus_mcp_gateway::GatewaySettings;
use nexus_mcp_gateway::InboundGateway;
use serde_json::Value;
use serde_json::json;
use tokio::task::JoinHandle;

// ============================================================================
// SECTION: Scripted Runtime
// ============================================================================

/// Poll script for one operation.
pub type Script = Vec<Result<OperationStatus, RuntimeError>>;

/// Runtime whose poll answers follow per-operation scripts.
///
/// Each started token gets its own copy of the operation's script. Polls pop
/// from the front; the last entry repeats. Operations without a script stay
/// pending. Cancel pins a token to `Canceled` unless late completion is on,
/// in which case the token keeps answering from its script.
#[derive(Default)]
pub struct ScriptedRuntime {
    scripts: Mutex<HashMap<String, Script>>,
    late_completion: bool,
    start_errors: Mutex<HashMap<String, RuntimeError>>,
    queues: Mutex<HashMap<OperationToken, VecDeque<Result<OperationStatus, RuntimeError>>>>,
    pub starts: Mutex<Vec<StartRequest>>,
    pub polls: Mutex<Vec<OperationToken>>,
    pub cancels: Mutex<Vec<OperationToken>>,
}

impl ScriptedRuntime {
    pub fn script(self, operation: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(operation.to_string(), script);
        self
    }

    pub fn reject(self, operation: &str, error: RuntimeError) -> Self {
        self.start_errors.lock().unwrap().insert(operation.to_string(), error);
        self
    }

    pub fn with_late_completion(mut self) -> Self {
        self.late_completion = true;
        self
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.lock().unwrap().len()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.lock().unwrap().len()
    }
}

#[async_trait]
impl OperationRuntime for ScriptedRuntime {
    async fn start(&self, request: StartRequest) -> Result<OperationToken, RuntimeError> {
        if let Some(error) = self.start_errors.lock().unwrap().get(&request.operation) {
            return Err(error.clone());
        }
        let script = self.scripts.lock().unwrap().get(&request.operation).cloned().unwrap_or_default();
        let mut starts = self.starts.lock().unwrap();
        let token = OperationToken::new(format!("op-{}", starts.len() + 1));
        starts.push(request);
        self.queues.lock().unwrap().insert(token.clone(), script.into_iter().collect());
        Ok(token)
    }

    async fn poll(&self, token: &OperationToken) -> Result<OperationStatus, RuntimeError> {
        self.polls.lock().unwrap().push(token.clone());
        let mut queues = self.queues.lock().unwrap();
        let Some(queue) = queues.get_mut(token) else {
            return Err(RuntimeError::UnknownToken(token.clone()));
        };
        match queue.len() {
            0 => Ok(OperationStatus::Pending),
            1 => queue.front().cloned().unwrap(),
            _ => queue.pop_front().unwrap(),
        }
    }

    async fn cancel(&self, token: &OperationToken) -> Result<(), RuntimeError> {
        self.cancels.lock().unwrap().push(token.clone());
        if self.late_completion {
            return Ok(());
        }
        let mut queues = self.queues.lock().unwrap();
        if let Some(queue) = queues.get_mut(token) {
            queue.clear();
            queue.push_back(Ok(OperationStatus::Canceled));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Recording Sinks
// ============================================================================

#[derive(Default)]
pub struct RecordingAudit {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events.lock().unwrap().iter().map(|event| event.event).collect()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    pub requests: Mutex<Vec<GatewayMetricEvent>>,
    pub latencies: Mutex<Vec<(GatewayMetricEvent, Duration)>>,
}

impl GatewayMetrics for RecordingMetrics {
    fn record_request(&self, event: GatewayMetricEvent) {
        self.requests.lock().unwrap().push(event);
    }

    fn record_latency(&self, event: GatewayMetricEvent, latency: Duration) {
        self.latencies.lock().unwrap().push((event, latency));
    }
}

// ============================================================================
// SECTION: Gateway Fixture
// ============================================================================

pub struct Harness {
    pub runtime: Arc<ScriptedRuntime>,
    pub audit: Arc<RecordingAudit>,
    pub metrics: Arc<RecordingMetrics>,
    pub gateway: InboundGateway,
}

/// Calculator registry: `add` (typed), `debug` (hidden), and untyped
/// operations for scripted scenarios.
pub fn calculator_registry() -> OperationRegistry {
    let add_input: ModelShape =
        ObjectShape::named("AddInput").field("a", ModelShape::Integer).field("b", ModelShape::Integer).into();
    let mut group = HandlerGroup::new("calculator-handler", "calculator")
        .operation(OperationSpec::with_shapes("add", add_input, ModelShape::Integer).described("Add two integers."))
        .operation(OperationSpec::new::<Value, Value>("debug").hidden());
    for name in ["slow", "fast", "wait", "fail", "reject", "answer"] {
        group = group.operation(OperationSpec::new::<Value, Value>(name));
    }
    let mut registry = OperationRegistry::new();
    registry.register(group).unwrap();
    registry
}

pub fn settings(await_timeout_ms: u64, progress_keepalive: bool) -> GatewaySettings {
    GatewaySettings {
        await_timeout: Duration::from_millis(await_timeout_ms),
        progress_keepalive,
        outbound_buffer: 32,
    }
}

pub fn harness(runtime: ScriptedRuntime, settings: GatewaySettings) -> Harness {
    let runtime = Arc::new(runtime);
    let audit = Arc::new(RecordingAudit::default());
    let metrics = Arc::new(RecordingMetrics::default());
    let invoker = OperationInvoker::new(
        runtime.clone(),
        EndpointRef::new("calculator-endpoint", "calculator-queue"),
        InvokerOptions {
            poll_interval: Duration::from_millis(10),
        },
        audit.clone(),
    );
    let gateway = InboundGateway::new(
        Arc::new(calculator_registry()),
        invoker,
        settings,
        ServerInfo {
            name: "calculator-gateway".to_string(),
            version: "1.0.0".to_string(),
        },
    )
    .with_audit(audit.clone())
    .with_metrics(metrics.clone());
    Harness {
        runtime,
        audit,
        metrics,
        gateway,
    }
}

// ============================================================================
// SECTION: Test Client
// ============================================================================

pub struct TestClient {
    pub source: MemorySource,
    pub sink: MemorySink,
    pub server: JoinHandle<Result<(), GatewayError>>,
}

pub fn connect(gateway: &InboundGateway) -> TestClient {
    let (client, server) = memory_duplex(32);
    let gateway = gateway.clone();
    let server = tokio::spawn(async move { gateway.serve(server.source, server.sink).await });
    TestClient {
        source: client.source,
        sink: client.sink,
        server,
    }
}

impl TestClient {
    pub async fn send(&mut self, message: JsonRpcMessage) {
        self.sink.send(message).await.unwrap();
    }

    pub async fn recv(&mut self) -> JsonRpcMessage {
        self.source.receive().await.unwrap().expect("gateway closed the channel")
    }

    pub async fn request(&mut self, message: JsonRpcMessage) -> JsonRpcMessage {
        self.send(message).await;
        self.recv().await
    }

    /// Closes the client side, waits for the session to finish, and returns
    /// whatever the gateway still produced.
    pub async fn close(mut self) -> Vec<JsonRpcMessage> {
        self.sink.close().await.unwrap();
        self.server.await.unwrap().unwrap();
        let mut rest = Vec::new();
        while let Some(message) = self.source.receive().await.unwrap() {
            rest.push(message);
        }
        rest
    }
}

pub fn call(id: Value, name: &str, arguments: Value) -> JsonRpcMessage {
    JsonRpcMessage::request(id, "tools/call", Some(json!({ "name": name, "arguments": arguments })))
}

pub fn cancel(id: Value) -> JsonRpcMessage {
    JsonRpcMessage::notification("notifications/cancelled", Some(json!({ "requestId": id })))
}

/// Waits (in test time) until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(condition(), "condition not reached");
}
