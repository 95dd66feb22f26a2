// crates/nexus-mcp-workflow/tests/common/mod.rs
// =============================================================================
// Module: Workflow Test Fixtures
// Description: Calculator registry, in-memory runtime, and wired transports.
// Purpose: Run workflow-side sessions against the real MCP service handler.
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

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use nexus_mcp_core::AuditEvent;
use nexus_mcp_core::AuditEventKind;
use nexus_mcp_core::AuditSink;
use nexus_mcp_core::EndpointRef;
use nexus_mcp_core::ErrorDetail;
use nexus_mcp_core::HandlerGroup;
use nexus_mcp_core::InMemoryOperationRuntime;
use nexus_mcp_core::InvokerOptions;
use nexus_mcp_core::ModelShape;
use nexus_mcp_core::ObjectShape;
use nexus_mcp_core::OperationContext;
use nexus_mcp_core::OperationInvoker;
use nexus_mcp_core::OperationRegistry;
use nexus_mcp_core::OperationSpec;
use nexus_mcp_core::ServerInfo;
use nexus_mcp_core::handler_fn;
use nexus_mcp_gateway::GatewaySettings;
use nexus_mcp_gateway::InboundGateway;
use nexus_mcp_gateway::McpServiceHandler;
use nexus_mcp_gateway::mcp_handler_group;
use nexus_mcp_workflow::TransportSettings;
use nexus_mcp_workflow::WorkflowTransport;
use serde_json::Value;
use serde_json::json;

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

pub struct Fixture {
    pub registry: Arc<OperationRegistry>,
    pub runtime: Arc<InMemoryOperationRuntime>,
    pub service: McpServiceHandler,
    pub audit: Arc<RecordingAudit>,
}

pub fn calculator_registry() -> OperationRegistry {
    let add_input: ModelShape =
        ObjectShape::named("AddInput").field("a", ModelShape::Integer).field("b", ModelShape::Integer).into();
    let mut registry = OperationRegistry::new();
    registry
        .register(
            HandlerGroup::new("calculator-handler", "calculator")
                .operation(OperationSpec::with_shapes("add", add_input, ModelShape::Integer).described("Add two integers."))
                .operation(OperationSpec::new::<Value, Value>("divide"))
                .operation(OperationSpec::new::<Value, Value>("debug").hidden()),
        )
        .unwrap();
    registry.register(mcp_handler_group()).unwrap();
    registry
}

pub fn fixture() -> Fixture {
    let registry = Arc::new(calculator_registry());
    let service = McpServiceHandler::new(Arc::clone(&registry));
    let mut runtime = InMemoryOperationRuntime::new()
        .with_handler(
            "calculator",
            "add",
            handler_fn(|_context: OperationContext, input: Value| async move {
                let a = input["a"].as_i64().unwrap_or_default();
                let b = input["b"].as_i64().unwrap_or_default();
                Ok(json!(a + b))
            }),
        )
        .with_handler(
            "calculator",
            "divide",
            handler_fn(|_context: OperationContext, input: Value| async move {
                let a = input["a"].as_i64().unwrap_or_default();
                match input["b"].as_i64().unwrap_or_default() {
                    0 => Err(ErrorDetail::new("division by zero").with_failure_type("ArithmeticError")),
                    b => Ok(json!(a / b)),
                }
            }),
        )
        .with_handler(
            "calculator",
            "debug",
            handler_fn(|_context: OperationContext, _input: Value| async move { Ok(json!("debug state")) }),
        );
    service.install(&mut runtime);
    Fixture {
        registry,
        runtime: Arc::new(runtime),
        service,
        audit: Arc::new(RecordingAudit::default()),
    }
}

pub fn invoker(fixture: &Fixture) -> OperationInvoker {
    OperationInvoker::new(
        fixture.runtime.clone(),
        EndpointRef::new("calculator-endpoint", "calculator-queue"),
        InvokerOptions {
            poll_interval: Duration::from_millis(5),
        },
        fixture.audit.clone(),
    )
}

pub fn transport(fixture: &Fixture) -> WorkflowTransport {
    WorkflowTransport::new(
        Arc::clone(&fixture.registry),
        invoker(fixture),
        TransportSettings {
            await_timeout: Duration::from_millis(20),
            inbound_buffer: 8,
        },
        ServerInfo {
            name: "calculator-workflow".to_string(),
            version: "1.0.0".to_string(),
        },
    )
    .with_audit(fixture.audit.clone())
}

pub fn gateway(fixture: &Fixture) -> InboundGateway {
    InboundGateway::new(
        Arc::clone(&fixture.registry),
        invoker(fixture),
        GatewaySettings {
            await_timeout: Duration::from_millis(20),
            progress_keepalive: true,
            outbound_buffer: 16,
        },
        ServerInfo {
            name: "calculator-gateway".to_string(),
            version: "1.0.0".to_string(),
        },
    )
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(condition(), "condition not reached");
}
