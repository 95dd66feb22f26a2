// crates/nexus-mcp-gateway/src/server.rs
// ============================================================================
// Module: Gateway Server
// Description: Config-driven gateway bootstrap and stdio serving.
// Purpose: Wire config, registry, runtime, audit sink and framing together.
// Dependencies: nexus-mcp-config, nexus-mcp-core, tokio
// ============================================================================

//! ## Overview
//! [`GatewayServer::from_config`] requires a fully built registry, so any
//! registration failure has already aborted startup before a server exists.
//! The server then serves one framed session over stdio or any async byte
//! stream pair.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;

use nexus_mcp_config::AuditConfig;
use nexus_mcp_config::AuditSinkKind;
use nexus_mcp_config::NexusMcpConfig;
use nexus_mcp_core::AuditSink;
use nexus_mcp_core::EndpointRef;
use nexus_mcp_core::FileAuditSink;
use nexus_mcp_core::InvokerOptions;
use nexus_mcp_core::NoopAuditSink;
use nexus_mcp_core::OperationInvoker;
use nexus_mcp_core::OperationRegistry;
use nexus_mcp_core::OperationRuntime;
use nexus_mcp_core::ServerInfo;
use nexus_mcp_core::StderrAuditSink;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

use crate::framing::FramedReader;
use crate::framing::FramedWriter;
use crate::session::GatewayError;
use crate::session::GatewaySettings;
use crate::session::InboundGateway;
use crate::telemetry::GatewayMetrics;

// ============================================================================
// SECTION: Server
// ============================================================================

/// Configured gateway ready to serve framed sessions.
pub struct GatewayServer {
    /// Shared gateway wiring.
    gateway: InboundGateway,
    /// Inbound frame size limit.
    max_body_bytes: usize,
}

impl GatewayServer {
    /// Builds a server from validated configuration and a built registry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Audit`] when the configured audit sink cannot
    /// be opened.
    pub fn from_config(
        config: &NexusMcpConfig,
        registry: Arc<OperationRegistry>,
        runtime: Arc<dyn OperationRuntime>,
    ) -> Result<Self, GatewayError> {
        let audit = build_audit_sink(&config.audit)?;
        let invoker = OperationInvoker::new(
            runtime,
            EndpointRef::new(config.endpoint.name.clone(), config.endpoint.task_queue.clone()),
            InvokerOptions {
                poll_interval: config.gateway.poll_interval(),
            },
            Arc::clone(&audit),
        );
        let server_info = ServerInfo {
            name: config.server.name.clone(),
            version: config.server.version.clone(),
        };
        let gateway = InboundGateway::new(
            registry,
            invoker,
            GatewaySettings::from_config(&config.gateway),
            server_info,
        )
        .with_audit(audit);
        Ok(Self {
            gateway,
            max_body_bytes: config.gateway.max_body_bytes,
        })
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn GatewayMetrics>) -> Self {
        self.gateway = self.gateway.with_metrics(metrics);
        self
    }

    /// Returns the gateway wiring.
    #[must_use]
    pub const fn gateway(&self) -> &InboundGateway {
        &self.gateway
    }

    /// Serves one session over process stdin/stdout.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Channel`] when stdio fails fatally.
    pub async fn serve_stdio(&self) -> Result<(), GatewayError> {
        self.serve_io(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serves one session over a Content-Length framed byte stream pair.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Channel`] when the stream fails fatally.
    pub async fn serve_io<R, W>(&self, reader: R, writer: W) -> Result<(), GatewayError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let source = FramedReader::new(reader, self.max_body_bytes);
        let sink = FramedWriter::new(writer);
        self.gateway.serve(source, sink).await
    }
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Builds the audit sink selected by `[audit]`.
///
/// # Errors
///
/// Returns [`GatewayError::Audit`] when the file sink cannot be opened.
pub fn build_audit_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>, GatewayError> {
    match config.sink {
        AuditSinkKind::Stderr => Ok(Arc::new(StderrAuditSink)),
        AuditSinkKind::None => Ok(Arc::new(NoopAuditSink)),
        AuditSinkKind::File => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| GatewayError::Audit("audit.path is required for file sink".to_string()))?;
            let sink = FileAuditSink::new(Path::new(path.trim()))
                .map_err(|err| GatewayError::Audit(err.to_string()))?;
            Ok(Arc::new(sink))
        }
    }
}
