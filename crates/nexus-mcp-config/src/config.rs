// crates/nexus-mcp-config/src/config.rs
// ============================================================================
// Module: Nexus MCP Configuration
// Description: Configuration loading and validation for the MCP bridge.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section has defaults, so an empty file is a valid configuration.
//! Invalid values fail closed with a message naming the offending field.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "nexus-mcp.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "NEXUS_MCP_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum length of endpoint and server names.
pub const MAX_NAME_LENGTH: usize = 255;

/// Minimum await timeout in milliseconds.
pub const MIN_AWAIT_TIMEOUT_MS: u64 = 100;
/// Maximum await timeout in milliseconds.
pub const MAX_AWAIT_TIMEOUT_MS: u64 = 300_000;
/// Minimum poll interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;
/// Maximum poll interval in milliseconds.
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
/// Minimum frame size limit in bytes.
pub const MIN_MAX_BODY_BYTES: usize = 1024;
/// Maximum frame size limit in bytes.
pub const MAX_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
/// Maximum channel buffer depth.
pub const MAX_BUFFER_DEPTH: usize = 4096;

/// Default endpoint name.
pub const DEFAULT_ENDPOINT_NAME: &str = "mcp-gateway";
/// Default endpoint task queue.
pub const DEFAULT_TASK_QUEUE: &str = "mcp-gateway";
/// Default gateway await timeout in milliseconds.
pub const DEFAULT_GATEWAY_AWAIT_TIMEOUT_MS: u64 = 5_000;
/// Default poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
/// Default frame size limit in bytes.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Default outbound message buffer depth.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;
/// Default transport await timeout in milliseconds.
pub const DEFAULT_TRANSPORT_AWAIT_TIMEOUT_MS: u64 = 30_000;
/// Default transport inbound buffer depth.
pub const DEFAULT_INBOUND_BUFFER: usize = 16;
/// Default server name reported from `initialize`.
pub const DEFAULT_SERVER_NAME: &str = "nexus-mcp-gateway";

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Nexus MCP bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NexusMcpConfig {
    /// Runtime endpoint hosting operation handlers.
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// Inbound gateway behavior.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Workflow-side transport behavior.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Server identity.
    #[serde(default)]
    pub server: ServerConfig,
    /// Audit sink selection.
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Runtime endpoint addressing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Endpoint name.
    #[serde(default = "default_endpoint_name")]
    pub name: String,
    /// Task queue backing the endpoint.
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
}

/// Inbound gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Bound on one `await_terminal` round (milliseconds).
    #[serde(default = "default_gateway_await_timeout_ms")]
    pub await_timeout_ms: u64,
    /// Delay between runtime polls (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Emit `notifications/progress` on every await timeout.
    #[serde(default = "default_true")]
    pub progress_keepalive: bool,
    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Outbound message queue depth per session.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Workflow-side transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Bound on one `await_terminal` round (milliseconds).
    #[serde(default = "default_transport_await_timeout_ms")]
    pub await_timeout_ms: u64,
    /// Delay between runtime polls (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Inbound message queue depth.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
}

/// Server identity reported from `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server name.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Server version.
    #[serde(default = "default_server_version")]
    pub version: String,
}

/// Audit sink selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// Audit log path (JSON lines); required for `file`.
    #[serde(default)]
    pub path: Option<String>,
}

/// Supported audit sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `audit.path`.
    File,
    /// Discard audit events.
    None,
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: default_endpoint_name(),
            task_queue: default_task_queue(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            await_timeout_ms: default_gateway_await_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            progress_keepalive: true,
            max_body_bytes: default_max_body_bytes(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            await_timeout_ms: default_transport_await_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            inbound_buffer: default_inbound_buffer(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Stderr,
            path: None,
        }
    }
}

// ============================================================================
// SECTION: Loading and Validation
// ============================================================================

impl NexusMcpConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path is taken from `path`, then `NEXUS_MCP_CONFIG`, then
    /// `nexus-mcp.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint.validate()?;
        self.gateway.validate()?;
        self.transport.validate()?;
        self.server.validate()?;
        self.audit.validate()?;
        Ok(())
    }
}

impl EndpointConfig {
    /// Validates endpoint addressing.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_name("endpoint.name", &self.name)?;
        validate_name("endpoint.task_queue", &self.task_queue)
    }
}

impl GatewayConfig {
    /// Validates gateway timing and limits.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_timing("gateway", self.await_timeout_ms, self.poll_interval_ms)?;
        if !(MIN_MAX_BODY_BYTES..=MAX_MAX_BODY_BYTES).contains(&self.max_body_bytes) {
            return Err(ConfigError::Invalid(format!(
                "gateway.max_body_bytes must be between {MIN_MAX_BODY_BYTES} and \
                 {MAX_MAX_BODY_BYTES}"
            )));
        }
        validate_buffer("gateway.outbound_buffer", self.outbound_buffer)
    }

    /// Returns the await timeout as a duration.
    #[must_use]
    pub const fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }

    /// Returns the poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl TransportConfig {
    /// Validates transport timing and buffering.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_timing("transport", self.await_timeout_ms, self.poll_interval_ms)?;
        validate_buffer("transport.inbound_buffer", self.inbound_buffer)
    }

    /// Returns the await timeout as a duration.
    #[must_use]
    pub const fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }

    /// Returns the poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ServerConfig {
    /// Validates server identity.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_name("server.name", &self.name)?;
        validate_name("server.version", &self.version)
    }
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("audit.path is required for file sink".to_string()))
            }
            (_, Some(path)) => validate_path_string("audit.path", path),
            (_, None) => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from an explicit argument or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a non-empty, bounded, trimmed name.
fn validate_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if value.trim() != value {
        return Err(ConfigError::Invalid(format!("{field} must be trimmed")));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds {MAX_NAME_LENGTH} characters")));
    }
    Ok(())
}

/// Validates await timeout and poll interval ranges and their ordering.
fn validate_timing(
    section: &str,
    await_timeout_ms: u64,
    poll_interval_ms: u64,
) -> Result<(), ConfigError> {
    if !(MIN_AWAIT_TIMEOUT_MS..=MAX_AWAIT_TIMEOUT_MS).contains(&await_timeout_ms) {
        return Err(ConfigError::Invalid(format!(
            "{section}.await_timeout_ms must be between {MIN_AWAIT_TIMEOUT_MS} and \
             {MAX_AWAIT_TIMEOUT_MS}"
        )));
    }
    if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&poll_interval_ms) {
        return Err(ConfigError::Invalid(format!(
            "{section}.poll_interval_ms must be between {MIN_POLL_INTERVAL_MS} and \
             {MAX_POLL_INTERVAL_MS}"
        )));
    }
    if poll_interval_ms > await_timeout_ms {
        return Err(ConfigError::Invalid(format!(
            "{section}.poll_interval_ms must not exceed {section}.await_timeout_ms"
        )));
    }
    Ok(())
}

/// Validates a channel buffer depth.
fn validate_buffer(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_BUFFER_DEPTH {
        return Err(ConfigError::Invalid(format!("{field} must be between 1 and {MAX_BUFFER_DEPTH}")));
    }
    Ok(())
}

/// Default endpoint name.
fn default_endpoint_name() -> String {
    DEFAULT_ENDPOINT_NAME.to_string()
}

/// Default endpoint task queue.
fn default_task_queue() -> String {
    DEFAULT_TASK_QUEUE.to_string()
}

/// Default gateway await timeout.
const fn default_gateway_await_timeout_ms() -> u64 {
    DEFAULT_GATEWAY_AWAIT_TIMEOUT_MS
}

/// Default poll interval.
const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Default `true` for opt-out flags.
const fn default_true() -> bool {
    true
}

/// Default frame size limit.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Default outbound buffer depth.
const fn default_outbound_buffer() -> usize {
    DEFAULT_OUTBOUND_BUFFER
}

/// Default transport await timeout.
const fn default_transport_await_timeout_ms() -> u64 {
    DEFAULT_TRANSPORT_AWAIT_TIMEOUT_MS
}

/// Default inbound buffer depth.
const fn default_inbound_buffer() -> usize {
    DEFAULT_INBOUND_BUFFER
}

/// Default server name.
fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

/// Default server version (this crate's version).
fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
