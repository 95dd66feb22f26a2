// crates/nexus-mcp-core/src/registry.rs
// ============================================================================
// Module: Operation Registry
// Description: Catalog of invocable operations exposed as MCP tools.
// Purpose: Register handler groups, filter visibility, and resolve tool names.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The operation registry collects [`OperationSpec`] entries from handler
//! groups, derives their schemas once, and answers discovery
//! ([`OperationRegistry::snapshot_catalog`]) and dispatch
//! ([`OperationRegistry::resolve`]) queries.
//!
//! Tool names are `"{service}/{operation}"`. Operation names are unique per
//! service across every group, so the same operation name may appear under
//! different services.
//!
//! Registration takes `&mut self`; once the registry is wrapped in an `Arc`
//! and shared with sessions it can no longer change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::schema::Model;
use crate::schema::ModelShape;
use crate::schema::SchemaError;
use crate::schema::derive_schema;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Separator between service and operation in tool names.
pub const TOOL_NAME_SEPARATOR: char = '/';

/// Marker ending a client-added tool name prefix (e.g. `server__svc/op`).
pub const CLIENT_PREFIX_MARKER: &str = "__";

// ============================================================================
// SECTION: Names
// ============================================================================

/// Fully qualified tool name (`service/operation`).
///
/// # Invariants
/// - Contains exactly one `/`, separating non-empty service and operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolName(String);

impl ToolName {
    /// Builds a tool name from its parts.
    #[must_use]
    pub fn new(service: &str, operation: &str) -> Self {
        Self(format!("{service}{TOOL_NAME_SEPARATOR}{operation}"))
    }

    /// Parses a raw tool name, stripping any client prefix first.
    ///
    /// Returns `None` when the name is not `service/operation` shaped.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (service, operation) = split_tool_name(strip_client_prefix(raw))?;
        Some(Self::new(service, operation))
    }

    /// Returns the tool name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the service component.
    #[must_use]
    pub fn service(&self) -> &str {
        self.0.split_once(TOOL_NAME_SEPARATOR).map_or("", |(service, _)| service)
    }

    /// Returns the operation component.
    #[must_use]
    pub fn operation(&self) -> &str {
        self.0.split_once(TOOL_NAME_SEPARATOR).map_or("", |(_, operation)| operation)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Removes an MCP client prefix ending in `__`, if present.
#[must_use]
pub fn strip_client_prefix(raw: &str) -> &str {
    raw.rfind(CLIENT_PREFIX_MARKER).map_or(raw, |index| &raw[index + CLIENT_PREFIX_MARKER.len()..])
}

/// Splits `service/operation` into its non-empty parts.
#[must_use]
pub fn split_tool_name(name: &str) -> Option<(&str, &str)> {
    let (service, operation) = name.split_once(TOOL_NAME_SEPARATOR)?;
    if service.is_empty() || operation.is_empty() || operation.contains(TOOL_NAME_SEPARATOR) {
        return None;
    }
    Some((service, operation))
}

/// Reference to a registered operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationRef {
    /// Service name.
    pub service: String,
    /// Operation name within the service.
    pub operation: String,
}

impl OperationRef {
    /// Creates a new operation reference.
    #[must_use]
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
        }
    }

    /// Returns the tool name for this reference.
    #[must_use]
    pub fn tool_name(&self) -> ToolName {
        ToolName::new(&self.service, &self.operation)
    }
}

// ============================================================================
// SECTION: Registration Inputs
// ============================================================================

/// Declaration of one operation offered by a handler group.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSpec {
    /// Operation name, unique within its service.
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Input model shape.
    pub input: ModelShape,
    /// Output model shape.
    pub output: ModelShape,
    /// Whether the operation is listed and callable as a tool.
    pub visible: bool,
}

impl OperationSpec {
    /// Declares an operation with typed input and output models.
    #[must_use]
    pub fn new<I: Model, O: Model>(name: impl Into<String>) -> Self {
        Self::with_shapes(name, I::shape(), O::shape())
    }

    /// Declares an operation with explicit shapes.
    #[must_use]
    pub fn with_shapes(name: impl Into<String>, input: ModelShape, output: ModelShape) -> Self {
        Self {
            name: name.into(),
            description: None,
            input,
            output,
            visible: true,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the operation as not exposed to tool clients.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// A set of operations registered together under one service.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerGroup {
    /// Group identifier, unique within a registry.
    pub id: String,
    /// Service namespace for every operation in the group.
    pub service: String,
    /// Declared operations.
    pub operations: Vec<OperationSpec>,
}

impl HandlerGroup {
    /// Creates an empty handler group.
    #[must_use]
    pub fn new(id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            operations: Vec::new(),
        }
    }

    /// Adds an operation to the group.
    #[must_use]
    pub fn operation(mut self, spec: OperationSpec) -> Self {
        self.operations.push(spec);
        self
    }
}

// ============================================================================
// SECTION: Descriptors
// ============================================================================

/// Registered operation with derived schemas.
///
/// # Invariants
/// - Immutable after registration; only `visible` may be cleared by
///   [`OperationRegistry::exclude`] before the registry is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    /// Operation name.
    pub name: String,
    /// Owning service name.
    pub service: String,
    /// Optional description.
    pub description: Option<String>,
    /// JSON Schema for the operation input.
    pub input_schema: Value,
    /// JSON Schema for the operation output.
    pub output_schema: Value,
    /// Whether the operation is exposed to tool clients.
    pub visible: bool,
}

impl OperationDescriptor {
    /// Returns the fully qualified tool name.
    #[must_use]
    pub fn tool_name(&self) -> ToolName {
        ToolName::new(&self.service, &self.name)
    }

    /// Returns the reference for this descriptor.
    #[must_use]
    pub fn operation_ref(&self) -> OperationRef {
        OperationRef::new(&self.service, &self.name)
    }

    /// Builds the catalog entry for this descriptor.
    #[must_use]
    pub fn catalog_entry(&self) -> ToolCatalogEntry {
        ToolCatalogEntry {
            name: self.tool_name(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Tool entry returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCatalogEntry {
    /// Tool name.
    pub name: ToolName,
    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for tool input.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registration failures. Any of these aborts startup.
///
/// # Invariants
/// - Variants are stable for startup error reporting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A group with the same identifier is already registered.
    #[error("duplicate handler group: {group_id}")]
    DuplicateGroup {
        /// Conflicting group identifier.
        group_id: String,
    },
    /// An operation name collides within a service namespace.
    #[error("duplicate operation name: {service}/{operation}")]
    DuplicateOperationName {
        /// Service namespace.
        service: String,
        /// Conflicting operation name.
        operation: String,
    },
    /// Service name is empty or contains `/` or `__`.
    #[error("invalid service name: {service:?}")]
    InvalidServiceName {
        /// Rejected service name.
        service: String,
    },
    /// Operation name is empty or contains `/` or `__`.
    #[error("invalid operation name: {operation:?}")]
    InvalidOperationName {
        /// Rejected operation name.
        operation: String,
    },
    /// Referenced operation is not registered.
    #[error("unknown operation: {service}/{operation}")]
    UnknownOperation {
        /// Service namespace.
        service: String,
        /// Operation name.
        operation: String,
    },
    /// Schema derivation failed for an operation.
    #[error("schema derivation failed for {service}/{operation}: {source}")]
    Schema {
        /// Service namespace.
        service: String,
        /// Operation name.
        operation: String,
        /// Underlying derivation error.
        #[source]
        source: SchemaError,
    },
}

/// Dispatch failures when resolving a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No visible operation matches the requested tool name.
    #[error("tool not found: {name}")]
    ToolNotFound {
        /// Requested tool name as received.
        name: String,
    },
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry of operations keyed by tool name.
///
/// # Invariants
/// - Every descriptor key equals `descriptor.tool_name()`.
/// - Group identifiers are unique.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    /// Registered group identifiers mapped to their service.
    groups: BTreeMap<String, String>,
    /// Descriptors keyed by tool name (sorted).
    descriptors: BTreeMap<ToolName, OperationDescriptor>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler group.
    ///
    /// # Errors
    ///
    /// See [`OperationRegistry::register_group`].
    pub fn register(&mut self, group: HandlerGroup) -> Result<(), RegistrationError> {
        self.register_group(group.id, group.service, group.operations)
    }

    /// Registers the operations of one handler group under `service`.
    ///
    /// Registration is all-or-nothing: on error the registry is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateGroup`] when `group_id` exists,
    /// [`RegistrationError::DuplicateOperationName`] when an operation name
    /// collides within the service, [`RegistrationError::InvalidServiceName`]
    /// or [`RegistrationError::InvalidOperationName`] for malformed names, and
    /// [`RegistrationError::Schema`] when a schema cannot be derived.
    pub fn register_group(
        &mut self,
        group_id: impl Into<String>,
        service: impl Into<String>,
        operations: Vec<OperationSpec>,
    ) -> Result<(), RegistrationError> {
        let group_id = group_id.into();
        let service = service.into();
        if self.groups.contains_key(&group_id) {
            return Err(RegistrationError::DuplicateGroup {
                group_id,
            });
        }
        if !is_valid_name(&service) {
            return Err(RegistrationError::InvalidServiceName {
                service,
            });
        }
        let mut staged = Vec::with_capacity(operations.len());
        let mut seen = BTreeSet::new();
        for spec in operations {
            if !is_valid_name(&spec.name) {
                return Err(RegistrationError::InvalidOperationName {
                    operation: spec.name,
                });
            }
            let tool_name = ToolName::new(&service, &spec.name);
            if self.descriptors.contains_key(&tool_name) || !seen.insert(tool_name.clone()) {
                return Err(RegistrationError::DuplicateOperationName {
                    service,
                    operation: spec.name,
                });
            }
            let descriptor = describe(&service, spec)?;
            staged.push((tool_name, descriptor));
        }
        self.groups.insert(group_id, service);
        self.descriptors.extend(staged);
        Ok(())
    }

    /// Marks a registered operation as not visible.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::UnknownOperation`] when the reference is
    /// not registered.
    pub fn exclude(&mut self, operation: &OperationRef) -> Result<(), RegistrationError> {
        let Some(descriptor) = self.descriptors.get_mut(&operation.tool_name()) else {
            return Err(RegistrationError::UnknownOperation {
                service: operation.service.clone(),
                operation: operation.operation.clone(),
            });
        };
        descriptor.visible = false;
        Ok(())
    }

    /// Returns catalog entries for visible operations, sorted by tool name.
    #[must_use]
    pub fn snapshot_catalog(&self) -> Vec<ToolCatalogEntry> {
        self.descriptors
            .values()
            .filter(|descriptor| descriptor.visible)
            .map(OperationDescriptor::catalog_entry)
            .collect()
    }

    /// Resolves a tool name to a visible operation descriptor.
    ///
    /// A client prefix ending in `__` is stripped before lookup.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ToolNotFound`] when no visible operation
    /// matches.
    pub fn resolve(&self, tool_name: &str) -> Result<&OperationDescriptor, DispatchError> {
        ToolName::parse(tool_name)
            .and_then(|name| self.descriptors.get(&name))
            .filter(|descriptor| descriptor.visible)
            .ok_or_else(|| DispatchError::ToolNotFound {
                name: tool_name.to_string(),
            })
    }

    /// Looks up a descriptor regardless of visibility.
    #[must_use]
    pub fn descriptor(&self, operation: &OperationRef) -> Option<&OperationDescriptor> {
        self.descriptors.get(&operation.tool_name())
    }

    /// Returns the registered group identifiers with their services.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &str)> {
        self.groups.iter().map(|(id, service)| (id.as_str(), service.as_str()))
    }

    /// Returns the number of registered operations, visible or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true when no operations are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns true for non-empty names without `/` or the client prefix marker.
///
/// Names containing `__` could never be resolved once the prefix is stripped.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(TOOL_NAME_SEPARATOR) && !name.contains(CLIENT_PREFIX_MARKER)
}

/// Derives the descriptor for one operation spec.
fn describe(service: &str, spec: OperationSpec) -> Result<OperationDescriptor, RegistrationError> {
    let schema_error = |source| RegistrationError::Schema {
        service: service.to_string(),
        operation: spec.name.clone(),
        source,
    };
    let input_schema = derive_schema(&spec.input).map_err(schema_error)?;
    let output_schema = derive_schema(&spec.output).map_err(schema_error)?;
    Ok(OperationDescriptor {
        name: spec.name,
        service: service.to_string(),
        description: spec.description,
        input_schema,
        output_schema,
        visible: spec.visible,
    })
}
