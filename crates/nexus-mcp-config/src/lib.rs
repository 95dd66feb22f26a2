// crates/nexus-mcp-config/src/lib.rs
// ============================================================================
// Module: Nexus MCP Config Library
// Description: Canonical config model and validation for the MCP bridge.
// Purpose: Single source of truth for nexus-mcp.toml semantics.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! `nexus-mcp-config` defines the configuration model shared by the inbound
//! gateway and the workflow-side transport: runtime endpoint addressing,
//! polling cadence, keep-alive behavior, frame limits, server identity, and
//! audit sink selection. Loading is fail-closed: size limits, path limits,
//! and range checks run before any value is used.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
