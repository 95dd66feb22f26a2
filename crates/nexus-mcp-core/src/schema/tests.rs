// crates/nexus-mcp-core/src/schema/tests.rs
// ============================================================================
// Module: Schema Deriver Tests
// Description: Unit tests for model shape to JSON Schema derivation.
// Purpose: Validate $defs hoisting, required fields, and unsupported shapes.
// Dependencies: nexus-mcp-core, serde_json
// ============================================================================

//! ## Overview
//! Validates derived schemas for primitive, nested, and union shapes and that
//! unsupported shapes fail with a located error.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;
use serde_json::json;

use super::Model;
use super::ModelShape;
use super::ObjectShape;
use super::SCHEMA_DIALECT;
use super::SchemaError;
use super::UnionShape;
use super::UnionVariant;
use super::derive_schema;
use super::schema_for;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn add_input() -> ModelShape {
    ObjectShape::named("AddInput")
        .with_description("Operands to add.")
        .field("a", ModelShape::Integer)
        .field("b", ModelShape::Integer)
        .into()
}

fn unsupported_reason(err: &SchemaError) -> &str {
    let SchemaError::UnsupportedModelShape {
        reason, ..
    } = err;
    reason
}

// ============================================================================
// SECTION: Primitive Tests
// ============================================================================

#[test]
fn primitives_map_to_json_types() {
    assert_eq!(schema_for::<String>().unwrap()["type"], "string");
    assert_eq!(schema_for::<u32>().unwrap()["type"], "integer");
    assert_eq!(schema_for::<f64>().unwrap()["type"], "number");
    assert_eq!(schema_for::<bool>().unwrap()["type"], "boolean");
    assert_eq!(schema_for::<()>().unwrap()["type"], "null");
}

#[test]
fn any_is_unconstrained() {
    let schema = schema_for::<Value>().unwrap();
    assert_eq!(schema, json!({ "$schema": SCHEMA_DIALECT }));
}

#[test]
fn containers_nest_item_schemas() {
    let schema = schema_for::<Vec<Option<BTreeMap<String, i64>>>>().unwrap();
    assert_eq!(schema["type"], "array");
    let any_of = schema["items"]["anyOf"].as_array().unwrap();
    assert_eq!(any_of[0]["type"], "object");
    assert_eq!(any_of[0]["additionalProperties"]["type"], "integer");
    assert_eq!(any_of[1]["type"], "null");
}

// ============================================================================
// SECTION: Object Tests
// ============================================================================

#[test]
fn root_object_is_inlined_with_required_fields() {
    let schema = derive_schema(&add_input()).unwrap();
    assert_eq!(schema["$schema"], SCHEMA_DIALECT);
    assert_eq!(schema["title"], "AddInput");
    assert_eq!(schema["description"], "Operands to add.");
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["required"], json!(["a", "b"]));
    assert_eq!(schema["properties"]["a"]["type"], "integer");
    assert!(schema.get("$defs").is_none());
}

#[test]
fn optional_fields_are_not_required() {
    let shape: ModelShape = ObjectShape::anonymous()
        .field("name", ModelShape::String)
        .described_field("nickname", <Option<String>>::shape(), "Display name.")
        .into();
    let schema = derive_schema(&shape).unwrap();
    assert_eq!(schema["required"], json!(["name"]));
    assert_eq!(schema["properties"]["nickname"]["description"], "Display name.");
}

#[test]
fn nested_named_models_are_hoisted_once() {
    let point: ModelShape =
        ObjectShape::named("Point").field("x", ModelShape::Number).field("y", ModelShape::Number).into();
    let shape: ModelShape = ObjectShape::named("Segment")
        .field("start", point.clone())
        .field("end", point)
        .into();
    let schema = derive_schema(&shape).unwrap();
    assert_eq!(schema["properties"]["start"], json!({ "$ref": "#/$defs/Point" }));
    assert_eq!(schema["properties"]["end"], json!({ "$ref": "#/$defs/Point" }));
    let defs = schema["$defs"].as_object().unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs["Point"]["required"], json!(["x", "y"]));
}

#[test]
fn derivation_is_deterministic() {
    let first = serde_json::to_string(&derive_schema(&add_input()).unwrap()).unwrap();
    let second = serde_json::to_string(&derive_schema(&add_input()).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn duplicate_field_names_are_rejected() {
    let shape: ModelShape =
        ObjectShape::anonymous().field("a", ModelShape::Integer).field("a", ModelShape::String).into();
    let err = derive_schema(&shape).unwrap_err();
    assert!(unsupported_reason(&err).contains("duplicate field name `a`"));
}

#[test]
fn conflicting_definitions_are_rejected() {
    let first: ModelShape = ObjectShape::named("Item").field("id", ModelShape::Integer).into();
    let second: ModelShape = ObjectShape::named("Item").field("id", ModelShape::String).into();
    let shape: ModelShape =
        ObjectShape::anonymous().field("left", first).field("right", second).into();
    let err = derive_schema(&shape).unwrap_err();
    assert!(unsupported_reason(&err).contains("conflicting definitions for model `Item`"));
}

#[test]
fn empty_enum_is_rejected() {
    let err = derive_schema(&ModelShape::Enum(Vec::new())).unwrap_err();
    assert_eq!(
        err,
        SchemaError::UnsupportedModelShape {
            path: "/".to_string(),
            reason: "enum has no literals".to_string(),
        }
    );
}

// ============================================================================
// SECTION: Union Tests
// ============================================================================

fn shape_union(discriminant: Option<&str>, variants: Vec<UnionVariant>) -> ModelShape {
    ModelShape::Union(UnionShape {
        name: Some("Shape".to_string()),
        discriminant: discriminant.map(str::to_string),
        variants,
    })
}

#[test]
fn discriminated_union_pins_tag_per_variant() {
    let shape = shape_union(
        Some("kind"),
        vec![
            UnionVariant {
                tag: "circle".to_string(),
                shape: ObjectShape::anonymous().field("radius", ModelShape::Number).into(),
            },
            UnionVariant {
                tag: "square".to_string(),
                shape: ObjectShape::anonymous().field("side", ModelShape::Number).into(),
            },
        ],
    );
    let schema = derive_schema(&shape).unwrap();
    let variants = schema["oneOf"].as_array().unwrap();
    assert_eq!(variants.len(), 2);
    assert_eq!(variants[0]["properties"]["kind"], json!({ "const": "circle" }));
    assert_eq!(variants[0]["required"], json!(["kind", "radius"]));
    assert_eq!(variants[1]["properties"]["kind"], json!({ "const": "square" }));
}

#[test]
fn union_without_discriminant_is_rejected() {
    let shape = shape_union(
        None,
        vec![UnionVariant {
            tag: "circle".to_string(),
            shape: ObjectShape::anonymous().into(),
        }],
    );
    let err = derive_schema(&shape).unwrap_err();
    assert_eq!(unsupported_reason(&err), "union has no discriminant");
}

#[test]
fn empty_union_is_rejected() {
    let err = derive_schema(&shape_union(Some("kind"), Vec::new())).unwrap_err();
    assert_eq!(unsupported_reason(&err), "union has no variants");
}

#[test]
fn non_object_variant_is_rejected() {
    let shape = shape_union(
        Some("kind"),
        vec![UnionVariant {
            tag: "number".to_string(),
            shape: ModelShape::Number,
        }],
    );
    let err = derive_schema(&shape).unwrap_err();
    let SchemaError::UnsupportedModelShape {
        path, reason
    } = err;
    assert_eq!(path, "/oneOf/0");
    assert_eq!(reason, "union variant `number` is not an object");
}

#[test]
fn variant_field_colliding_with_discriminant_is_rejected() {
    let shape = shape_union(
        Some("kind"),
        vec![UnionVariant {
            tag: "circle".to_string(),
            shape: ObjectShape::anonymous().field("kind", ModelShape::String).into(),
        }],
    );
    let err = derive_schema(&shape).unwrap_err();
    assert!(unsupported_reason(&err).contains("duplicate field name `kind`"));
}
