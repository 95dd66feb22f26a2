// crates/nexus-mcp-core/src/schema.rs
// ============================================================================
// Module: Schema Deriver
// Description: Converts typed model shapes into JSON Schema documents.
// Purpose: Produce deterministic tool input/output schemas for the catalog.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! Operations describe their input and output with a [`ModelShape`]. The
//! deriver turns a shape into a draft 2020-12 JSON Schema document. Named
//! object models nested below the root are hoisted into `$defs` and
//! referenced with `$ref`, so a model reused in several places is emitted
//! once.
//!
//! Derivation is pure: the same shape always yields byte-identical output.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// JSON Schema dialect emitted at the root of derived documents.
pub const SCHEMA_DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

// ============================================================================
// SECTION: Shapes
// ============================================================================

/// Structural description of a model used for schema derivation.
///
/// # Invariants
/// - Object field names are unique within one object.
/// - Unions carry a discriminant and at least one object variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelShape {
    /// UTF-8 string.
    String,
    /// Signed or unsigned integer.
    Integer,
    /// Floating-point number.
    Number,
    /// Boolean.
    Boolean,
    /// JSON null (unit).
    Null,
    /// Unconstrained JSON value.
    Any,
    /// Value that may be absent or null.
    Optional(Box<ModelShape>),
    /// Homogeneous sequence.
    Sequence(Box<ModelShape>),
    /// Map with string keys.
    Map(Box<ModelShape>),
    /// Enumerated string literals.
    Enum(Vec<String>),
    /// Object with named fields.
    Object(ObjectShape),
    /// Discriminated union of object variants.
    Union(UnionShape),
}

/// Object model description.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectShape {
    /// Model name; named objects below the root are emitted under `$defs`.
    pub name: Option<String>,
    /// Optional model description.
    pub description: Option<String>,
    /// Ordered field list.
    pub fields: Vec<FieldShape>,
}

/// Field of an object model.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldShape {
    /// Field name as serialized.
    pub name: String,
    /// Field value shape. [`ModelShape::Optional`] fields are not required.
    pub shape: ModelShape,
    /// Optional field description.
    pub description: Option<String>,
}

/// Discriminated union description.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionShape {
    /// Union name used as the schema title.
    pub name: Option<String>,
    /// Discriminant property name shared by every variant.
    pub discriminant: Option<String>,
    /// Tagged variants.
    pub variants: Vec<UnionVariant>,
}

/// One tagged union variant.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionVariant {
    /// Discriminant value selecting this variant.
    pub tag: String,
    /// Variant payload shape; must be an object.
    pub shape: ModelShape,
}

impl ObjectShape {
    /// Creates an empty named object shape.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
            fields: Vec::new(),
        }
    }

    /// Creates an empty anonymous object shape.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            name: None,
            description: None,
            fields: Vec::new(),
        }
    }

    /// Sets the model description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, shape: ModelShape) -> Self {
        self.fields.push(FieldShape {
            name: name.into(),
            shape,
            description: None,
        });
        self
    }

    /// Appends a field with a description.
    #[must_use]
    pub fn described_field(
        mut self,
        name: impl Into<String>,
        shape: ModelShape,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldShape {
            name: name.into(),
            shape,
            description: Some(description.into()),
        });
        self
    }
}

impl From<ObjectShape> for ModelShape {
    fn from(value: ObjectShape) -> Self {
        Self::Object(value)
    }
}

// ============================================================================
// SECTION: Model Trait
// ============================================================================

/// Types that can describe their own serialized shape.
pub trait Model {
    /// Returns the shape of the serialized form of `Self`.
    fn shape() -> ModelShape;
}

/// Implements [`Model`] for a list of types sharing one shape.
macro_rules! impl_model {
    ($shape:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl Model for $ty {
                fn shape() -> ModelShape {
                    $shape
                }
            }
        )+
    };
}

impl_model!(ModelShape::String => String, str, char);
impl_model!(ModelShape::Integer => i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);
impl_model!(ModelShape::Number => f32, f64);
impl_model!(ModelShape::Boolean => bool);
impl_model!(ModelShape::Null => ());
impl_model!(ModelShape::Any => Value);

impl<T: Model> Model for Option<T> {
    fn shape() -> ModelShape {
        ModelShape::Optional(Box::new(T::shape()))
    }
}

impl<T: Model> Model for Vec<T> {
    fn shape() -> ModelShape {
        ModelShape::Sequence(Box::new(T::shape()))
    }
}

impl<T: Model> Model for BTreeMap<String, T> {
    fn shape() -> ModelShape {
        ModelShape::Map(Box::new(T::shape()))
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Schema derivation errors.
///
/// # Invariants
/// - Variants are stable for registration error reporting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The shape cannot be expressed as a schema.
    #[error("unsupported model shape at {path}: {reason}")]
    UnsupportedModelShape {
        /// JSON-pointer-like location of the offending shape.
        path: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl SchemaError {
    /// Builds an [`SchemaError::UnsupportedModelShape`] error.
    fn unsupported(path: &str, reason: impl Into<String>) -> Self {
        Self::UnsupportedModelShape {
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            reason: reason.into(),
        }
    }
}

// ============================================================================
// SECTION: Derivation
// ============================================================================

/// Derives the JSON Schema document for a [`Model`] type.
///
/// # Errors
///
/// Returns [`SchemaError`] when the type's shape is unsupported.
pub fn schema_for<T: Model>() -> Result<Value, SchemaError> {
    derive_schema(&T::shape())
}

/// Derives a JSON Schema document from a model shape.
///
/// # Errors
///
/// Returns [`SchemaError::UnsupportedModelShape`] for unions without a
/// discriminant, empty unions, non-object union variants, duplicate field
/// names, and conflicting `$defs` entries for one model name.
pub fn derive_schema(shape: &ModelShape) -> Result<Value, SchemaError> {
    let mut deriver = Deriver::default();
    let root = deriver.root(shape)?;
    let Value::Object(mut document) = root else {
        return Ok(root);
    };
    let mut ordered = Map::new();
    ordered.insert("$schema".to_string(), Value::String(SCHEMA_DIALECT.to_string()));
    ordered.append(&mut document);
    if !deriver.defs.is_empty() {
        let defs: Map<String, Value> = deriver.defs.into_iter().collect();
        ordered.insert("$defs".to_string(), Value::Object(defs));
    }
    Ok(Value::Object(ordered))
}

/// Derivation state shared across one document.
#[derive(Default)]
struct Deriver {
    /// Hoisted named models keyed by name.
    defs: BTreeMap<String, Value>,
    /// Names currently being derived (guards recursive shapes).
    in_progress: BTreeSet<String>,
}

impl Deriver {
    /// Derives the root schema; a named root object is inlined.
    fn root(&mut self, shape: &ModelShape) -> Result<Value, SchemaError> {
        match shape {
            ModelShape::Object(object) => self.object(object, "", None),
            other => self.shape(other, ""),
        }
    }

    /// Derives the schema for a nested shape.
    fn shape(&mut self, shape: &ModelShape, path: &str) -> Result<Value, SchemaError> {
        match shape {
            ModelShape::String => Ok(json!({ "type": "string" })),
            ModelShape::Integer => Ok(json!({ "type": "integer" })),
            ModelShape::Number => Ok(json!({ "type": "number" })),
            ModelShape::Boolean => Ok(json!({ "type": "boolean" })),
            ModelShape::Null => Ok(json!({ "type": "null" })),
            ModelShape::Any => Ok(json!({})),
            ModelShape::Optional(inner) => {
                let inner = self.shape(inner, path)?;
                Ok(json!({ "anyOf": [inner, { "type": "null" }] }))
            }
            ModelShape::Sequence(items) => {
                let items = self.shape(items, &format!("{path}/items"))?;
                Ok(json!({ "type": "array", "items": items }))
            }
            ModelShape::Map(values) => {
                let values = self.shape(values, &format!("{path}/additionalProperties"))?;
                Ok(json!({ "type": "object", "additionalProperties": values }))
            }
            ModelShape::Enum(literals) => {
                if literals.is_empty() {
                    return Err(SchemaError::unsupported(path, "enum has no literals"));
                }
                let mut seen = BTreeSet::new();
                for literal in literals {
                    if !seen.insert(literal.as_str()) {
                        return Err(SchemaError::unsupported(
                            path,
                            format!("duplicate enum literal `{literal}`"),
                        ));
                    }
                }
                Ok(json!({ "type": "string", "enum": literals }))
            }
            ModelShape::Object(object) => match &object.name {
                Some(name) => self.named_object(name, object, path),
                None => self.object(object, path, None),
            },
            ModelShape::Union(union) => self.union(union, path),
        }
    }

    /// Hoists a named object into `$defs` and returns a `$ref` to it.
    fn named_object(
        &mut self,
        name: &str,
        object: &ObjectShape,
        path: &str,
    ) -> Result<Value, SchemaError> {
        let reference = json!({ "$ref": format!("#/$defs/{name}") });
        if self.in_progress.contains(name) {
            return Ok(reference);
        }
        self.in_progress.insert(name.to_string());
        let derived = self.object(object, path, None);
        self.in_progress.remove(name);
        let derived = derived?;
        match self.defs.get(name) {
            Some(existing) if existing != &derived => Err(SchemaError::unsupported(
                path,
                format!("conflicting definitions for model `{name}`"),
            )),
            Some(_) => Ok(reference),
            None => {
                self.defs.insert(name.to_string(), derived);
                Ok(reference)
            }
        }
    }

    /// Derives an inline object schema, optionally pinning a discriminant.
    fn object(
        &mut self,
        object: &ObjectShape,
        path: &str,
        discriminant: Option<(&str, &str)>,
    ) -> Result<Value, SchemaError> {
        let mut properties = Map::new();
        let mut required = Vec::new();
        if let Some((field, tag)) = discriminant {
            properties.insert(field.to_string(), json!({ "const": tag }));
            required.push(Value::String(field.to_string()));
        }
        for field in &object.fields {
            if properties.contains_key(&field.name) {
                return Err(SchemaError::unsupported(
                    path,
                    format!("duplicate field name `{}`", field.name),
                ));
            }
            let field_path = format!("{path}/properties/{}", field.name);
            let mut schema = self.shape(&field.shape, &field_path)?;
            if let Some(description) = &field.description
                && let Value::Object(map) = &mut schema
            {
                map.insert("description".to_string(), Value::String(description.clone()));
            }
            if !matches!(field.shape, ModelShape::Optional(_)) {
                required.push(Value::String(field.name.clone()));
            }
            properties.insert(field.name.clone(), schema);
        }
        let mut schema = Map::new();
        if let Some(name) = &object.name {
            schema.insert("title".to_string(), Value::String(name.clone()));
        }
        if let Some(description) = &object.description {
            schema.insert("description".to_string(), Value::String(description.clone()));
        }
        schema.insert("type".to_string(), Value::String("object".to_string()));
        schema.insert("properties".to_string(), Value::Object(properties));
        schema.insert("required".to_string(), Value::Array(required));
        schema.insert("additionalProperties".to_string(), Value::Bool(false));
        Ok(Value::Object(schema))
    }

    /// Derives a `oneOf` schema for a discriminated union.
    fn union(&mut self, union: &UnionShape, path: &str) -> Result<Value, SchemaError> {
        let Some(discriminant) = union.discriminant.as_deref() else {
            return Err(SchemaError::unsupported(path, "union has no discriminant"));
        };
        if union.variants.is_empty() {
            return Err(SchemaError::unsupported(path, "union has no variants"));
        }
        let mut tags = BTreeSet::new();
        let mut variants = Vec::with_capacity(union.variants.len());
        for (index, variant) in union.variants.iter().enumerate() {
            let variant_path = format!("{path}/oneOf/{index}");
            let ModelShape::Object(object) = &variant.shape else {
                return Err(SchemaError::unsupported(
                    &variant_path,
                    format!("union variant `{}` is not an object", variant.tag),
                ));
            };
            if !tags.insert(variant.tag.as_str()) {
                return Err(SchemaError::unsupported(
                    &variant_path,
                    format!("duplicate union tag `{}`", variant.tag),
                ));
            }
            variants.push(self.object(object, &variant_path, Some((discriminant, &variant.tag)))?);
        }
        let mut schema = Map::new();
        if let Some(name) = &union.name {
            schema.insert("title".to_string(), Value::String(name.clone()));
        }
        schema.insert("oneOf".to_string(), Value::Array(variants));
        Ok(Value::Object(schema))
    }
}

#[cfg(test)]
mod tests;
