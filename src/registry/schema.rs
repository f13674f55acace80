//! Compiled schema documents
//!
//! A small JSON Schema subset: `type` (single or list), `required`,
//! `properties`, `items` and `enum`. Annotation keywords such as `$schema`,
//! `title`, `description` and `format` are accepted and ignored. This covers
//! every published event schema; anything fancier belongs in a new schema
//! version, not in this evaluator.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// First point where a document diverges from its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path from the document root, e.g. `$.data.role`.
    pub path: String,
    pub detail: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.detail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

impl SchemaType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::String => value.is_string(),
            SchemaType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            SchemaType::Number => value.is_number(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Null => value.is_null(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Null => "null",
        }
    }
}

/// `"type"` accepts either one name or a list of alternatives
/// (`["string", "null"]` for nullable fields).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    One(SchemaType),
    Any(Vec<SchemaType>),
}

impl TypeSpec {
    fn matches(&self, value: &Value) -> bool {
        match self {
            TypeSpec::One(t) => t.matches(value),
            TypeSpec::Any(ts) => ts.iter().any(|t| t.matches(value)),
        }
    }

    fn describe(&self) -> String {
        match self {
            TypeSpec::One(t) => t.name().to_string(),
            TypeSpec::Any(ts) => ts
                .iter()
                .map(|t| t.name())
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }
}

/// One compiled schema node. Nested objects nest `Schema` values under
/// `properties`; arrays describe their elements with `items`.
#[derive(Debug, Clone, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: Option<TypeSpec>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, Schema>,
    #[serde(rename = "enum")]
    pub allowed: Option<Vec<Value>>,
    pub items: Option<Box<Schema>>,
}

impl Schema {
    /// Check `value` against this schema, reporting the first violation.
    /// Deterministic for a given document and schema.
    pub fn check(&self, value: &Value) -> Result<(), Violation> {
        self.check_at(value, "$")
    }

    fn check_at(&self, value: &Value, path: &str) -> Result<(), Violation> {
        if let Some(spec) = &self.schema_type {
            if !spec.matches(value) {
                return Err(Violation {
                    path: path.to_string(),
                    detail: format!("expected {}", spec.describe()),
                });
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                return Err(Violation {
                    path: path.to_string(),
                    detail: format!("value {value} is not one of the allowed values"),
                });
            }
        }

        if let Some(object) = value.as_object() {
            for field in &self.required {
                if !object.contains_key(field) {
                    return Err(Violation {
                        path: path.to_string(),
                        detail: format!("missing required field '{field}'"),
                    });
                }
            }
            for (name, sub) in &self.properties {
                if let Some(child) = object.get(name) {
                    sub.check_at(child, &format!("{path}.{name}"))?;
                }
            }
        }

        if let (Some(items), Some(elements)) = (&self.items, value.as_array()) {
            for (index, element) in elements.iter().enumerate() {
                items.check_at(element, &format!("{path}[{index}]"))?;
            }
        }

        Ok(())
    }
}
