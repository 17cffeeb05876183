//! Input schemas attached to registered events.
//!
//! Two flavours: `TypedSchema<T>` validates by round-tripping through a Rust
//! type (so serde defaults fill in missing fields), and `JsonSchemaValidator`
//! checks a raw JSON Schema document.

use std::marker::PhantomData;

use anyhow::{anyhow, Result};
use jsonschema::error::ValidationErrorKind;
use jsonschema::JSONSchema;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ValidationError;

/// Validates an event payload before any handler sees it.
pub trait InputSchema: Send + Sync {
    /// Check `data`. On success returns the payload handlers should receive,
    /// which may be normalised (defaults filled in).
    fn validate(&self, data: &Value) -> Result<Value, ValidationError>;

    /// JSON Schema description, handed to the decision handler.
    fn describe(&self) -> Value;
}

// ---------------------------------------------------------------------------
// TypedSchema
// ---------------------------------------------------------------------------

/// Schema backed by a serde type. Validation is deserialize-then-serialize.
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InputSchema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + JsonSchema,
{
    fn validate(&self, data: &Value) -> Result<Value, ValidationError> {
        let typed: T = serde_json::from_value(data.clone()).map_err(|e| {
            let message = e.to_string();
            let fields = offending_field(&message).into_iter().collect();
            ValidationError::new(message, fields)
        })?;
        serde_json::to_value(typed).map_err(|e| ValidationError::new(e.to_string(), Vec::new()))
    }

    fn describe(&self) -> Value {
        serde_json::to_value(schema_for!(T)).unwrap_or_default()
    }
}

/// serde names the field in backticks for missing/unknown field errors.
fn offending_field(message: &str) -> Option<String> {
    if !(message.starts_with("missing field") || message.starts_with("unknown field")) {
        return None;
    }
    message.split('`').nth(1).map(str::to_string)
}

// ---------------------------------------------------------------------------
// JsonSchemaValidator
// ---------------------------------------------------------------------------

/// Schema backed by a raw JSON Schema document. Payloads pass through unchanged.
pub struct JsonSchemaValidator {
    document: Value,
    compiled: JSONSchema,
}

impl JsonSchemaValidator {
    pub fn new(document: Value) -> Result<Self> {
        let compiled =
            JSONSchema::compile(&document).map_err(|e| anyhow!("Invalid JSON schema: {e}"))?;
        Ok(Self { document, compiled })
    }
}

impl InputSchema for JsonSchemaValidator {
    fn validate(&self, data: &Value) -> Result<Value, ValidationError> {
        let Err(errors) = self.compiled.validate(data) else {
            return Ok(data.clone());
        };

        let mut messages = Vec::new();
        let mut fields = Vec::new();
        for error in errors {
            let pointer = error.instance_path.to_string();
            let field = match &error.kind {
                ValidationErrorKind::Required { property } => {
                    let name = property.as_str().map(str::to_string).unwrap_or_default();
                    join_pointer(&pointer, &name)
                }
                _ => join_pointer(&pointer, ""),
            };
            if field.is_empty() {
                messages.push(error.to_string());
            } else {
                messages.push(format!("{field}: {error}"));
                fields.push(field);
            }
        }
        Err(ValidationError::new(messages.join("; "), fields))
    }

    fn describe(&self) -> Value {
        self.document.clone()
    }
}

/// `/a/0` + `b` → `a.0.b`
fn join_pointer(pointer: &str, leaf: &str) -> String {
    pointer
        .split('/')
        .chain(std::iter::once(leaf))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct DateCalc {
        base: String,
        #[serde(default = "default_days")]
        days: i64,
    }

    fn default_days() -> i64 {
        7
    }

    #[test]
    fn typed_schema_fills_defaults() {
        let schema = TypedSchema::<DateCalc>::new();
        let normalised = schema.validate(&json!({"base": "2026-01-01"})).unwrap();
        assert_eq!(normalised, json!({"base": "2026-01-01", "days": 7}));
    }

    #[test]
    fn typed_schema_names_missing_field() {
        let schema = TypedSchema::<DateCalc>::new();
        let err = schema.validate(&json!({"days": 3})).unwrap_err();
        assert_eq!(err.fields, vec!["base".to_string()]);
        assert!(err.message.contains("missing field"));
    }

    #[test]
    fn typed_schema_names_unknown_field() {
        let schema = TypedSchema::<DateCalc>::new();
        let err = schema
            .validate(&json!({"base": "x", "weeks": 1}))
            .unwrap_err();
        assert_eq!(err.fields, vec!["weeks".to_string()]);
    }

    #[test]
    fn typed_schema_describes_properties() {
        let described = TypedSchema::<DateCalc>::new().describe();
        assert!(described["properties"]["base"].is_object());
        assert!(described["properties"]["days"].is_object());
    }

    #[test]
    fn json_schema_reports_required_and_type_errors() {
        let schema = JsonSchemaValidator::new(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["query"]
        }))
        .unwrap();

        assert_eq!(
            schema.validate(&json!({"query": "rust"})).unwrap(),
            json!({"query": "rust"})
        );

        let err = schema.validate(&json!({"limit": "ten"})).unwrap_err();
        assert!(err.fields.contains(&"query".to_string()));
        assert!(err.fields.contains(&"limit".to_string()));
    }

    #[test]
    fn json_schema_rejects_invalid_document() {
        assert!(JsonSchemaValidator::new(json!({"type": 12})).is_err());
    }

    #[test]
    fn join_pointer_builds_dotted_paths() {
        assert_eq!(join_pointer("", "query"), "query");
        assert_eq!(join_pointer("/items/0", ""), "items.0");
        assert_eq!(join_pointer("/items/0", "name"), "items.0.name");
    }
}
