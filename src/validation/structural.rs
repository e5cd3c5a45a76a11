//! Structural (JSON Schema) validation of output trees.

use std::fmt;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use crate::error::{EtlError, EtlResult};

/// Checks an output tree against the target schema's structure.
pub trait StructuralValidator: Send + Sync {
    /// `Err` holds one message per violation.
    fn validate(&self, instance: &Value) -> Result<(), Vec<String>>;
}

/// [`StructuralValidator`] backed by a compiled JSON Schema.
pub struct JsonSchemaValidator {
    compiled: JSONSchema,
}

impl JsonSchemaValidator {
    /// Compile `schema`, typically produced by [`crate::schema::SchemaDocument::json_schema`].
    pub fn new(schema: &Value) -> EtlResult<Self> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| EtlError::schema(format!("target schema does not compile: {e}")))?;
        Ok(Self { compiled })
    }
}

impl fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaValidator").finish_non_exhaustive()
    }
}

impl StructuralValidator for JsonSchemaValidator {
    fn validate(&self, instance: &Value) -> Result<(), Vec<String>> {
        self.compiled.validate(instance).map_err(|errors| {
            errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect()
        })
    }
}
