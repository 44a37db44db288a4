//! Optional structural validation attached to a collection.
//!
//! The descriptor names a schema language; only JSON Schema is registered.
//! Validation runs before any blob or log write, so a rejected document
//! leaves storage, log, and state untouched.

use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

pub const JSON_SCHEMA: &str = "json-schema";

/// Persisted schema descriptor: `{"type": "json-schema", "schema": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub schema: JsonValue,
}

impl SchemaConfig {
    pub fn json_schema(schema: JsonValue) -> Self {
        Self {
            schema_type: JSON_SCHEMA.to_owned(),
            schema,
        }
    }
}

#[derive(Debug)]
pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn load(config: &SchemaConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            config.schema_type == JSON_SCHEMA,
            ErrorMetadata::bad_request(
                "UnknownSchemaType",
                format!("Schema type \"{}\" is not registered", config.schema_type),
            ),
        );
        let validator = jsonschema::validator_for(&config.schema).map_err(|e| {
            ErrorMetadata::bad_request("InvalidSchema", format!("Schema does not compile: {e}"))
        })?;
        Ok(Self { validator })
    }

    pub fn validate(&self, data: &JsonValue) -> anyhow::Result<()> {
        if self.validator.is_valid(data) {
            return Ok(());
        }
        let violations = self
            .validator
            .iter_errors(data)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(ErrorMetadata::schema_violation(
            "DocumentInvalid",
            format!("Document does not match the collection schema: {violations}"),
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use errors::ErrorMetadataAnyhowExt;
    use serde_json::json;

    use super::{
        SchemaConfig,
        SchemaValidator,
    };

    fn require_x() -> SchemaConfig {
        SchemaConfig::json_schema(json!({
            "type": "object",
            "properties": {"x": {"type": "integer"}},
            "required": ["x"],
        }))
    }

    #[test]
    fn test_validation() -> anyhow::Result<()> {
        let validator = SchemaValidator::load(&require_x())?;
        validator.validate(&json!({"x": 3}))?;

        let err = validator.validate(&json!({})).unwrap_err();
        assert!(err.is_schema_violation(), "{err:?}");
        let err = validator.validate(&json!({"x": "three"})).unwrap_err();
        assert!(err.is_schema_violation(), "{err:?}");
        Ok(())
    }

    #[test]
    fn test_unknown_schema_type_is_rejected() {
        let config = SchemaConfig {
            schema_type: "protobuf".to_owned(),
            schema: json!({}),
        };
        let err = SchemaValidator::load(&config).unwrap_err();
        assert!(err.is_bad_request(), "{err:?}");
    }

    #[test]
    fn test_descriptor_shape() -> anyhow::Result<()> {
        let config: SchemaConfig =
            serde_json::from_value(json!({"type": "json-schema", "schema": {"type": "object"}}))?;
        assert_eq!(config, SchemaConfig::json_schema(json!({"type": "object"})));
        // Unknown attributes on the descriptor are rejected.
        assert!(serde_json::from_value::<SchemaConfig>(
            json!({"type": "json-schema", "schema": {}, "strict": true})
        )
        .is_err());
        Ok(())
    }
}
