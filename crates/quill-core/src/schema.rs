//! JSON Schema validation for config files.
//!
//! Config files are validated against schema/quill-config.schema.json
//! before they are deserialized, so typos in key names are reported instead
//! of silently ignored.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded config schema (loaded at compile time).
const CONFIG_SCHEMA_JSON: &str = include_str!("../../../schema/quill-config.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(CONFIG_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a config document against the schema.
///
/// Returns every violation, each suffixed with its JSON pointer.
pub fn validate_config_schema(config_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(config_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_compiles() {
        assert!(get_validator().is_ok());
    }

    #[test]
    fn test_valid_config_passes() {
        let value = serde_json::json!({
            "backend": "groq",
            "request_timeout": "30s",
            "model_params": { "max_new_tokens": 300, "temperature": 0.7, "top_p": 0.9 },
            "groq": { "model": "llama3-8b-8192", "base_url": "https://api.groq.com/openai/v1" },
            "chat": { "client": "sugar-ai" }
        });
        assert!(validate_config_schema(&value).is_ok());
    }

    #[test]
    fn test_empty_config_passes() {
        assert!(validate_config_schema(&serde_json::json!({})).is_ok());
    }

    #[test]
    fn test_unknown_key_fails() {
        let value = serde_json::json!({ "backnd": "groq" });
        let errors = validate_config_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_unknown_backend_fails() {
        let value = serde_json::json!({ "backend": "mistral" });
        assert!(validate_config_schema(&value).is_err());
    }

    #[test]
    fn test_out_of_range_param_fails() {
        let value = serde_json::json!({ "model_params": { "top_p": 0 } });
        assert!(validate_config_schema(&value).is_err());
    }

    #[test]
    fn test_non_http_url_fails() {
        let value = serde_json::json!({ "openai": { "base_url": "ftp://example.com" } });
        assert!(validate_config_schema(&value).is_err());
    }
}
