//! Config-file model.
//!
//! A config file is optional and every key in it is optional. Values found
//! here sit between the built-in defaults and environment variables in
//! precedence; merging happens in the runtime crate.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::schema::validate_config_schema;
use crate::ConfigError;

/// Overrides for sampling parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParamsSettings {
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// Local-model settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Path to a GGUF model file
    pub model_path: Option<String>,

    /// Hugging Face repository holding the GGUF file
    pub model_name: Option<String>,

    /// GGUF file within `model_name`
    pub model_file: Option<String>,

    /// Context window in tokens
    pub context_size: Option<u32>,
}

/// Settings for one hosted backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostedSettings {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Conversation-client settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    /// `groq` or `sugar-ai`
    pub client: Option<String>,
    pub model: Option<String>,
    pub sugar_ai_url: Option<String>,
    pub sugar_ai_fallback_url: Option<String>,
}

/// Parsed config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSettings {
    /// Backend identifier, kept as text so legacy names parse with the same
    /// error reporting as the environment
    pub backend: Option<String>,
    pub system_prompt: Option<String>,

    /// humantime duration, e.g. "30s"
    pub request_timeout: Option<String>,
    pub min_autocomplete_chars: Option<usize>,

    #[serde(default)]
    pub model_params: ModelParamsSettings,
    #[serde(default)]
    pub local: LocalSettings,
    #[serde(default)]
    pub openai: HostedSettings,
    #[serde(default)]
    pub groq: HostedSettings,
    #[serde(default)]
    pub chat: ChatSettings,
}

impl FileSettings {
    /// Parse and schema-validate YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let raw: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;

        // An empty file parses as null
        let raw = if raw.is_null() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            raw
        };

        let json = serde_json::to_value(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        validate_config_schema(&json).map_err(ConfigError::Schema)?;

        serde_json::from_value(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read, parse and validate a YAML config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Self::from_yaml(&content)
    }
}
