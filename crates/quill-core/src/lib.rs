//! # quill-core
//!
//! Deterministic data model for the Quill writing assistant.
//!
//! This crate holds everything about the LLM layer that does not touch the
//! network or run a model:
//! - Which backends exist and what they need ([`Backend`])
//! - Sampling parameters and their bounds ([`ModelParams`])
//! - Chat history entries ([`Message`], [`Role`])
//! - The structured story summary and its defensive extraction ([`StoryInfo`])
//! - Prompt text and prompt selection ([`PromptKind`])
//! - Input truncation and sentence segmentation ([`text`])
//! - Config-file parsing with schema validation ([`FileSettings`])
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: nothing here issues a request or loads a model
//! 2. **Closed backend set**: unknown identifiers are errors, never fallbacks
//! 3. **Whole-or-nothing extraction**: a [`StoryInfo`] is either fully parsed
//!    or reset to its empty default
//!
//! ## Example
//!
//! ```rust
//! use quill_core::{Backend, StoryInfo};
//!
//! let backend: Backend = "groq".parse().unwrap();
//! assert!(backend.requires_credential());
//!
//! let info = StoryInfo::from_model_output(r#"Sure! {"title": "Leo and the Dragon"}"#);
//! assert_eq!(info.title, "Leo and the Dragon");
//! assert_eq!(info.villains, "");
//! ```

pub mod backend;
pub mod message;
pub mod params;
pub mod prompts;
pub mod redact;
pub mod schema;
pub mod settings;
pub mod story;
pub mod text;

// Re-export main types at crate root
pub use backend::Backend;
pub use message::{Message, Role};
pub use params::ModelParams;
pub use prompts::PromptKind;
pub use settings::FileSettings;
pub use story::{StoryInfo, StoryParseError};

use thiserror::Error;

/// Errors raised while building or validating configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid backend type: '{0}'. Supported: local, openai, groq")]
    UnsupportedBackend(String),

    #[error("API key not found for backend '{backend}': set {env_var}")]
    MissingCredential {
        backend: Backend,
        env_var: &'static str,
    },

    #[error("Model parameter '{name}' out of range: {value} (expected {expected})")]
    ParamOutOfRange {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Config file failed schema validation: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Invalid setting '{name}': {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("Backend '{backend}' unavailable: {reason}")]
    Unavailable { backend: Backend, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credential_message_names_env_var() {
        let err = ConfigError::MissingCredential {
            backend: Backend::OpenAi,
            env_var: "OPENAI_API_KEY",
        };
        let msg = err.to_string();
        assert!(msg.contains("openai"));
        assert!(msg.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_schema_error_joins_messages() {
        let err = ConfigError::Schema(vec!["a".into(), "b".into()]);
        assert!(err.to_string().ends_with("a; b"));
    }
}
