//! The closed set of generation backends.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// A supported text-generation backend.
///
/// Parsing accepts the canonical names (`local`, `openai`, `groq`) and the
/// legacy names older deployments used in `BACKEND_TYPE` (`qwen`, `llama`).
/// Anything else is a [`ConfigError::UnsupportedBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process model, no network credential
    #[serde(alias = "qwen")]
    Local,

    /// Hosted OpenAI-compatible chat completions, buffered
    #[serde(rename = "openai")]
    OpenAi,

    /// Hosted Groq chat completions, streamed
    #[serde(alias = "llama")]
    Groq,
}

impl Backend {
    /// Every supported backend, in display order.
    pub const ALL: [Backend; 3] = [Backend::Local, Backend::OpenAi, Backend::Groq];

    /// Canonical identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::OpenAi => "openai",
            Backend::Groq => "groq",
        }
    }

    /// Whether this backend needs a network credential to be usable.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, Backend::Local)
    }

    /// Environment variable holding this backend's credential, if any.
    pub fn credential_env(&self) -> Option<&'static str> {
        match self {
            Backend::Local => None,
            Backend::OpenAi => Some("OPENAI_API_KEY"),
            Backend::Groq => Some("GROQ_API_KEY"),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Local
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "qwen" => Ok(Backend::Local),
            "openai" => Ok(Backend::OpenAi),
            "groq" | "llama" => Ok(Backend::Groq),
            _ => Err(ConfigError::UnsupportedBackend(s.to_string())),
        }
    }
}
