//! LLM provider abstractions for quill-runtime.
//!
//! A provider is the network-facing half of a hosted backend: it turns a
//! message list into either one buffered completion or a stream of content
//! deltas, and reports failures as typed [`ProviderError`]s. Adapters sit on
//! top and turn those errors into user-facing text.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use quill_core::{Message, ModelParams};

mod openai_compat;
pub mod secrets;

pub use openai_compat::{OpenAiCompatibleProvider, GROQ_BASE_URL, OPENAI_BASE_URL};
pub(crate) use openai_compat::{check_status, map_transport_error};
pub use secrets::{ApiCredential, CredentialSource};

/// Errors from LLM providers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Authentication failed")]
    AuthError,

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

impl ProviderError {
    /// The stable category used to tag this error in output.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Connection(_) => ErrorCategory::Connection,
            ProviderError::Timeout(_) => ErrorCategory::Timeout,
            ProviderError::AuthError => ErrorCategory::Authentication,
            ProviderError::RateLimited { .. } => ErrorCategory::RateLimit,
            ProviderError::ApiError { .. } => ErrorCategory::Api,
            ProviderError::ParseError(_) => ErrorCategory::Response,
            ProviderError::NotConfigured(_) => ErrorCategory::Configuration,
            ProviderError::Inference(_) => ErrorCategory::Inference,
        }
    }

    /// Connection failures and timeouts may succeed on retry.
    pub fn is_transient(&self) -> bool {
        self.category().is_transient()
    }
}

/// Stable error classes. The [`tag`](ErrorCategory::tag) prefixes every
/// error chunk so callers can recognise failures without parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connection,
    Timeout,
    Authentication,
    RateLimit,
    Api,
    Response,
    Configuration,
    Inference,
    Unexpected,
}

impl ErrorCategory {
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorCategory::Connection => "Connection Error",
            ErrorCategory::Timeout => "Timeout Error",
            ErrorCategory::Authentication => "Authentication Error",
            ErrorCategory::RateLimit => "Rate Limit Error",
            ErrorCategory::Api => "API Error",
            ErrorCategory::Response => "Response Error",
            ErrorCategory::Configuration => "Configuration Error",
            ErrorCategory::Inference => "Inference Error",
            ErrorCategory::Unexpected => "Unexpected Error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCategory::Connection | ErrorCategory::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Nucleus-sampling mass
    pub top_p: f32,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self::from_params("gpt-3.5-turbo", &ModelParams::default(), Duration::from_secs(30))
    }
}

impl CompletionConfig {
    /// Build a request config from shared sampling parameters.
    pub fn from_params(model: impl Into<String>, params: &ModelParams, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            max_tokens: params.max_new_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            timeout,
        }
    }
}

/// A chat message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,

    #[serde(default)]
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Incremental content deltas from a streaming completion.
pub type DeltaStream = BoxStream<'static, Result<String, ProviderError>>;

/// Provider abstraction allows swapping hosted LLM services.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a buffered chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Execute a streaming chat completion.
    ///
    /// The default falls back to [`complete`](LlmProvider::complete) and
    /// yields the whole response as one delta.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<DeltaStream, ProviderError> {
        let response = self.complete(messages, config).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(response.content)
        })))
    }

    /// Check if provider is usable.
    async fn health_check(&self) -> bool;

    /// Provider name for logs.
    fn name(&self) -> &str;
}
