//! Backend adapters.
//!
//! An [`Adapter`] turns `(user_text, system_prompt)` into a lazy stream of
//! text chunks whose in-order concatenation is the model's reply. Adapters
//! never fail past this boundary: any error becomes exactly one final chunk
//! prefixed with its [`ErrorCategory`] tag.
//!
//! | Backend | Adapter | Chunking |
//! |---------|---------|----------|
//! | `local` | [`LocalAdapter`] | one chunk per sentence |
//! | `openai` | [`HostedOpenAiAdapter`] | whole reply, with retry |
//! | `groq` | [`HostedGroqAdapter`] | one chunk per network delta |

use futures::stream::{self, BoxStream};
use std::sync::Arc;

use quill_core::prompts::EMPTY_INPUT_MESSAGE;
use quill_core::redact::redact_secrets;
use quill_core::{Backend, ConfigError};

use crate::config::Config;
use crate::providers::{
    CompletionConfig, ErrorCategory, LlmProvider, OpenAiCompatibleProvider, ProviderError,
};

mod hosted_groq;
mod hosted_openai;
mod local;

#[cfg(feature = "llama-cpp")]
mod llama_engine;

pub use hosted_groq::HostedGroqAdapter;
pub use hosted_openai::HostedOpenAiAdapter;
pub use local::{
    reset_shared_models, DefaultModelLoader, LocalAdapter, ModelLoader, TextGenerator,
};

/// Lazy, finite, ordered sequence of text chunks.
pub type ChunkStream = BoxStream<'static, String>;

/// One concrete way of generating text.
pub trait Adapter: Send + Sync {
    /// Backend this adapter serves.
    fn backend(&self) -> Backend;

    /// Generate a reply. Nothing happens until the stream is polled.
    fn generate(&self, user_text: &str, system_prompt: &str) -> ChunkStream;
}

/// Builds adapters for the manager.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, backend: Backend, config: &Config) -> Result<Arc<dyn Adapter>, ConfigError>;
}

/// Factory for the built-in adapters.
pub struct DefaultAdapterFactory {
    loader: Arc<dyn ModelLoader>,
}

impl Default for DefaultAdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultAdapterFactory {
    pub fn new() -> Self {
        Self {
            loader: Arc::new(DefaultModelLoader),
        }
    }

    /// Use `loader` for the local backend instead of the built-in engine.
    pub fn with_model_loader(loader: Arc<dyn ModelLoader>) -> Self {
        Self { loader }
    }

    fn hosted_provider(
        backend: Backend,
        config: &Config,
    ) -> Result<(Arc<dyn LlmProvider>, CompletionConfig), ConfigError> {
        let env_var = backend.credential_env().unwrap_or_default();
        let credential = config
            .get_credential(backend)
            .ok_or(ConfigError::MissingCredential { backend, env_var })?
            .clone();
        let hosted = config.hosted(backend).ok_or_else(|| ConfigError::Unavailable {
            backend,
            reason: "not a hosted backend".to_string(),
        })?;

        let provider = OpenAiCompatibleProvider::new(backend.as_str(), credential, &hosted.base_url)
            .map_err(|e| ConfigError::Unavailable {
                backend,
                reason: e.to_string(),
            })?;
        let completion =
            CompletionConfig::from_params(&hosted.model, &config.model_params, config.request_timeout);

        Ok((Arc::new(provider), completion))
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create(&self, backend: Backend, config: &Config) -> Result<Arc<dyn Adapter>, ConfigError> {
        match backend {
            Backend::Local => {
                let adapter = LocalAdapter::load(&config.local, config.model_params, &*self.loader)?;
                Ok(Arc::new(adapter))
            }
            Backend::OpenAi => {
                let (provider, completion) = Self::hosted_provider(backend, config)?;
                Ok(Arc::new(HostedOpenAiAdapter::new(provider, completion)))
            }
            Backend::Groq => {
                let (provider, completion) = Self::hosted_provider(backend, config)?;
                Ok(Arc::new(HostedGroqAdapter::new(provider, completion)))
            }
        }
    }
}

/// A stream of exactly one chunk.
pub fn single_chunk(chunk: impl Into<String>) -> ChunkStream {
    Box::pin(stream::once(futures::future::ready(chunk.into())))
}

/// Format a tagged error chunk. Credential-shaped text is redacted.
pub fn error_chunk(category: ErrorCategory, detail: &str) -> String {
    redact_secrets(&format!("{}: {}", category.tag(), detail))
}

/// Empty-input guard shared by every adapter.
pub(crate) fn guard_empty(user_text: &str) -> Option<ChunkStream> {
    quill_core::text::is_blank(user_text).then(|| single_chunk(EMPTY_INPUT_MESSAGE))
}

/// Describe a provider failure for the user.
///
/// `attempts` is how many times the request was sent.
pub(crate) fn describe_failure(err: &ProviderError, service: &str, attempts: u32) -> String {
    let detail = match err {
        ProviderError::Connection(_) if attempts > 1 => {
            format!("Failed to reach {} API after {} attempts.", service, attempts)
        }
        ProviderError::Connection(e) => format!("Failed to reach {} API: {}", service, e),
        ProviderError::Timeout(_) if attempts > 1 => {
            format!("Request timed out after {} attempts.", attempts)
        }
        ProviderError::Timeout(d) => {
            format!("Request timed out after {}.", humantime::format_duration(*d))
        }
        ProviderError::AuthError => {
            "Invalid API key or API key not found in environment.".to_string()
        }
        ProviderError::RateLimited {
            retry_after: Some(d),
        } => format!(
            "Too many requests. Retry after {}.",
            humantime::format_duration(*d)
        ),
        ProviderError::RateLimited { retry_after: None } => "Too many requests.".to_string(),
        ProviderError::ApiError { status, message } => {
            format!("{} returned {}: {}", service, status, message)
        }
        ProviderError::ParseError(e) => format!("Unreadable response from {}: {}", service, e),
        ProviderError::NotConfigured(e) | ProviderError::Inference(e) => e.clone(),
    };
    error_chunk(err.category(), &detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_error_chunk_is_tagged_and_redacted() {
        let chunk = error_chunk(
            ErrorCategory::Api,
            "Incorrect API key provided: sk-abcdefghijklmnop",
        );
        assert!(chunk.starts_with("API Error: "));
        assert!(!chunk.contains("sk-abcdefghijklmnop"));
    }

    #[test]
    fn test_describe_failure_messages() {
        assert_eq!(
            describe_failure(&ProviderError::Connection("refused".into()), "OpenAI", 3),
            "Connection Error: Failed to reach OpenAI API after 3 attempts."
        );
        assert_eq!(
            describe_failure(&ProviderError::Timeout(Duration::from_secs(30)), "OpenAI", 3),
            "Timeout Error: Request timed out after 3 attempts."
        );
        assert_eq!(
            describe_failure(&ProviderError::AuthError, "OpenAI", 1),
            "Authentication Error: Invalid API key or API key not found in environment."
        );
        assert_eq!(
            describe_failure(&ProviderError::RateLimited { retry_after: None }, "Groq", 1),
            "Rate Limit Error: Too many requests."
        );
        assert!(describe_failure(
            &ProviderError::ApiError {
                status: 500,
                message: "boom".into()
            },
            "Groq",
            1
        )
        .starts_with("API Error: Groq returned 500"));
    }

    #[tokio::test]
    async fn test_guard_empty() {
        let chunks: Vec<String> = guard_empty("  \n\t").unwrap().collect().await;
        assert_eq!(chunks, vec![EMPTY_INPUT_MESSAGE.to_string()]);
        assert!(guard_empty("a dragon").is_none());
    }

    #[test]
    fn test_factory_rejects_hosted_without_credential() {
        let factory = DefaultAdapterFactory::new();
        let err = factory
            .create(Backend::OpenAi, &Config::default())
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigError::MissingCredential {
                backend: Backend::OpenAi,
                env_var: "OPENAI_API_KEY"
            }
        );
    }

    #[test]
    fn test_factory_builds_hosted_adapters() {
        let config = Config::default()
            .with_credential(Backend::OpenAi, "sk-test")
            .with_credential(Backend::Groq, "gsk_test");
        let factory = DefaultAdapterFactory::new();

        assert_eq!(
            factory.create(Backend::OpenAi, &config).unwrap().backend(),
            Backend::OpenAi
        );
        assert_eq!(
            factory.create(Backend::Groq, &config).unwrap().backend(),
            Backend::Groq
        );
    }
}
