//! Buffered OpenAI adapter with retry.

use futures::stream;
use std::sync::Arc;

use quill_core::Backend;

use super::{describe_failure, guard_empty, Adapter, ChunkStream};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider};
use crate::resilience::{retry_transient, RetryPolicy};

/// Sends one blocking completion per request and yields it as a single chunk.
///
/// Connection failures and timeouts are retried per [`RetryPolicy`];
/// authentication, rate-limit and API errors end the stream immediately.
pub struct HostedOpenAiAdapter {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    retry: RetryPolicy,
}

impl HostedOpenAiAdapter {
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            provider,
            completion,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Adapter for HostedOpenAiAdapter {
    fn backend(&self) -> Backend {
        Backend::OpenAi
    }

    fn generate(&self, user_text: &str, system_prompt: &str) -> ChunkStream {
        if let Some(guard) = guard_empty(user_text) {
            return guard;
        }

        let provider = self.provider.clone();
        let completion = self.completion.clone();
        let retry = self.retry;
        let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(user_text)];

        Box::pin(stream::once(async move {
            let result = retry_transient(retry, provider.name(), || {
                provider.complete(messages.clone(), &completion)
            })
            .await;

            match result {
                Ok(response) => {
                    tracing::debug!(
                        model = %response.model,
                        tokens = response.usage.total(),
                        "OpenAI completion received"
                    );
                    response.content
                }
                Err(e) => {
                    tracing::warn!(error = %e, "OpenAI request failed");
                    describe_failure(&e, "OpenAI", retry.max_attempts)
                }
            }
        }))
    }
}
