//! Streaming Groq adapter.

use futures::StreamExt;
use std::sync::Arc;

use quill_core::Backend;

use super::{describe_failure, guard_empty, Adapter, ChunkStream};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider};

/// Yields each network delta as its own chunk. No retry: a failure before
/// or during the stream ends it with one tagged error chunk.
pub struct HostedGroqAdapter {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
}

impl HostedGroqAdapter {
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            provider,
            completion,
        }
    }
}

impl Adapter for HostedGroqAdapter {
    fn backend(&self) -> Backend {
        Backend::Groq
    }

    fn generate(&self, user_text: &str, system_prompt: &str) -> ChunkStream {
        if let Some(guard) = guard_empty(user_text) {
            return guard;
        }

        let provider = self.provider.clone();
        let completion = self.completion.clone();
        let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(user_text)];

        Box::pin(async_stream::stream! {
            match provider.stream(messages, &completion).await {
                Ok(mut deltas) => {
                    while let Some(delta) = deltas.next().await {
                        match delta {
                            Ok(text) => yield text,
                            Err(e) => {
                                tracing::warn!(error = %e, "Groq stream interrupted");
                                yield describe_failure(&e, "Groq", 1);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Groq request failed");
                    yield describe_failure(&e, "Groq", 1);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, DeltaStream, ProviderError};
    use async_trait::async_trait;

    struct Deltas(Vec<Result<&'static str, ProviderError>>);

    #[async_trait]
    impl LlmProvider for Deltas {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Err(ProviderError::NotConfigured("stream only".into()))
        }

        async fn stream(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<DeltaStream, ProviderError> {
            let items: Vec<Result<String, ProviderError>> = self
                .0
                .iter()
                .map(|r| r.clone().map(str::to_string))
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "deltas"
        }
    }

    struct Refusing;

    #[async_trait]
    impl LlmProvider for Refusing {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Err(ProviderError::AuthError)
        }

        async fn stream(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<DeltaStream, ProviderError> {
            Err(ProviderError::AuthError)
        }

        async fn health_check(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "refusing"
        }
    }

    fn adapter(provider: impl LlmProvider + 'static) -> HostedGroqAdapter {
        HostedGroqAdapter::new(Arc::new(provider), CompletionConfig::default())
    }

    #[tokio::test]
    async fn test_each_delta_is_a_chunk() {
        let chunks: Vec<String> = adapter(Deltas(vec![Ok("Leo"), Ok(" met"), Ok(" a dragon.")]))
            .generate("story", "sys")
            .collect()
            .await;
        assert_eq!(chunks, vec!["Leo", " met", " a dragon."]);
    }

    #[tokio::test]
    async fn test_mid_stream_error_terminates() {
        let chunks: Vec<String> = adapter(Deltas(vec![
            Ok("Leo"),
            Err(ProviderError::Connection("reset".into())),
            Ok("never"),
        ]))
        .generate("story", "sys")
        .collect()
        .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "Leo");
        assert!(chunks[1].starts_with("Connection Error:"));
    }

    #[tokio::test]
    async fn test_request_failure_is_single_chunk() {
        let chunks: Vec<String> = adapter(Refusing).generate("story", "sys").collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("Authentication Error:"));
    }
}
