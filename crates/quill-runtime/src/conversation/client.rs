//! Conversation clients.
//!
//! A [`ConversationClient`] answers chat turns and runs the structured
//! story-extraction call. Two services are supported: any OpenAI-compatible
//! provider (Groq by default) and the Sugar-AI API.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use quill_core::message::transcript;
use quill_core::{Backend, ConfigError, Message, ModelParams};

use crate::config::{ChatClientKind, Config};
use crate::providers::{
    ChatMessage, CompletionConfig, LlmProvider, OpenAiCompatibleProvider, ProviderError,
};

use super::sugar_ai::SugarAiClient;

/// Chat replies are longer and warmer than writing feedback.
pub const CHAT_PARAMS: ModelParams = ModelParams {
    max_new_tokens: 1024,
    temperature: 0.8,
    top_p: 0.9,
};

/// Timeout for one conversation request.
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(60);

/// A service that can hold a story conversation.
#[async_trait]
pub trait ConversationClient: Send + Sync {
    /// Reply to the conversation so far, using `system_prompt` as the
    /// assistant's instructions.
    async fn respond(&self, messages: &[Message], system_prompt: &str)
        -> Result<String, ProviderError>;

    /// Run a structured-analysis `instruction` over the conversation.
    async fn analyze(&self, messages: &[Message], instruction: &str)
        -> Result<String, ProviderError>;

    fn name(&self) -> &str;
}

/// Conversation over an OpenAI-compatible provider.
pub struct ProviderConversationClient {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
}

impl ProviderConversationClient {
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            provider,
            completion,
        }
    }

    /// Groq client from config, with the chat model and sampling.
    pub fn groq(config: &Config) -> Result<Self, ConfigError> {
        let credential = config
            .get_credential(Backend::Groq)
            .ok_or(ConfigError::MissingCredential {
                backend: Backend::Groq,
                env_var: "GROQ_API_KEY",
            })?
            .clone();
        let provider = OpenAiCompatibleProvider::new("groq", credential, &config.groq.base_url)
            .map_err(|e| ConfigError::Unavailable {
                backend: Backend::Groq,
                reason: e.to_string(),
            })?;

        Ok(Self::new(
            Arc::new(provider),
            CompletionConfig::from_params(&config.chat.model, &CHAT_PARAMS, CHAT_TIMEOUT),
        ))
    }
}

#[async_trait]
impl ConversationClient for ProviderConversationClient {
    async fn respond(
        &self,
        messages: &[Message],
        system_prompt: &str,
    ) -> Result<String, ProviderError> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(ChatMessage::system(system_prompt));
        wire.extend(messages.iter().map(ChatMessage::from));

        Ok(self.provider.complete(wire, &self.completion).await?.content)
    }

    async fn analyze(
        &self,
        messages: &[Message],
        instruction: &str,
    ) -> Result<String, ProviderError> {
        let wire = vec![
            ChatMessage::system(instruction),
            ChatMessage::user(transcript(messages)),
        ];
        Ok(self.provider.complete(wire, &self.completion).await?.content)
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

/// Build the conversation client selected in `config`.
pub fn client_from_config(config: &Config) -> Result<Arc<dyn ConversationClient>, ConfigError> {
    match config.chat.client {
        ChatClientKind::Groq => Ok(Arc::new(ProviderConversationClient::groq(config)?)),
        ChatClientKind::SugarAi => Ok(Arc::new(SugarAiClient::from_config(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, TokenUsage};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<(Vec<ChatMessage>, CompletionConfig)>>,
    }

    #[async_trait]
    impl LlmProvider for Recording {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.requests.lock().push((messages, config.clone()));
            Ok(CompletionResponse {
                content: "reply".to_string(),
                usage: TokenUsage::default(),
                model: config.model.clone(),
                stop_reason: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn client(provider: Arc<Recording>) -> ProviderConversationClient {
        ProviderConversationClient::new(
            provider,
            CompletionConfig::from_params("chat-model", &CHAT_PARAMS, CHAT_TIMEOUT),
        )
    }

    #[tokio::test]
    async fn test_respond_prepends_system_prompt() {
        let provider = Arc::new(Recording::default());
        let history = vec![Message::assistant("Who is this about?"), Message::user("Leo")];

        let reply = client(provider.clone()).respond(&history, "Be Mary.").await.unwrap();
        assert_eq!(reply, "reply");

        let requests = provider.requests.lock();
        let (messages, config) = &requests[0];
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ChatMessage::system("Be Mary."));
        assert_eq!(messages[2], ChatMessage::user("Leo"));
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.temperature, 0.8);
    }

    #[tokio::test]
    async fn test_analyze_sends_transcript() {
        let provider = Arc::new(Recording::default());
        let history = vec![Message::user("A boy named Leo"), Message::assistant("Nice!")];

        client(provider.clone()).analyze(&history, "Extract JSON").await.unwrap();

        let requests = provider.requests.lock();
        let (messages, _) = &requests[0];
        assert_eq!(messages[0], ChatMessage::system("Extract JSON"));
        assert_eq!(messages[1].content, "user: A boy named Leo\nassistant: Nice!");
    }

    #[test]
    fn test_groq_client_needs_key() {
        assert!(ProviderConversationClient::groq(&Config::default()).is_err());
        let config = Config::default().with_credential(Backend::Groq, "gsk_test");
        assert!(ProviderConversationClient::groq(&config).is_ok());
    }
}
