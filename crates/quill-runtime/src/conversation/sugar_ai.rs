//! Sugar-AI conversation client.
//!
//! Both chat turns and structured extraction go to `POST /ask-llm-prompted`.
//! Chat mode sends the full message list and reads
//! `choices[0].message.content`; structured mode flattens the conversation
//! into a `question` string and reads `answer`.
//!
//! The base URL is resolved on first use: the public endpoint if it answers
//! a `HEAD` within two seconds, otherwise the local fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;

use quill_core::message::transcript;
use quill_core::{ConfigError, Message};

use super::client::{ConversationClient, CHAT_TIMEOUT};
use crate::config::Config;
use crate::providers::{check_status, map_transport_error, ApiCredential, ChatMessage, ProviderError};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SugarAiClient {
    credential: Option<ApiCredential>,
    primary_url: String,
    fallback_url: String,
    resolved_url: OnceCell<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for SugarAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SugarAiClient")
            .field("credential", &self.credential)
            .field("primary_url", &self.primary_url)
            .field("fallback_url", &self.fallback_url)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    chat: bool,
    messages: &'a [ChatMessage],
    max_length: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Serialize)]
struct PromptedPayload<'a> {
    question: &'a str,
    custom_prompt: &'a str,
    max_length: u32,
    truncation: bool,
    repetition_penalty: f32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct PromptedReply {
    answer: String,
}

impl SugarAiClient {
    /// A client that probes `primary_url` and falls back to `fallback_url`.
    pub fn new(
        credential: Option<ApiCredential>,
        primary_url: impl Into<String>,
        fallback_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::InvalidSetting {
                name: "chat.sugar_ai_url",
                reason: format!("HTTP client: {}", e),
            })?;

        Ok(Self {
            credential,
            primary_url: primary_url.into().trim_end_matches('/').to_string(),
            fallback_url: fallback_url.into().trim_end_matches('/').to_string(),
            resolved_url: OnceCell::new(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if config.sugar_ai_credential().is_none() {
            tracing::warn!("SUGAR_AI_API_KEY not set; Sugar-AI requests will be unauthenticated");
        }
        Self::new(
            config.sugar_ai_credential().cloned(),
            &config.chat.sugar_ai_url,
            &config.chat.sugar_ai_fallback_url,
        )
    }

    /// Base URL in use, probing on first call.
    pub async fn base_url(&self) -> &str {
        self.resolved_url
            .get_or_init(|| async {
                let probe = self
                    .client
                    .head(&self.primary_url)
                    .timeout(PROBE_TIMEOUT)
                    .send()
                    .await;
                match probe {
                    Ok(r) if r.status().is_success() => self.primary_url.clone(),
                    Ok(r) => {
                        tracing::info!(status = %r.status(), fallback = %self.fallback_url, "Sugar-AI probe failed");
                        self.fallback_url.clone()
                    }
                    Err(e) => {
                        tracing::info!(error = %e, fallback = %self.fallback_url, "Sugar-AI unreachable");
                        self.fallback_url.clone()
                    }
                }
            })
            .await
    }

    async fn post<P: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        payload: &P,
    ) -> Result<R, ProviderError> {
        let url = format!("{}/ask-llm-prompted", self.base_url().await);
        let mut request = self.client.post(url).timeout(CHAT_TIMEOUT).json(payload);
        if let Some(cred) = &self.credential {
            request = request.header("X-API-KEY", cred.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(e, CHAT_TIMEOUT))?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl ConversationClient for SugarAiClient {
    async fn respond(
        &self,
        messages: &[Message],
        system_prompt: &str,
    ) -> Result<String, ProviderError> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(ChatMessage::system(system_prompt));
        wire.extend(messages.iter().map(ChatMessage::from));

        let payload = ChatPayload {
            chat: true,
            messages: &wire,
            max_length: 512,
            temperature: 0.6,
            top_p: 0.9,
            top_k: 50,
        };

        let reply: ChatReply = self.post(&payload).await?;
        reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))
    }

    async fn analyze(
        &self,
        messages: &[Message],
        instruction: &str,
    ) -> Result<String, ProviderError> {
        let question = transcript(messages);
        let payload = PromptedPayload {
            question: &question,
            custom_prompt: instruction,
            max_length: 1024,
            truncation: true,
            repetition_penalty: 1.1,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 50,
        };

        let reply: PromptedReply = self.post(&payload).await?;
        Ok(reply.answer)
    }

    fn name(&self) -> &str {
        "sugar-ai"
    }
}
