//! OpenAI-compatible chat completions provider.
//!
//! Serves both hosted backends: OpenAI itself and Groq, whose API speaks the
//! same `/chat/completions` protocol. Buffered calls read
//! `choices[0].message.content`; streaming calls parse server-sent events and
//! yield each `choices[0].delta.content` as it arrives.
//!
//! ## Security
//!
//! The API key is held in an [`ApiCredential`] and only exposed when the
//! bearer header is set.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    secrets::ApiCredential, ChatMessage, CompletionConfig, CompletionResponse, DeltaStream,
    LlmProvider, ProviderError, TokenUsage,
};

/// Default OpenAI API root.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default Groq API root (OpenAI-compatible surface).
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Provider for any endpoint implementing the OpenAI chat completions API.
pub struct OpenAiCompatibleProvider {
    credential: ApiCredential,
    base_url: String,
    name: &'static str,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("name", &self.name)
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiCompatibleProvider {
    /// Create a provider for `base_url` using `credential` as bearer token.
    pub fn new(
        name: &'static str,
        credential: ApiCredential,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            credential,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name,
            client,
        })
    }

    /// OpenAI at its public endpoint.
    pub fn openai(credential: ApiCredential) -> Result<Self, ProviderError> {
        Self::new("openai", credential, OPENAI_BASE_URL)
    }

    /// Groq at its public endpoint.
    pub fn groq(credential: ApiCredential) -> Result<Self, ProviderError> {
        Self::new("groq", credential, GROQ_BASE_URL)
    }

    /// Set custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stream,
        };

        tracing::debug!(provider = self.name, model = %config.model, stream, "Sending chat request");

        // SECURITY: Only expose the credential here, at the point of use
        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .json(&request);

        // A streamed body may legitimately outlive the timeout, so only the
        // wait for response headers is bounded here. Reads are bounded per
        // chunk in `stream`.
        let response = if stream {
            tokio::time::timeout(config.timeout, builder.send())
                .await
                .map_err(|_| ProviderError::Timeout(config.timeout))?
        } else {
            builder.timeout(config.timeout).send().await
        }
        .map_err(|e| map_transport_error(e, config.timeout))?;

        check_status(response).await
    }
}

/// Splits a server-sent event byte stream into complete lines.
///
/// Bytes are only decoded once a full line has arrived, so a multi-byte
/// character split across network reads is never mangled.
#[derive(Debug, Default)]
struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    /// Append `bytes` and return every line completed by them, trimmed.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ProviderError> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..pos])?);
        }
        Ok(lines)
    }

    /// The unterminated remainder, if any.
    fn finish(self) -> Result<Option<String>, ProviderError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        decode_line(&self.pending).map(Some)
    }
}

fn decode_line(bytes: &[u8]) -> Result<String, ProviderError> {
    std::str::from_utf8(bytes)
        .map(|line| line.trim().to_string())
        .map_err(|e| ProviderError::ParseError(format!("event stream is not UTF-8: {}", e)))
}

/// The payload of a `data:` line; other SSE fields are ignored.
fn sse_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

pub(crate) fn map_transport_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Connection(e.to_string())
    }
}

pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::AuthError);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ProviderError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);

    Err(ProviderError::ApiError {
        status: status.as_u16(),
        message,
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Pull the content delta out of one `data:` payload, if it carries one.
fn parse_sse_data(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| ProviderError::ParseError(e.to_string()))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(messages, config, false).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        let content = choice
            .message
            .content
            .ok_or_else(|| ProviderError::ParseError("choice has no content".to_string()))?;

        Ok(CompletionResponse {
            content,
            usage: body.usage,
            model: body.model,
            stop_reason: choice.finish_reason,
        })
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<DeltaStream, ProviderError> {
        let response = self.send(messages, config, true).await?;
        let timeout = config.timeout;
        let byte_stream = response.bytes_stream();

        let deltas = async_stream::try_stream! {
            let mut lines = SseLines::default();
            futures::pin_mut!(byte_stream);

            loop {
                // An idle stream times out; a slow but steady one does not
                let next = tokio::time::timeout(timeout, byte_stream.next())
                    .await
                    .map_err(|_| ProviderError::Timeout(timeout))?;
                let Some(chunk) = next else {
                    break;
                };
                let chunk = chunk.map_err(|e| map_transport_error(e, timeout))?;

                for line in lines.push(&chunk)? {
                    let Some(data) = sse_payload(&line) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    if let Some(delta) = parse_sse_data(data)? {
                        yield delta;
                    }
                }
            }

            // Some servers close without a trailing newline
            if let Some(line) = lines.finish()? {
                if let Some(data) = sse_payload(&line) {
                    if data != "[DONE]" {
                        if let Some(delta) = parse_sse_data(data)? {
                            yield delta;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(deltas))
    }

    async fn health_check(&self) -> bool {
        // Verify a key is present without a network round trip
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        self.name
    }
}
