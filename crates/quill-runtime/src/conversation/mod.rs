//! Story conversation state.
//!
//! A [`ConversationContext`] is one chat session: the ordered message
//! history, the latest [`StoryInfo`] snapshot, and the client used to talk
//! to a model. Replies are buffered, never streamed.

mod client;
mod sugar_ai;

pub use client::{
    client_from_config, ConversationClient, ProviderConversationClient, CHAT_PARAMS, CHAT_TIMEOUT,
};
pub use sugar_ai::SugarAiClient;

use std::sync::Arc;

use quill_core::prompts::{GREETING, STORY_EXTRACTION_PROMPT, STORY_PROMPT};
use quill_core::redact::redact_secrets;
use quill_core::{Message, StoryInfo};

/// Prefix of the reply shown when the conversation backend fails.
pub const CONVERSATION_ERROR_PREFIX: &str = "Sorry, I encountered an error: ";

pub struct ConversationContext {
    messages: Vec<Message>,
    story_info: StoryInfo,
    client: Arc<dyn ConversationClient>,
}

impl ConversationContext {
    pub fn new(client: Arc<dyn ConversationClient>) -> Self {
        Self {
            messages: Vec::new(),
            story_info: StoryInfo::default(),
            client,
        }
    }

    /// A session opened with the assistant greeting.
    pub fn with_greeting(client: Arc<dyn ConversationClient>) -> Self {
        let mut ctx = Self::new(client);
        ctx.add_bot_message(GREETING);
        ctx
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn add_bot_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn story_info(&self) -> &StoryInfo {
        &self.story_info
    }

    /// `role: content` lines for the whole history.
    pub fn transcript(&self) -> String {
        quill_core::message::transcript(&self.messages)
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// One buffered reply for `messages`.
    ///
    /// Uses the story-companion prompt when `system_prompt` is `None`.
    /// Failures come back as a `"Sorry, I encountered an error: ..."` reply.
    pub async fn get_llm_response(&self, messages: &[Message], system_prompt: Option<&str>) -> String {
        let system_prompt = system_prompt.unwrap_or(STORY_PROMPT);
        match self.client.respond(messages, system_prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(client = self.client.name(), error = %e, "Conversation request failed");
                redact_secrets(&format!("{}{}", CONVERSATION_ERROR_PREFIX, e))
            }
        }
    }

    /// Record `user_text`, ask for a reply over the full history, and record
    /// the reply.
    pub async fn respond(&mut self, user_text: &str) -> String {
        self.add_user_message(user_text);
        let reply = self.get_llm_response(&self.messages, None).await;
        self.add_bot_message(reply.clone());
        reply
    }

    /// Re-extract the story summary from the whole conversation.
    ///
    /// The previous snapshot is always replaced: a failed call or an
    /// unparseable answer leaves every field empty.
    pub async fn update_story_info(&mut self) {
        self.story_info = match self.client.analyze(&self.messages, STORY_EXTRACTION_PROMPT).await {
            Ok(raw) => StoryInfo::from_model_output(&raw),
            Err(e) => {
                tracing::warn!(client = self.client.name(), error = %e, "Story extraction failed");
                StoryInfo::default()
            }
        };
        tracing::debug!(empty = self.story_info.is_empty(), "Story info updated");
    }
}

impl std::fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationContext")
            .field("messages", &self.messages.len())
            .field("story_info", &self.story_info)
            .field("client", &self.client.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use quill_core::Role;

    /// Answers every call from a fixed script and records the prompts it saw.
    struct Scripted {
        reply: Result<String, ProviderError>,
        extraction: Result<String, ProviderError>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: &str, extraction: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                extraction: Ok(extraction.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(err: ProviderError) -> Self {
            Self {
                reply: Err(err.clone()),
                extraction: Err(err),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ConversationClient for Scripted {
        async fn respond(&self, _messages: &[Message], system_prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().push(system_prompt.to_string());
            self.reply.clone()
        }

        async fn analyze(&self, _messages: &[Message], instruction: &str) -> Result<String, ProviderError> {
            self.prompts.lock().push(instruction.to_string());
            self.extraction.clone()
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_messages_append_in_order() {
        let mut ctx = ConversationContext::with_greeting(Arc::new(Scripted::new("", "")));
        ctx.add_user_message("Leo");
        ctx.add_bot_message("Where does Leo live?");

        let roles: Vec<Role> = ctx.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(ctx.messages()[0].content, GREETING);
        assert!(ctx.transcript().ends_with("assistant: Where does Leo live?"));
    }

    #[tokio::test]
    async fn test_default_prompt_is_story_companion() {
        let client = Arc::new(Scripted::new("Who is Leo?", ""));
        let ctx = ConversationContext::new(client.clone());

        let reply = ctx.get_llm_response(&[Message::user("Leo")], None).await;
        assert_eq!(reply, "Who is Leo?");
        assert_eq!(client.prompts.lock()[0], STORY_PROMPT);

        ctx.get_llm_response(&[Message::user("Leo")], Some("Custom")).await;
        assert_eq!(client.prompts.lock()[1], "Custom");
    }

    #[tokio::test]
    async fn test_failure_becomes_apology() {
        let ctx = ConversationContext::new(Arc::new(Scripted::failing(ProviderError::AuthError)));
        let reply = ctx.get_llm_response(&[Message::user("hi")], None).await;
        assert!(reply.starts_with(CONVERSATION_ERROR_PREFIX));
    }

    #[tokio::test]
    async fn test_respond_records_both_turns() {
        let mut ctx = ConversationContext::new(Arc::new(Scripted::new("Great name!", "")));
        let reply = ctx.respond("Leo").await;

        assert_eq!(reply, "Great name!");
        assert_eq!(ctx.messages().len(), 2);
        assert_eq!(ctx.messages()[1].content, "Great name!");
    }

    #[tokio::test]
    async fn test_story_info_from_extraction() {
        let raw = r#"Here you go: {"title":"","setting":"","main_character":"Leo","goal":"find a dragon"}"#;
        let client = Arc::new(Scripted::new("", raw));
        let mut ctx = ConversationContext::new(client.clone());
        ctx.add_user_message("A boy named Leo wants to find a dragon");

        ctx.update_story_info().await;

        assert_eq!(ctx.story_info().main_character, "Leo");
        assert_eq!(ctx.story_info().goal, "find a dragon");
        assert_eq!(ctx.story_info().villains, "");
        assert_eq!(client.prompts.lock()[0], STORY_EXTRACTION_PROMPT);
    }

    #[tokio::test]
    async fn test_garbage_resets_instead_of_merging() {
        let client = Arc::new(Scripted::new("", r#"{"main_character":"Leo"}"#));
        let mut ctx = ConversationContext::new(client);
        ctx.update_story_info().await;
        assert_eq!(ctx.story_info().main_character, "Leo");

        ctx.client = Arc::new(Scripted::new("", "I could not find a story here."));
        ctx.update_story_info().await;
        assert_eq!(*ctx.story_info(), StoryInfo::default());
    }

    #[tokio::test]
    async fn test_client_error_resets_story_info() {
        let mut ctx = ConversationContext::new(Arc::new(Scripted::new("", r#"{"title":"Leo"}"#)));
        ctx.update_story_info().await;
        assert_eq!(ctx.story_info().title, "Leo");

        ctx.client = Arc::new(Scripted::failing(ProviderError::Timeout(CHAT_TIMEOUT)));
        ctx.update_story_info().await;
        assert!(ctx.story_info().is_empty());
    }
}
