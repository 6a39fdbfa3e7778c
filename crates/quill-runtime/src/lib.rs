//! # quill-runtime
//!
//! Pluggable text-generation backends for the Quill writing assistant.
//!
//! This crate turns a piece of writing into a stream of feedback chunks,
//! whichever backend is configured:
//! - `local`: an in-process GGUF model via llama.cpp (default `llama-cpp` feature)
//! - `openai`: hosted OpenAI-compatible completions, buffered, with retry
//! - `groq`: hosted Groq completions, streamed delta by delta
//!
//! It also holds the story-chat session ([`ConversationContext`]) used by
//! the storytelling companion.
//!
//! ## Errors are text
//!
//! No public entry point returns an error for a failed generation. Every
//! failure becomes one final chunk prefixed with a stable tag such as
//! `Connection Error:` or `Authentication Error:`, so a UI can render it as
//! a message.
//!
//! ## Example
//!
//! ```rust,no_run
//! use quill_runtime::{BackendManager, Config};
//! use quill_core::{Backend, PromptKind};
//!
//! # async fn run() -> Result<(), quill_core::ConfigError> {
//! let config = Config::from_env()?;
//! let manager = BackendManager::new(config);
//!
//! if !manager.initialize(Some(Backend::Groq)) {
//!     eprintln!("groq unavailable, falling back to the configured default");
//! }
//!
//! let chunks = manager
//!     .get_feedback_as_list("The dragon flew over the hils.", PromptKind::Feedback)
//!     .await;
//! println!("{}", chunks.concat());
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod conversation;
pub mod manager;
pub mod providers;
pub mod resilience;
pub mod ui_bridge;

pub use adapters::{Adapter, AdapterFactory, ChunkStream, DefaultAdapterFactory};
pub use config::Config;
pub use conversation::{client_from_config, ConversationClient, ConversationContext};
pub use manager::{BackendManager, ManagerState, INIT_FAILURE_MESSAGE};
pub use providers::{ApiCredential, ErrorCategory, LlmProvider, ProviderError};
pub use ui_bridge::{spawn_feedback, BridgeEvent, FeedbackTask};

use quill_core::PromptKind;

/// Collect a whole feedback reply into one string.
pub async fn get_feedback_text(manager: &BackendManager, text: &str, prompt: PromptKind) -> String {
    manager.get_feedback_as_list(text, prompt).await.concat()
}
