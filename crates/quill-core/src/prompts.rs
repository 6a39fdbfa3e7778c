//! Prompt text for the writing assistant.
//!
//! Prompts are plain constants so they can be reviewed in one place and
//! swapped per deployment through configuration. The default system prompt
//! lives in `Config`; the constants here are the built-in fallbacks.

use serde::{Deserialize, Serialize};

/// Default system prompt for writing feedback.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a creative AI assistant that assists children in writing.
1. You give grammatical assistance
2. Do not provide unwanted responses
3. Keep it concise and evocative
"#;

/// System prompt for continuing a piece of text.
pub const AUTOCOMPLETE_PROMPT: &str = r#"You are an expert creative writer.
Continue the user's text in a realistic and engaging manner.
Reply with the continuation only, without repeating the original text.
"#;

/// System prompt for the story-building chat companion.
pub const STORY_PROMPT: &str = r#"You are Mary Tales, a friendly storytelling companion for children.
Help the child build their own story one step at a time.
Ask exactly one short, encouraging question per reply about the story:
who it is about, where it happens, what the hero wants, what stands in the way,
who helps, and how it ends.
Never write the story for the child. Keep replies under three sentences and
use simple words.
"#;

/// Instruction for the structured story-extraction call.
pub const STORY_EXTRACTION_PROMPT: &str = r#"Analyze this conversation and extract key story elements.
Return ONLY a valid JSON object with these exact fields (leave empty string if not mentioned):
{
    "title": "",
    "setting": "",
    "main_character": "",
    "side_character": "",
    "goal": "",
    "conflict": "",
    "climax": "",
    "helpers": "",
    "villains": "",
    "ending": "",
    "theme": ""
}
Do not include any other text or explanation, just the JSON object."#;

/// Opening assistant message for a new story chat.
pub const GREETING: &str = "Hi there!👋I am Mary Tales. Who is this story about?✨";

/// Returned instead of calling a backend when the input is blank.
pub const EMPTY_INPUT_MESSAGE: &str = "Please provide some text for analysis.";

/// Returned instead of calling a backend when autocomplete input is too short.
pub const AUTOCOMPLETE_TOO_SHORT_MESSAGE: &str = "Please provide more content for autocomplete.";

/// Which kind of help a caller is asking for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "prompt", rename_all = "snake_case")]
pub enum PromptKind {
    /// Writing feedback using the configured system prompt
    #[default]
    Feedback,

    /// Continue the text
    Autocomplete,

    /// Caller-supplied system prompt
    Custom(String),
}

impl PromptKind {
    /// Resolve the system prompt, using `default` for [`PromptKind::Feedback`]
    /// and for a blank [`PromptKind::Custom`].
    pub fn system_prompt<'a>(&'a self, default: &'a str) -> &'a str {
        match self {
            PromptKind::Autocomplete => AUTOCOMPLETE_PROMPT,
            PromptKind::Custom(prompt) if !prompt.trim().is_empty() => prompt,
            PromptKind::Feedback | PromptKind::Custom(_) => default,
        }
    }

    /// Whether this kind enforces a minimum input length.
    pub fn needs_min_length(&self) -> bool {
        matches!(self, PromptKind::Autocomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::STORY_FIELDS;

    #[test]
    fn test_feedback_uses_default_prompt() {
        assert_eq!(PromptKind::Feedback.system_prompt("mine"), "mine");
    }

    #[test]
    fn test_custom_overrides_default() {
        let kind = PromptKind::Custom("Be brief.".to_string());
        assert_eq!(kind.system_prompt(DEFAULT_SYSTEM_PROMPT), "Be brief.");
    }

    #[test]
    fn test_blank_custom_falls_back_to_default() {
        assert_eq!(
            PromptKind::Custom(String::new()).system_prompt(DEFAULT_SYSTEM_PROMPT),
            DEFAULT_SYSTEM_PROMPT
        );
        assert_eq!(PromptKind::Custom(" \n".to_string()).system_prompt("mine"), "mine");
    }

    #[test]
    fn test_only_autocomplete_has_min_length() {
        assert!(PromptKind::Autocomplete.needs_min_length());
        assert!(!PromptKind::Feedback.needs_min_length());
        assert!(!PromptKind::Custom(String::new()).needs_min_length());
    }

    #[test]
    fn test_extraction_prompt_lists_every_field() {
        for field in STORY_FIELDS {
            assert!(
                STORY_EXTRACTION_PROMPT.contains(&format!("\"{field}\"")),
                "missing {field}"
            );
        }
    }
}
